pub mod ar_camera;
pub mod camera_utils;

// Re-export main types
pub use ar_camera::ArCamera;
pub use camera_utils::{convert_matrix4_to_array, CameraUniform};
