//! # Graphics Module
//!
//! Everything that ends up on screen: the scene graph the marker anchor lives
//! in, the AR camera, the cube geometry and the two renderers.
//!
//! - **Camera** ([`camera`]) - projection fixed once from the calibration profile
//! - **Geometry** ([`geometry`]) - procedural cube
//! - **Rendering** ([`rendering`]) - wgpu window renderer and a CPU headless renderer
//! - **Resources** ([`resources`]) - depth and video textures
//! - **Scene** ([`scene`]) - node arena with group and mesh nodes

pub mod camera;
pub mod geometry;
pub mod rendering;
pub mod resources;
pub mod scene;

// Re-export commonly used types
pub use camera::ArCamera;
pub use rendering::{HeadlessRenderer, RenderEngine, Renderer};
pub use scene::Scene;
