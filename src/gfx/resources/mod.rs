//! GPU resource management
//!
//! Handles textures and buffers for rendering.

pub mod texture_resource;

// Re-export main types
pub use texture_resource::TextureResource;
