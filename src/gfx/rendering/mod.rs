//! Core rendering functionality
//!
//! Both renderers draw the same thing: the current video frame cover-fitted
//! to the surface, then every visible mesh shaded by its view-space normals.
//! Uncovered pixels keep [`CLEAR_COLOR`], whose alpha is zero.

pub mod headless;
pub mod pipeline_manager;
pub mod render_engine;

use cgmath::{Matrix, Matrix4, SquareMatrix};

use crate::error::Result;
use crate::gfx::camera::{convert_matrix4_to_array, ArCamera};
use crate::gfx::scene::Scene;
use crate::video::{DisplayFit, VideoFrame};

// Re-export main types
pub use headless::HeadlessRenderer;
pub use pipeline_manager::{PipelineConfig, PipelineManager};
pub use render_engine::RenderEngine;

/// Light grey, fully transparent
pub const CLEAR_COLOR: [f32; 4] = [211.0 / 255.0, 211.0 / 255.0, 211.0 / 255.0, 0.0];

/// Video frame to draw behind the scene
#[derive(Debug, Clone, Copy)]
pub struct Background<'a> {
    pub frame: &'a VideoFrame,
    /// Changes whenever the frame content changes
    pub serial: u64,
}

/// Everything a renderer needs for one frame
#[derive(Debug, Clone, Copy)]
pub struct RenderView<'a> {
    pub scene: &'a Scene,
    pub camera: &'a ArCamera,
    /// Layout of the video inside the surface
    pub fit: DisplayFit,
    pub background: Option<Background<'a>>,
}

/// Capability interface the session needs from a renderer
pub trait Renderer {
    /// Resizes the drawing surface, returns whether the size changed
    fn resize(&mut self, width: u32, height: u32) -> bool;

    fn surface_size(&self) -> (u32, u32);

    /// Draws one frame
    fn render(&mut self, view: &RenderView<'_>) -> Result<()>;
}

/// Per-mesh transforms for the normal-shaded pass
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ModelUniform {
    pub model_view: [[f32; 4]; 4],
    /// Inverse transpose of `model_view`, for normals
    pub normal_matrix: [[f32; 4]; 4],
}

impl ModelUniform {
    pub fn new(model_view: Matrix4<f32>) -> Self {
        let normal_matrix = model_view
            .invert()
            .map(|m| m.transpose())
            .unwrap_or_else(Matrix4::identity);
        Self {
            model_view: convert_matrix4_to_array(model_view),
            normal_matrix: convert_matrix4_to_array(normal_matrix),
        }
    }
}
