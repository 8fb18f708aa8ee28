//! Camera whose projection comes from a calibrated physical camera

use cgmath::{Matrix4, SquareMatrix};

use super::camera_utils::CameraUniform;
use crate::error::{ArError, Result};

/// Scene camera aligned with the physical camera
///
/// The view transform is the identity: tracked poses already place anchored
/// content in camera space. The projection is written once, from the
/// calibration profile, and never changes afterwards.
#[derive(Debug, Clone)]
pub struct ArCamera {
    projection: Option<Matrix4<f32>>,
}

impl Default for ArCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl ArCamera {
    pub fn new() -> Self {
        Self { projection: None }
    }

    /// Sets the projection matrix. Fails if it was set before.
    pub fn set_projection(&mut self, projection: Matrix4<f32>) -> Result<()> {
        if self.projection.is_some() {
            return Err(ArError::ProjectionLocked);
        }
        self.projection = Some(projection);
        Ok(())
    }

    pub fn has_projection(&self) -> bool {
        self.projection.is_some()
    }

    /// Projection matrix, identity until set
    pub fn projection(&self) -> Matrix4<f32> {
        self.projection.unwrap_or_else(Matrix4::identity)
    }

    /// Uniform for the GPU, with `clip_scale` applied after projection
    pub fn uniform(&self, clip_scale: Matrix4<f32>) -> CameraUniform {
        CameraUniform::from_matrix(clip_scale * self.projection())
    }
}
