//! Marker pose from a plane-induced homography
//!
//! The marker lies on the plane `Z = 0` of its own frame. Given the camera
//! matrix `K` and the homography `H = K [r1 r2 t]` from that plane to pixels,
//! the rotation and translation of the marker in camera space follow
//! directly. Results are then converted into the scene's conventions: a
//! right-handed view space looking down -Z with Y up, and a marker frame
//! whose +Y axis is the marker normal pointing at the camera.

use cgmath::{Matrix4, Vector4};
use nalgebra::{Matrix3, Vector3};

/// Rigid transform from marker plane coordinates to camera coordinates
///
/// Camera coordinates follow the image: X right, Y down, Z forward.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanarPose {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
}

impl PlanarPose {
    /// Decomposes `H` into a pose given the intrinsics `K`
    ///
    /// Returns `None` when `K` is singular.
    pub fn from_homography(k: &Matrix3<f64>, h: &Matrix3<f64>) -> Option<Self> {
        let k_inv = k.try_inverse()?;

        let k_inv_h1 = k_inv * h.column(0);
        let k_inv_h2 = k_inv * h.column(1);
        let k_inv_h3 = k_inv * h.column(2);

        let norm = (k_inv_h1.norm() + k_inv_h2.norm()) * 0.5;
        if norm < f64::EPSILON {
            return None;
        }
        let mut lambda = 1.0 / norm;
        // The marker has to be in front of the camera
        if k_inv_h3.z < 0.0 {
            lambda = -lambda;
        }

        let r1 = k_inv_h1 * lambda;
        let r2 = k_inv_h2 * lambda;
        let r3 = r1.cross(&r2);
        let approx = Matrix3::from_columns(&[r1, r2, r3]);

        // Nearest rotation (polar decomposition)
        let svd = approx.svd(true, true);
        let (u, v_t) = (svd.u?, svd.v_t?);
        let mut rotation = u * v_t;
        if rotation.determinant() < 0.0 {
            let mut u_flipped = u;
            u_flipped.column_mut(2).neg_mut();
            rotation = u_flipped * v_t;
        }

        Some(Self {
            rotation,
            translation: k_inv_h3 * lambda,
        })
    }

    /// Model-view matrix of the marker frame in scene conventions
    ///
    /// Scene axes map onto the marker plane as X to the pattern's right, Z to
    /// the pattern's bottom edge, and Y out of the marker towards the camera.
    pub fn model_view(&self) -> Matrix4<f32> {
        // Scene marker axes expressed in plane coordinates
        let marker_axes = Matrix3::new(
            1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, //
            0.0, -1.0, 0.0,
        );
        // Image camera (Y down, Z forward) to view space (Y up, Z back)
        let flip = Matrix3::from_diagonal(&Vector3::new(1.0, -1.0, -1.0));

        let r = flip * self.rotation * marker_axes;
        let t = flip * self.translation;

        let column = |c: usize| Vector4::new(r[(0, c)] as f32, r[(1, c)] as f32, r[(2, c)] as f32, 0.0);
        Matrix4::from_cols(
            column(0),
            column(1),
            column(2),
            Vector4::new(t.x as f32, t.y as f32, t.z as f32, 1.0),
        )
    }
}
