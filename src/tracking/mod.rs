//! # Marker Tracking
//!
//! Locates a printed square marker in video frames and reports where it is
//! relative to the camera.
//!
//! - [`CameraParameters`] - calibration profile and the projection it implies
//! - [`MarkerPattern`] - reference image of the marker interior
//! - [`detector`] - finds square borders and matches their interior
//! - [`PatternTracker`] - the [`MarkerTracker`] built from the pieces above

pub mod calibration;
pub mod detector;
pub mod homography;
pub mod pattern;
pub mod pattern_tracker;
pub mod pose;

use cgmath::Matrix4;
use futures::future::BoxFuture;

use crate::error::Result;
use crate::video::VideoFrame;

pub use calibration::{CameraParameters, Intrinsics};
pub use detector::DetectorParams;
pub use pattern::{MarkerPattern, PatternMatch};
pub use pattern_tracker::PatternTracker;

/// Marker location found in a single frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerPose {
    /// Marker frame to view space; the marker normal is local +Y
    pub model_view: Matrix4<f32>,
    /// Pattern correlation of the match
    pub confidence: f32,
    /// Upright marker corners in frame pixels (TL, TR, BR, BL)
    pub corners: [[f32; 2]; 4],
}

/// Capability interface the session needs from a marker tracker
pub trait MarkerTracker {
    /// Loads the calibration profile and marker assets
    fn init(&mut self) -> BoxFuture<'_, Result<()>>;

    fn is_ready(&self) -> bool;

    /// Projection derived from the calibration profile, once loaded
    fn projection_matrix(&self) -> Option<Matrix4<f32>>;

    /// Looks for the marker in `frame`
    fn update(&mut self, frame: &VideoFrame) -> Option<MarkerPose>;
}
