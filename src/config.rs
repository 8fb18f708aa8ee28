//! Session configuration
//!
//! All tunables of an AR session live in [`SessionConfig`]. It is built with
//! `Default` plus `with_*` builder methods, and the command line maps its
//! flags onto it.

use std::path::PathBuf;
use std::time::Duration;

/// What happens to the anchor node on frames where the marker is not found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LossPolicy {
    /// Keep the last detected transform and stay visible
    #[default]
    KeepLast,
    /// Hide the anchor until the marker is matched again
    Hide,
}

/// Configuration for an [`ArSession`](crate::session::ArSession)
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// ARToolKit camera calibration file (`camera_para.dat`)
    pub camera_parameters_path: PathBuf,
    /// ARToolKit marker pattern file (`.patt`)
    pub pattern_path: PathBuf,
    /// Near clipping plane of the projection built from the calibration
    pub near: f32,
    /// Far clipping plane of the projection built from the calibration
    pub far: f32,
    /// Luma value below which a pixel counts as marker ink
    pub threshold: u8,
    /// Smallest dark component, in pixels, considered a marker candidate
    pub min_marker_area: usize,
    /// Minimum pattern correlation for a candidate to count as a match
    pub min_confidence: f32,
    /// Edge length of the printed marker in scene units
    pub marker_size: f32,
    pub loss_policy: LossPolicy,
    /// Cube rotation speed in radians per second, 0 keeps it still
    pub spin_speed: f32,
    /// Interval between the re-fits scheduled after the source is ready
    pub resize_burst_interval: Duration,
    /// Number of scheduled re-fits before the burst is cancelled
    pub resize_burst_count: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            camera_parameters_path: PathBuf::from("data/camera_para.dat"),
            pattern_path: PathBuf::from("data/patt.hiro"),
            near: 0.1,
            far: 1000.0,
            threshold: 100,
            min_marker_area: 400,
            min_confidence: 0.5,
            marker_size: 1.0,
            loss_policy: LossPolicy::KeepLast,
            spin_speed: 1.0,
            resize_burst_interval: Duration::from_millis(700),
            resize_burst_count: 10,
        }
    }
}

impl SessionConfig {
    pub fn with_camera_parameters(mut self, path: impl Into<PathBuf>) -> Self {
        self.camera_parameters_path = path.into();
        self
    }

    pub fn with_pattern(mut self, path: impl Into<PathBuf>) -> Self {
        self.pattern_path = path.into();
        self
    }

    /// Sets the clipping planes used for the projection matrix (builder pattern)
    pub fn with_clip_planes(mut self, near: f32, far: f32) -> Self {
        self.near = near;
        self.far = far;
        self
    }

    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_min_marker_area(mut self, area: usize) -> Self {
        self.min_marker_area = area;
        self
    }

    pub fn with_min_confidence(mut self, confidence: f32) -> Self {
        self.min_confidence = confidence;
        self
    }

    pub fn with_loss_policy(mut self, policy: LossPolicy) -> Self {
        self.loss_policy = policy;
        self
    }

    pub fn with_spin_speed(mut self, radians_per_second: f32) -> Self {
        self.spin_speed = radians_per_second;
        self
    }

    /// Sets the cadence and length of the post-ready resize burst (builder pattern)
    ///
    /// # Arguments
    /// * `interval` - Time between two scheduled re-fits
    /// * `count` - Number of re-fits before the burst cancels itself
    pub fn with_resize_burst(mut self, interval: Duration, count: u32) -> Self {
        self.resize_burst_interval = interval;
        self.resize_burst_count = count;
        self
    }
}
