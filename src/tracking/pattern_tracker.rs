//! Pattern marker tracker
//!
//! Ties the calibration profile, the reference pattern and the detector
//! together behind the [`MarkerTracker`] interface.

use std::path::PathBuf;

use cgmath::Matrix4;
use futures::future::{BoxFuture, FutureExt};
use nalgebra::Point2;

use super::calibration::CameraParameters;
use super::detector::{detect_markers, DetectorParams, LumaView};
use super::homography::homography_from_points;
use super::pattern::MarkerPattern;
use super::pose::PlanarPose;
use super::{MarkerPose, MarkerTracker};
use crate::config::SessionConfig;
use crate::error::{ArError, Result};
use crate::video::VideoFrame;

pub struct PatternTracker {
    camera_parameters_path: PathBuf,
    pattern_path: PathBuf,
    near: f32,
    far: f32,
    marker_size: f64,
    params: DetectorParams,
    calibration: Option<CameraParameters>,
    pattern: Option<MarkerPattern>,
}

impl PatternTracker {
    /// Tracker that loads its assets from the configured paths on `init`
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            camera_parameters_path: config.camera_parameters_path.clone(),
            pattern_path: config.pattern_path.clone(),
            near: config.near,
            far: config.far,
            marker_size: config.marker_size as f64,
            params: DetectorParams::from(config),
            calibration: None,
            pattern: None,
        }
    }

    /// Tracker with assets already in memory, ready once `init` resolves
    pub fn with_assets(
        calibration: CameraParameters,
        pattern: MarkerPattern,
        config: &SessionConfig,
    ) -> Self {
        Self {
            calibration: Some(calibration),
            pattern: Some(pattern),
            ..Self::new(config)
        }
    }

    /// Corners of the marker in its own plane, matching the detector's corner order
    fn marker_corners(&self) -> [Point2<f64>; 4] {
        let half = self.marker_size * 0.5;
        [
            Point2::new(-half, -half),
            Point2::new(half, -half),
            Point2::new(half, half),
            Point2::new(-half, half),
        ]
    }
}

impl MarkerTracker for PatternTracker {
    fn init(&mut self) -> BoxFuture<'_, Result<()>> {
        async move {
            if self.calibration.is_none() || self.pattern.is_none() {
                let (calibration, pattern) = futures::try_join!(
                    CameraParameters::load(&self.camera_parameters_path),
                    MarkerPattern::load(&self.pattern_path),
                )?;
                self.calibration = Some(calibration);
                self.pattern = Some(pattern);
            }
            log::info!("Pattern tracker ready");
            Ok::<(), ArError>(())
        }
        .boxed()
    }

    fn is_ready(&self) -> bool {
        self.calibration.is_some() && self.pattern.is_some()
    }

    fn projection_matrix(&self) -> Option<Matrix4<f32>> {
        self.calibration
            .as_ref()
            .map(|c| c.projection_matrix(self.near, self.far))
    }

    fn update(&mut self, frame: &VideoFrame) -> Option<MarkerPose> {
        let (calibration, pattern) = (self.calibration.as_ref()?, self.pattern.as_ref()?);

        let luma = frame.to_luma();
        let image = LumaView {
            width: frame.width(),
            height: frame.height(),
            data: &luma,
        };

        let detection = detect_markers(image, pattern, &self.params)
            .into_iter()
            .max_by(|a, b| {
                a.pattern_match
                    .confidence
                    .total_cmp(&b.pattern_match.confidence)
            })?;

        let k = calibration
            .scaled_to(frame.width(), frame.height())
            .intrinsics()
            .matrix();
        let h = homography_from_points(&self.marker_corners(), &detection.corners)?;
        let pose = PlanarPose::from_homography(&k, &h)?;

        log::debug!(
            "Marker found, confidence {:.3}, direction {}",
            detection.pattern_match.confidence,
            detection.pattern_match.direction
        );

        Some(MarkerPose {
            model_view: pose.model_view(),
            confidence: detection.pattern_match.confidence,
            corners: detection.corners.map(|p| [p.x as f32, p.y as f32]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::calibration::Intrinsics;
    use crate::tracking::detector::tests::{marker_frame, random_grid, FRAME_HEIGHT, FRAME_WIDTH};
    use crate::tracking::pattern::rotate_ccw;

    fn tracker(grid: &[u8]) -> PatternTracker {
        // Calibrated at twice the test frame size
        let calibration = CameraParameters::from_intrinsics(
            FRAME_WIDTH * 2,
            FRAME_HEIGHT * 2,
            Intrinsics {
                fx: 600.0,
                fy: 600.0,
                cx: FRAME_WIDTH as f64,
                cy: FRAME_HEIGHT as f64,
                skew: 0.0,
            },
        );
        let pattern = MarkerPattern::from_grid(16, grid).unwrap();
        let mut tracker =
            PatternTracker::with_assets(calibration, pattern, &SessionConfig::default());
        pollster::block_on(tracker.init()).unwrap();
        tracker
    }

    #[test]
    fn test_not_ready_before_init() {
        let mut tracker = PatternTracker::new(&SessionConfig::default());
        assert!(!tracker.is_ready());
        assert!(tracker.projection_matrix().is_none());
        assert!(tracker.update(&marker_frame(&random_grid(3))).is_none());
    }

    #[test]
    fn test_missing_assets_fail_init() {
        let config = SessionConfig::default()
            .with_camera_parameters("does/not/exist.dat")
            .with_pattern("does/not/exist.patt");
        let mut tracker = PatternTracker::new(&config);
        let result = pollster::block_on(tracker.init());
        assert!(matches!(result, Err(ArError::Io { .. })));
        assert!(!tracker.is_ready());
    }

    #[test]
    fn test_frontal_marker_pose() {
        let grid = random_grid(5);
        let mut tracker = tracker(&grid);

        let pose = tracker.update(&marker_frame(&grid)).unwrap();
        let mv = pose.model_view;
        // Marker normal faces the viewer, marker sits in front of the camera
        assert!(mv.y.z > 0.9, "normal {:?}", mv.y);
        assert!(mv.w.z < 0.0);
        // Centred in the frame
        assert!(mv.w.x.abs() < 0.05 && mv.w.y.abs() < 0.05, "offset {:?}", mv.w);
        // 160 px marker of unit size seen with fx = 300 px is ~1.9 units away
        assert!((mv.w.z + 300.0 / 159.0).abs() < 0.05, "distance {}", mv.w.z);
    }

    #[test]
    fn test_turned_marker_pose() {
        let grid = random_grid(9);
        let mut tracker = tracker(&grid);

        let pose = tracker.update(&marker_frame(&rotate_ccw(&grid, 16))).unwrap();
        // The pattern's right now points up the screen
        let x_axis = pose.model_view.x;
        assert!(x_axis.y > 0.99, "x axis {:?}", x_axis);
    }

    #[test]
    fn test_blank_frame_has_no_pose() {
        let mut tracker = tracker(&random_grid(4));
        let blank = VideoFrame::filled(FRAME_WIDTH, FRAME_HEIGHT, [255, 255, 255, 255]);
        assert!(tracker.update(&blank).is_none());
    }
}
