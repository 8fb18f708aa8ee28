//! # AR Session
//!
//! [`ArSession`] owns everything one AR view needs and drives it frame by
//! frame: the video source, the marker tracker, the scene with its marker
//! anchor and cube, the camera and a renderer.
//!
//! ## Lifecycle
//!
//! ```text
//! Uninitialized -> Initializing -> Running
//!                              \-> Failed
//! ```
//!
//! [`ArSession::initialize`] opens the source and loads the tracker assets
//! concurrently. Afterwards the host loop calls [`ArSession::frame`] once per
//! display refresh and forwards window resizes to [`ArSession::handle_resize`].

pub mod clock;

use std::time::Instant;

use cgmath::{Matrix4, Rad, Vector3};

use crate::config::{LossPolicy, SessionConfig};
use crate::error::{ArError, Result};
use crate::gfx::camera::ArCamera;
use crate::gfx::geometry::primitives::generate_cube;
use crate::gfx::rendering::{Background, RenderView, Renderer};
use crate::gfx::scene::{NodeId, Scene};
use crate::tracking::MarkerTracker;
use crate::video::{fit_cover, DisplayFit, VideoSource, Viewport};

pub use clock::{FrameClock, ResizeBurst};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Running,
    /// Initialization failed; see [`ArSession::failure`]
    Failed,
}

pub struct ArSession<R: Renderer> {
    config: SessionConfig,
    state: SessionState,
    failure: Option<String>,

    source: Box<dyn VideoSource>,
    tracker: Box<dyn MarkerTracker>,
    renderer: R,

    scene: Scene,
    camera: ArCamera,
    anchor: NodeId,
    cube: NodeId,

    viewport: Viewport,
    fit: DisplayFit,
    clock: FrameClock,
    burst: ResizeBurst,
    capture_serial: u64,
}

impl<R: Renderer> ArSession<R> {
    /// Builds the scene and wires the capabilities together
    ///
    /// The viewport starts at the renderer's surface size. Nothing is loaded
    /// until [`initialize`](Self::initialize) runs.
    pub fn new(
        config: SessionConfig,
        source: Box<dyn VideoSource>,
        tracker: Box<dyn MarkerTracker>,
        renderer: R,
    ) -> Self {
        let mut scene = Scene::new();
        let anchor = scene.add_group("marker anchor", None);
        // Nothing to anchor to until the marker is first seen
        scene.set_visible(anchor, false);
        let cube = scene.add_mesh("cube", Some(anchor), &generate_cube());

        let (width, height) = renderer.surface_size();
        let viewport = Viewport::new(width, height);
        let burst = ResizeBurst::new(config.resize_burst_interval, config.resize_burst_count);

        let mut session = Self {
            config,
            state: SessionState::Uninitialized,
            failure: None,
            source,
            tracker,
            renderer,
            scene,
            camera: ArCamera::new(),
            anchor,
            cube,
            viewport,
            fit: DisplayFit::identity(viewport),
            clock: FrameClock::new(),
            burst,
            capture_serial: 0,
        };
        session.place_cube(0.0);
        session
    }

    /// Opens the video source and loads the tracker assets
    ///
    /// Must be called exactly once. On failure the session moves to
    /// [`SessionState::Failed`] and stays there.
    pub async fn initialize(&mut self) -> Result<()> {
        if self.state != SessionState::Uninitialized {
            return Err(ArError::AlreadyInitialized);
        }
        self.state = SessionState::Initializing;
        log::info!("Initializing AR session");

        let loaded = futures::future::try_join(self.source.init(), self.tracker.init()).await;

        match loaded.and_then(|_| self.finish_initialization()) {
            Ok(()) => {
                self.state = SessionState::Running;
                log::info!(
                    "AR session running, video {:?}, viewport {}x{}",
                    self.source.native_size(),
                    self.viewport.width,
                    self.viewport.height
                );
                Ok(())
            }
            Err(e) => {
                log::error!("AR session failed to initialize: {}", e);
                self.state = SessionState::Failed;
                self.failure = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn finish_initialization(&mut self) -> Result<()> {
        let projection = self
            .tracker
            .projection_matrix()
            .ok_or(ArError::NotInitialized("marker tracker"))?;
        self.camera.set_projection(projection)?;

        self.refit();
        self.burst.arm(Instant::now());
        Ok(())
    }

    /// Fits the surface to `viewport` and recomputes the video layout
    ///
    /// Returns whether anything changed; repeating a resize is a no-op.
    pub fn handle_resize(&mut self, viewport: Viewport) -> bool {
        if viewport.is_empty() {
            return false;
        }
        let moved = self.viewport != viewport;
        self.viewport = viewport;
        let changed = self.refit() || moved;
        if changed {
            log::debug!("Resized to {}x{}", viewport.width, viewport.height);
        }
        changed
    }

    /// Matches the surface and the video fit to the current viewport
    fn refit(&mut self) -> bool {
        let resized = self
            .renderer
            .resize(self.viewport.width, self.viewport.height);

        let fit = match self.source.native_size() {
            Some(size) => fit_cover(size, self.viewport),
            None => DisplayFit::identity(self.viewport),
        };
        let refitted = fit != self.fit;
        self.fit = fit;

        resized || refitted
    }

    /// Feeds the next video frame to the tracker
    ///
    /// Does nothing until the video source is ready. Returns whether the
    /// marker was found, in which case the anchor now holds its pose.
    pub fn update(&mut self) -> bool {
        if !self.source.is_ready() {
            return false;
        }
        let Some(frame) = self.source.capture() else {
            return false;
        };
        self.capture_serial += 1;

        match self.tracker.update(frame) {
            Some(pose) => {
                self.scene.set_transform(self.anchor, pose.model_view);
                self.scene.set_visible(self.anchor, true);
                log::trace!("Anchor updated, confidence {:.3}", pose.confidence);
                true
            }
            None => {
                if self.config.loss_policy == LossPolicy::Hide {
                    self.scene.set_visible(self.anchor, false);
                }
                false
            }
        }
    }

    /// Draws the scene over the current video frame
    pub fn render(&mut self) -> Result<()> {
        let background = if self.source.is_ready() {
            self.source.current().map(|frame| Background {
                frame,
                serial: self.capture_serial,
            })
        } else {
            None
        };

        let view = RenderView {
            scene: &self.scene,
            camera: &self.camera,
            fit: self.fit,
            background,
        };
        self.renderer.render(&view)
    }

    /// One iteration of the frame loop against the system clock
    pub fn frame(&mut self) -> Result<bool> {
        self.frame_at(Instant::now())
    }

    /// One iteration of the frame loop at `now`
    ///
    /// Advances the clock, applies a due resize correction, tracks, spins the
    /// cube and renders. Returns whether the marker was found.
    pub fn frame_at(&mut self, now: Instant) -> Result<bool> {
        self.clock.tick_at(now);

        if self.burst.poll(now) {
            self.refit();
            log::trace!("Resize correction, {} left", self.burst.remaining());
        }

        let found = self.update();
        self.place_cube(self.clock.total());
        self.render()?;
        Ok(found)
    }

    /// Sets the cube on top of the marker, turned by `seconds` of spin
    fn place_cube(&mut self, seconds: f64) {
        let size = self.config.marker_size;
        let angle = Rad((self.config.spin_speed as f64 * seconds) as f32);
        let transform = Matrix4::from_translation(Vector3::new(0.0, 0.5 * size, 0.0))
            * Matrix4::from_angle_y(angle)
            * Matrix4::from_scale(size);
        self.scene.set_transform(self.cube, transform);
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Why initialization failed, if it did
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn camera(&self) -> &ArCamera {
        &self.camera
    }

    pub fn anchor(&self) -> NodeId {
        self.anchor
    }

    pub fn cube(&self) -> NodeId {
        self.cube
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn fit(&self) -> DisplayFit {
        self.fit
    }

    pub fn clock(&self) -> &FrameClock {
        &self.clock
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::rendering::HeadlessRenderer;
    use crate::tracking::calibration::{CameraParameters, Intrinsics};
    use crate::tracking::detector::tests::{marker_frame, random_grid, FRAME_HEIGHT, FRAME_WIDTH};
    use crate::tracking::{MarkerPattern, PatternTracker};
    use crate::video::{ImageSequenceSource, VideoFrame};
    use std::time::Duration;

    fn calibration() -> CameraParameters {
        CameraParameters::from_intrinsics(
            FRAME_WIDTH,
            FRAME_HEIGHT,
            Intrinsics {
                fx: 300.0,
                fy: 300.0,
                cx: FRAME_WIDTH as f64 / 2.0,
                cy: FRAME_HEIGHT as f64 / 2.0,
                skew: 0.0,
            },
        )
    }

    fn blank() -> VideoFrame {
        VideoFrame::filled(FRAME_WIDTH, FRAME_HEIGHT, [255, 255, 255, 255])
    }

    fn session_with(
        frames: Vec<VideoFrame>,
        grid: &[u8],
        config: SessionConfig,
    ) -> ArSession<HeadlessRenderer> {
        let pattern = MarkerPattern::from_grid(16, grid).unwrap();
        let tracker = PatternTracker::with_assets(calibration(), pattern, &config);
        ArSession::new(
            config,
            Box::new(ImageSequenceSource::from_frames(frames)),
            Box::new(tracker),
            HeadlessRenderer::new(64, 48),
        )
    }

    fn running_session(frames: Vec<VideoFrame>, config: SessionConfig) -> ArSession<HeadlessRenderer> {
        let grid = random_grid(21);
        let mut session = session_with(frames, &grid, config);
        pollster::block_on(session.initialize()).unwrap();
        session
    }

    fn marker() -> VideoFrame {
        marker_frame(&random_grid(21))
    }

    #[test]
    fn test_anchor_written_once_per_matching_frame() {
        let frames = vec![marker(), blank(), marker(), marker(), blank()];
        let expected = [true, false, true, true, false];
        let mut session = running_session(frames, SessionConfig::default());
        let anchor = session.anchor();

        let mut revision = session.scene().node(anchor).unwrap().revision();
        for found in expected {
            let before = session.scene().node(anchor).unwrap().transform();
            assert_eq!(session.update(), found);

            let node = session.scene().node(anchor).unwrap();
            if found {
                assert_eq!(node.revision(), revision + 1);
            } else {
                assert_eq!(node.revision(), revision);
                assert_eq!(node.transform(), before);
            }
            revision = node.revision();
        }

        // The marker was lost last, the anchor keeps its pose and stays visible
        assert!(session.scene().is_visible(anchor));
    }

    #[test]
    fn test_hide_on_loss_policy() {
        let config = SessionConfig::default().with_loss_policy(LossPolicy::Hide);
        let mut session = running_session(vec![marker(), blank()], config);
        let anchor = session.anchor();

        assert!(!session.scene().is_visible(anchor));
        assert!(session.update());
        assert!(session.scene().is_visible(anchor));
        assert!(!session.update());
        assert!(!session.scene().is_visible(anchor));
    }

    #[test]
    fn test_update_is_noop_before_source_ready() {
        let grid = random_grid(21);
        let mut session = session_with(vec![marker()], &grid, SessionConfig::default());
        let revision = session.scene().node(session.anchor()).unwrap().revision();

        assert!(!session.update());
        assert_eq!(
            session.scene().node(session.anchor()).unwrap().revision(),
            revision
        );
    }

    #[test]
    fn test_total_time_accumulates_deltas() {
        let mut session = running_session(vec![blank()], SessionConfig::default());
        let start = Instant::now();

        let mut sum = 0.0;
        let mut previous = 0.0;
        for ms in [0, 17, 33, 33, 80, 400] {
            session.frame_at(start + Duration::from_millis(ms)).unwrap();
            let clock = session.clock();
            sum += clock.delta();
            assert!(clock.total() >= previous);
            previous = clock.total();
        }
        assert_eq!(session.clock().total(), sum);
        assert!((sum - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_resize_matches_viewport_and_is_idempotent() {
        let mut session = running_session(vec![blank()], SessionConfig::default());

        assert!(session.handle_resize(Viewport::new(100, 50)));
        assert_eq!(session.renderer().surface_size(), (100, 50));
        assert_eq!(session.viewport(), Viewport::new(100, 50));
        let fit = session.fit();
        // 4:3 video on a 2:1 screen is cropped top and bottom
        assert_eq!(fit.width, 100.0);
        assert!((fit.height - 75.0).abs() < 1e-4);

        assert!(!session.handle_resize(Viewport::new(100, 50)));
        assert_eq!(session.renderer().surface_size(), (100, 50));
        assert_eq!(session.fit(), fit);

        assert!(!session.handle_resize(Viewport::new(0, 50)));
        assert_eq!(session.renderer().surface_size(), (100, 50));
    }

    #[test]
    fn test_projection_is_fixed_after_initialize() {
        let config = SessionConfig::default()
            .with_resize_burst(Duration::from_millis(1), 2);
        let mut session = running_session(vec![marker(), blank()], config);

        let projection = session.camera().projection();
        let expected = calibration().projection_matrix(0.1, 1000.0);
        assert_eq!(projection, expected);

        let start = Instant::now();
        for i in 0..6 {
            session.frame_at(start + Duration::from_millis(i * 5)).unwrap();
            session.handle_resize(Viewport::new(80 + i as u32, 60));
            assert_eq!(session.camera().projection(), projection);
        }
        assert!(matches!(
            pollster::block_on(session.initialize()),
            Err(ArError::AlreadyInitialized)
        ));
        assert_eq!(session.camera().projection(), projection);
    }

    #[test]
    fn test_empty_scene_renders_transparent() {
        let mut session = session_with(Vec::new(), &random_grid(1), SessionConfig::default());

        session.render().unwrap();
        let renderer = session.renderer();
        assert_eq!(renderer.frames_rendered(), 1);
        assert!(renderer.pixels().chunks_exact(4).all(|p| p[3] == 0));
    }

    #[test]
    fn test_failed_initialization_is_terminal() {
        let config = SessionConfig::default()
            .with_camera_parameters("does/not/exist.dat")
            .with_pattern("does/not/exist.patt");
        let tracker = PatternTracker::new(&config);
        let mut session = ArSession::new(
            config,
            Box::new(ImageSequenceSource::from_frames(vec![blank()])),
            Box::new(tracker),
            HeadlessRenderer::new(32, 32),
        );

        let result = pollster::block_on(session.initialize());
        assert!(matches!(result, Err(ArError::Io { .. })));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(session.failure().is_some());
        assert!(!session.camera().has_projection());

        assert!(matches!(
            pollster::block_on(session.initialize()),
            Err(ArError::AlreadyInitialized)
        ));
        // Still draws, just nothing anchored
        session.frame().unwrap();
    }

    #[test]
    fn test_frame_draws_cube_over_video() {
        let mut session = running_session(vec![marker()], SessionConfig::default());
        session.handle_resize(Viewport::new(FRAME_WIDTH, FRAME_HEIGHT));

        assert!(session.frame().unwrap());
        let renderer = session.renderer();
        // Video fills the surface, so nothing stays transparent
        assert!(renderer.pixels().chunks_exact(4).all(|p| p[3] == 255));
        // The marker centre is covered by the cube, not the black and white pattern
        let centre = renderer.pixel(FRAME_WIDTH / 2, FRAME_HEIGHT / 2);
        assert!(
            centre[..3].iter().any(|&c| c != 0 && c != 255),
            "centre {:?}",
            centre
        );
    }

    #[test]
    fn test_resize_burst_tracks_late_native_size() {
        use crate::video::webcam::ScriptedGrabber;
        use crate::video::WebcamSource;
        use std::cell::Cell;
        use std::rc::Rc;

        let size = Rc::new(Cell::new((FRAME_WIDTH, FRAME_HEIGHT)));
        let camera_size = Rc::clone(&size);
        let source = WebcamSource::new(Box::new(ScriptedGrabber {
            opened: false,
            next: move || {
                let (w, h) = camera_size.get();
                Ok(VideoFrame::filled(w, h, [255, 255, 255, 255]))
            },
        }));

        let config = SessionConfig::default()
            .with_resize_burst(Duration::from_millis(100), 2);
        let pattern = MarkerPattern::from_grid(16, &random_grid(21)).unwrap();
        let tracker = PatternTracker::with_assets(calibration(), pattern, &config);
        let mut session = ArSession::new(
            config,
            Box::new(source),
            Box::new(tracker),
            HeadlessRenderer::new(64, 48),
        );

        let before = Instant::now();
        pollster::block_on(session.initialize()).unwrap();
        let after = Instant::now();
        // 4:3 camera on a 4:3 surface
        let initial = session.fit();
        assert_eq!(initial, DisplayFit::identity(Viewport::new(64, 48)));

        let is_wide = |fit: DisplayFit| fit.scale_x > 1.0 && (fit.width - 64.0 * 48.0 / 36.0).abs() < 1e-3;

        // The camera switches to 16:9 after reporting ready
        size.set((640, 360));
        session.update();
        session.frame_at(before).unwrap();
        assert_eq!(session.fit(), initial);
        session.frame_at(before + Duration::from_millis(99)).unwrap();
        assert_eq!(session.fit(), initial);

        session.frame_at(after + Duration::from_millis(100)).unwrap();
        assert!(is_wide(session.fit()), "{:?}", session.fit());

        size.set((FRAME_WIDTH, FRAME_HEIGHT));
        session.update();
        session.frame_at(after + Duration::from_millis(200)).unwrap();
        assert_eq!(session.fit(), initial);

        // Last of count + 1 corrections
        size.set((640, 360));
        session.update();
        session.frame_at(after + Duration::from_millis(300)).unwrap();
        assert!(is_wide(session.fit()));

        size.set((FRAME_WIDTH, FRAME_HEIGHT));
        session.update();
        for ms in [400, 500, 1000] {
            session.frame_at(after + Duration::from_millis(ms)).unwrap();
            assert!(is_wide(session.fit()), "refit at {}ms", ms);
        }
    }
}
