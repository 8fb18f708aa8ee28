use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use arcube::gfx::rendering::HeadlessRenderer;
use arcube::tracking::{MarkerTracker, PatternTracker};
use arcube::video::{ImageSequenceSource, ImageSource, VideoSource};
use arcube::{ArApp, ArSession, LossPolicy, SessionConfig};

/// Cube anchored to a pattern marker over a video feed
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Camera calibration file
    #[arg(long, default_value = "data/camera_para.dat")]
    camera_params: PathBuf,

    /// Marker pattern file
    #[arg(long, default_value = "data/patt.hiro")]
    pattern: PathBuf,

    /// Still image to use as the video source
    #[arg(long, conflicts_with = "frames")]
    image: Option<PathBuf>,

    /// Directory of frames played back as a looping video
    #[arg(long)]
    frames: Option<PathBuf>,

    /// Camera device index, the default source when no image or frames are given
    #[arg(long, num_args = 0..=1, default_missing_value = "0", conflicts_with_all = ["image", "frames"])]
    webcam: Option<u32>,

    /// Cube spin speed in radians per second
    #[arg(long, default_value_t = 1.0)]
    spin: f32,

    /// Hide the cube while the marker is not visible
    #[arg(long)]
    hide_on_loss: bool,

    /// Luma threshold for marker ink
    #[arg(long, default_value_t = 100)]
    threshold: u8,

    /// Smallest dark region, in pixels, tried as a marker
    #[arg(long, default_value_t = 400)]
    min_marker_area: usize,

    /// Lowest pattern correlation accepted as a match
    #[arg(long, default_value_t = 0.5)]
    min_confidence: f32,

    /// Near clipping plane
    #[arg(long, default_value_t = 0.1)]
    near: f32,

    /// Far clipping plane
    #[arg(long, default_value_t = 1000.0)]
    far: f32,

    /// Render offscreen and write the last frame to --output
    #[arg(long)]
    headless: bool,

    /// Frames to run in headless mode
    #[arg(long, default_value_t = 1)]
    frame_count: u32,

    /// PNG written in headless mode
    #[arg(long, default_value = "arcube.png")]
    output: PathBuf,

    #[arg(long, default_value_t = 1200)]
    width: u32,

    #[arg(long, default_value_t = 800)]
    height: u32,
}

impl Cli {
    fn config(&self) -> SessionConfig {
        let policy = if self.hide_on_loss {
            LossPolicy::Hide
        } else {
            LossPolicy::KeepLast
        };

        SessionConfig::default()
            .with_camera_parameters(&self.camera_params)
            .with_pattern(&self.pattern)
            .with_spin_speed(self.spin)
            .with_threshold(self.threshold)
            .with_min_marker_area(self.min_marker_area)
            .with_min_confidence(self.min_confidence)
            .with_clip_planes(self.near, self.far)
            .with_loss_policy(policy)
    }

    fn source(&self) -> anyhow::Result<Box<dyn VideoSource>> {
        match (&self.image, &self.frames) {
            (Some(image), _) => Ok(Box::new(ImageSource::open(image))),
            (None, Some(frames)) => Ok(Box::new(ImageSequenceSource::open_dir(frames))),
            (None, None) => webcam(self.webcam.unwrap_or(0)),
        }
    }
}

#[cfg(feature = "webcam")]
fn webcam(index: u32) -> anyhow::Result<Box<dyn VideoSource>> {
    Ok(Box::new(arcube::video::WebcamSource::open_device(index)))
}

#[cfg(not(feature = "webcam"))]
fn webcam(index: u32) -> anyhow::Result<Box<dyn VideoSource>> {
    anyhow::bail!(
        "webcam {} requested but camera support is not built in, rebuild with --features webcam or pass --image or --frames",
        index
    )
}

fn run_headless(cli: &Cli, config: SessionConfig, source: Box<dyn VideoSource>) -> anyhow::Result<()> {
    let tracker: Box<dyn MarkerTracker> = Box::new(PatternTracker::new(&config));
    let renderer = HeadlessRenderer::new(cli.width, cli.height);
    let mut session = ArSession::new(config, source, tracker, renderer);
    pollster::block_on(session.initialize()).context("failed to initialize AR session")?;

    let mut found = 0;
    for _ in 0..cli.frame_count.max(1) {
        if session.frame()? {
            found += 1;
        }
    }
    log::info!(
        "Rendered {} frames, marker found in {}",
        cli.frame_count.max(1),
        found
    );

    session
        .renderer()
        .save_png(&cli.output)
        .with_context(|| format!("failed to write {}", cli.output.display()))?;
    log::info!("Wrote {}", cli.output.display());
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = cli.config();
    let source = cli.source()?;

    if cli.headless {
        return run_headless(&cli, config, source);
    }

    let tracker = Box::new(PatternTracker::new(&config));
    ArApp::new(config, source, tracker)?
        .with_window_size(cli.width, cli.height)
        .run()?;
    Ok(())
}
