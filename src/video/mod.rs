//! # Video Sources
//!
//! A video source exposes the camera image the marker is tracked in and the
//! background the scene is drawn over. Sources are opened asynchronously and
//! report readiness once their native frame size is known.
//!
//! - [`ImageSource`] - a single still image
//! - [`ImageSequenceSource`] - a looping sequence of frames read from a directory
//! - [`WebcamSource`] - a live camera feed
//!
//! The [`fit_cover`] helper computes how a source is scaled to cover a
//! viewport while preserving its aspect ratio.

pub mod image_source;
pub mod sequence;
pub mod webcam;

use futures::future::BoxFuture;
use image::RgbaImage;

use crate::error::{ArError, Result};

pub use image_source::ImageSource;
pub use sequence::ImageSequenceSource;
pub use webcam::{FrameGrabber, WebcamSource};

/// Capability interface the session needs from a camera, image or video feed
pub trait VideoSource {
    /// Opens the source. The returned future resolves once frames are available.
    fn init(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Whether frames can be captured
    fn is_ready(&self) -> bool;

    /// Native frame dimensions, known once the source is ready
    fn native_size(&self) -> Option<(u32, u32)>;

    /// Advances to the next frame and returns it
    fn capture(&mut self) -> Option<&VideoFrame>;

    /// The most recently captured frame
    fn current(&self) -> Option<&VideoFrame>;
}

/// A single RGBA8 video frame
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl VideoFrame {
    /// Wraps tightly packed RGBA8 pixel data
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 || pixels.len() != expected {
            return Err(ArError::VideoSource(format!(
                "frame of {}x{} needs {} bytes, got {}",
                width,
                height,
                expected,
                pixels.len()
            )));
        }

        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Creates a frame filled with a single colour
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();

        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Raw RGBA8 data, row major
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        [
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ]
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        self.pixels[i..i + 4].copy_from_slice(&rgba);
    }

    /// Rec. 601 luma of every pixel, row major
    pub fn to_luma(&self) -> Vec<u8> {
        self.pixels
            .chunks_exact(4)
            .map(|p| {
                let y = 0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32;
                y.round().clamp(0.0, 255.0) as u8
            })
            .collect()
    }
}

impl From<RgbaImage> for VideoFrame {
    fn from(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            pixels: image.into_raw(),
        }
    }
}

/// Size of the display area in physical pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// How a video source is laid out to cover a viewport
///
/// The source is scaled uniformly until it covers the whole viewport and the
/// overflow is cropped equally on both sides.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayFit {
    /// Displayed video width in pixels, at least the viewport width
    pub width: f32,
    /// Displayed video height in pixels, at least the viewport height
    pub height: f32,
    /// Displayed width over viewport width
    pub scale_x: f32,
    /// Displayed height over viewport height
    pub scale_y: f32,
}

impl DisplayFit {
    /// Fit used before the source size is known
    pub fn identity(viewport: Viewport) -> Self {
        Self {
            width: viewport.width as f32,
            height: viewport.height as f32,
            scale_x: 1.0,
            scale_y: 1.0,
        }
    }

    /// Visible part of the video in texture coordinates, as (min, max)
    pub fn uv_rect(&self) -> ([f32; 2], [f32; 2]) {
        let half_u = 0.5 / self.scale_x;
        let half_v = 0.5 / self.scale_y;
        ([0.5 - half_u, 0.5 - half_v], [0.5 + half_u, 0.5 + half_v])
    }

    /// Clip-space scale that maps the full video frame onto the cropped viewport
    pub fn clip_scale(&self) -> cgmath::Matrix4<f32> {
        cgmath::Matrix4::from_nonuniform_scale(self.scale_x, self.scale_y, 1.0)
    }
}

/// Scales `source` to cover `viewport` while keeping its aspect ratio
pub fn fit_cover(source: (u32, u32), viewport: Viewport) -> DisplayFit {
    if viewport.is_empty() || source.0 == 0 || source.1 == 0 {
        return DisplayFit::identity(viewport);
    }

    let (vw, vh) = (viewport.width as f32, viewport.height as f32);
    let source_aspect = source.0 as f32 / source.1 as f32;
    let screen_aspect = vw / vh;

    let (width, height) = if screen_aspect < source_aspect {
        // Screen is narrower than the video: match heights, crop the sides
        (vh * source_aspect, vh)
    } else {
        (vw, vw / source_aspect)
    };

    DisplayFit {
        width,
        height,
        scale_x: width / vw,
        scale_y: height / vh,
    }
}
