//! Still image video source

use std::path::{Path, PathBuf};

use futures::future::{BoxFuture, FutureExt};

use super::{VideoFrame, VideoSource};
use crate::error::{ArError, Result};

/// Serves the same decoded image on every capture
pub struct ImageSource {
    path: Option<PathBuf>,
    frame: Option<VideoFrame>,
    ready: bool,
}

impl ImageSource {
    /// Source that decodes `path` when initialized
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            frame: None,
            ready: false,
        }
    }

    /// Source backed by an already decoded frame
    pub fn from_frame(frame: VideoFrame) -> Self {
        Self {
            path: None,
            frame: Some(frame),
            ready: false,
        }
    }

    fn load(&mut self) -> Result<()> {
        if let Some(path) = &self.path {
            let frame = decode_frame(path)?;
            log::info!(
                "Opened image source {} ({}x{})",
                path.display(),
                frame.width(),
                frame.height()
            );
            self.frame = Some(frame);
        }

        if self.frame.is_none() {
            return Err(ArError::VideoSource("image source has no frame".into()));
        }

        self.ready = true;
        Ok(())
    }
}

/// Decodes an image file into a frame
pub(crate) fn decode_frame(path: &Path) -> Result<VideoFrame> {
    let image = image::open(path).map_err(|source| ArError::Image {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(VideoFrame::from(image.to_rgba8()))
}

impl VideoSource for ImageSource {
    fn init(&mut self) -> BoxFuture<'_, Result<()>> {
        async move { self.load() }.boxed()
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn native_size(&self) -> Option<(u32, u32)> {
        if !self.ready {
            return None;
        }
        self.frame.as_ref().map(VideoFrame::size)
    }

    fn capture(&mut self) -> Option<&VideoFrame> {
        self.current()
    }

    fn current(&self) -> Option<&VideoFrame> {
        if self.ready {
            self.frame.as_ref()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_ready_until_initialized() {
        let mut source = ImageSource::from_frame(VideoFrame::filled(4, 3, [0, 0, 0, 255]));
        assert!(!source.is_ready());
        assert!(source.capture().is_none());
        assert_eq!(source.native_size(), None);

        pollster::block_on(source.init()).unwrap();
        assert!(source.is_ready());
        assert_eq!(source.native_size(), Some((4, 3)));
        assert_eq!(source.capture().map(VideoFrame::size), Some((4, 3)));
    }

    #[test]
    fn test_missing_file_fails_init() {
        let mut source = ImageSource::open("does/not/exist.png");
        let result = pollster::block_on(source.init());
        assert!(matches!(result, Err(ArError::Image { .. })));
        assert!(!source.is_ready());
    }
}
