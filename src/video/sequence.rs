//! Looping image-sequence video source
//!
//! Plays back a directory of frames in file name order, one frame per
//! capture, wrapping around at the end.

use std::path::{Path, PathBuf};

use futures::future::{BoxFuture, FutureExt};

use super::{image_source::decode_frame, VideoFrame, VideoSource};
use crate::error::{ArError, Result};

const FRAME_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

pub struct ImageSequenceSource {
    directory: Option<PathBuf>,
    frames: Vec<VideoFrame>,
    cursor: Option<usize>,
    ready: bool,
}

impl ImageSequenceSource {
    /// Source that loads every image in `directory` when initialized
    pub fn open_dir(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: Some(directory.into()),
            frames: Vec::new(),
            cursor: None,
            ready: false,
        }
    }

    /// Source backed by frames already in memory
    pub fn from_frames(frames: Vec<VideoFrame>) -> Self {
        Self {
            directory: None,
            frames,
            cursor: None,
            ready: false,
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

fn list_frames(directory: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(directory).map_err(|e| ArError::io(directory, e))?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| ArError::io(directory, e))?.path();
        let is_frame = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if is_frame {
            paths.push(path);
        }
    }

    paths.sort();
    Ok(paths)
}

impl ImageSequenceSource {
    fn load(&mut self) -> Result<()> {
        if let Some(directory) = &self.directory {
            let paths = list_frames(directory)?;
            let mut frames = Vec::with_capacity(paths.len());
            for path in &paths {
                frames.push(decode_frame(path)?);
            }
            log::info!(
                "Loaded {} frames from {}",
                frames.len(),
                directory.display()
            );
            self.frames = frames;
        }

        let Some(first) = self.frames.first() else {
            return Err(ArError::VideoSource("image sequence has no frames".into()));
        };

        let size = first.size();
        if let Some(index) = self.frames.iter().position(|f| f.size() != size) {
            return Err(ArError::VideoSource(format!(
                "frame {} is {:?}, expected {:?}",
                index,
                self.frames[index].size(),
                size
            )));
        }

        self.cursor = None;
        self.ready = true;
        Ok(())
    }
}

impl VideoSource for ImageSequenceSource {
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
        self.frames.first().map(VideoFrame::size)
    }

    fn capture(&mut self) -> Option<&VideoFrame> {
        if !self.ready {
            return None;
        }

        let next = match self.cursor {
            Some(i) => (i + 1) % self.frames.len(),
            None => 0,
        };
        self.cursor = Some(next);
        self.frames.get(next)
    }

    fn current(&self) -> Option<&VideoFrame> {
        if !self.ready {
            return None;
        }
        self.cursor.and_then(|i| self.frames.get(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shade(value: u8) -> VideoFrame {
        VideoFrame::filled(2, 2, [value, value, value, 255])
    }

    #[test]
    fn test_capture_loops_through_frames() {
        let mut source = ImageSequenceSource::from_frames(vec![shade(1), shade(2), shade(3)]);
        pollster::block_on(source.init()).unwrap();

        let seen: Vec<u8> = (0..5)
            .map(|_| source.capture().unwrap().pixel(0, 0)[0])
            .collect();
        assert_eq!(seen, vec![1, 2, 3, 1, 2]);
        assert_eq!(source.current().unwrap().pixel(0, 0)[0], 2);
    }

    #[test]
    fn test_mismatched_frame_sizes_fail_init() {
        let mut source = ImageSequenceSource::from_frames(vec![
            shade(1),
            VideoFrame::filled(3, 2, [0, 0, 0, 255]),
        ]);
        assert!(pollster::block_on(source.init()).is_err());
        assert!(!source.is_ready());
    }

    #[test]
    fn test_empty_sequence_fails_init() {
        let mut source = ImageSequenceSource::from_frames(Vec::new());
        assert!(matches!(
            pollster::block_on(source.init()),
            Err(ArError::VideoSource(_))
        ));
    }
}
