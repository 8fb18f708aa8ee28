//! Live camera video source
//!
//! [`WebcamSource`] pulls frames from a [`FrameGrabber`]. With the `webcam`
//! feature enabled, [`WebcamSource::open_device`] grabs from a system camera
//! through `nokhwa`.

use futures::future::{BoxFuture, FutureExt};

use super::{VideoFrame, VideoSource};
use crate::error::Result;

/// Device side of a camera: opens a stream and decodes frames from it
pub trait FrameGrabber {
    fn open(&mut self) -> Result<()>;

    /// Blocks until the next frame is decoded
    fn grab(&mut self) -> Result<VideoFrame>;
}

/// Camera feed, ready once the first frame has been decoded
///
/// The native size is the size of the latest frame, so a camera that
/// renegotiates its resolution after opening is picked up on the next capture.
pub struct WebcamSource {
    grabber: Box<dyn FrameGrabber>,
    frame: Option<VideoFrame>,
    ready: bool,
}

impl WebcamSource {
    pub fn new(grabber: Box<dyn FrameGrabber>) -> Self {
        Self {
            grabber,
            frame: None,
            ready: false,
        }
    }

    /// Source reading from the system camera at `index`
    #[cfg(feature = "webcam")]
    pub fn open_device(index: u32) -> Self {
        Self::new(Box::new(DeviceGrabber::new(index)))
    }

    fn start(&mut self) -> Result<()> {
        self.grabber.open()?;
        let frame = self.grabber.grab()?;
        log::info!("Opened webcam ({}x{})", frame.width(), frame.height());
        self.frame = Some(frame);
        self.ready = true;
        Ok(())
    }
}

impl VideoSource for WebcamSource {
    fn init(&mut self) -> BoxFuture<'_, Result<()>> {
        // Camera handles are not Send, so the device work happens before the future
        let started = self.start();
        async move { started }.boxed()
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
        if !self.ready {
            return None;
        }
        match self.grabber.grab() {
            Ok(frame) => self.frame = Some(frame),
            Err(e) => log::warn!("Dropped webcam frame: {}", e),
        }
        self.frame.as_ref()
    }

    fn current(&self) -> Option<&VideoFrame> {
        if self.ready {
            self.frame.as_ref()
        } else {
            None
        }
    }
}

#[cfg(feature = "webcam")]
pub use device::DeviceGrabber;

#[cfg(feature = "webcam")]
mod device {
    use nokhwa::pixel_format::RgbAFormat;
    use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
    use nokhwa::Camera;

    use super::FrameGrabber;
    use crate::error::{ArError, Result};
    use crate::video::VideoFrame;

    /// System camera opened at its highest resolution
    pub struct DeviceGrabber {
        index: u32,
        camera: Option<Camera>,
    }

    impl DeviceGrabber {
        pub fn new(index: u32) -> Self {
            Self {
                index,
                camera: None,
            }
        }
    }

    fn device_error(e: nokhwa::NokhwaError) -> ArError {
        ArError::VideoSource(format!("webcam: {}", e))
    }

    impl FrameGrabber for DeviceGrabber {
        fn open(&mut self) -> Result<()> {
            let requested =
                RequestedFormat::new::<RgbAFormat>(RequestedFormatType::AbsoluteHighestResolution);
            let mut camera =
                Camera::new(CameraIndex::Index(self.index), requested).map_err(device_error)?;
            camera.open_stream().map_err(device_error)?;
            log::debug!("Webcam {} stream open: {:?}", self.index, camera.camera_format());
            self.camera = Some(camera);
            Ok(())
        }

        fn grab(&mut self) -> Result<VideoFrame> {
            let camera = self
                .camera
                .as_mut()
                .ok_or(ArError::NotInitialized("webcam"))?;
            let buffer = camera.frame().map_err(device_error)?;
            let image = buffer.decode_image::<RgbAFormat>().map_err(device_error)?;
            VideoFrame::new(image.width(), image.height(), image.into_raw())
        }
    }
}

/// Stand-in grabber that yields frames from a closure, used by tests
#[cfg(test)]
pub(crate) struct ScriptedGrabber<F: FnMut() -> Result<VideoFrame>> {
    pub opened: bool,
    pub next: F,
}

#[cfg(test)]
impl<F: FnMut() -> Result<VideoFrame>> FrameGrabber for ScriptedGrabber<F> {
    fn open(&mut self) -> Result<()> {
        self.opened = true;
        Ok(())
    }

    fn grab(&mut self) -> Result<VideoFrame> {
        if !self.opened {
            return Err(crate::error::ArError::NotInitialized("scripted grabber"));
        }
        (self.next)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ArError;

    fn scripted<F: FnMut() -> Result<VideoFrame> + 'static>(next: F) -> WebcamSource {
        WebcamSource::new(Box::new(ScriptedGrabber {
            opened: false,
            next,
        }))
    }

    #[test]
    fn test_ready_after_first_frame() {
        let mut source = scripted(|| Ok(VideoFrame::filled(8, 6, [10, 20, 30, 255])));
        assert!(!source.is_ready());
        assert_eq!(source.native_size(), None);
        assert!(source.capture().is_none());

        pollster::block_on(source.init()).unwrap();
        assert!(source.is_ready());
        assert_eq!(source.native_size(), Some((8, 6)));
        assert_eq!(source.current().map(|f| f.pixel(0, 0)), Some([10, 20, 30, 255]));
    }

    #[test]
    fn test_native_size_follows_latest_frame() {
        let mut width = 4;
        let mut source = scripted(move || {
            width *= 2;
            Ok(VideoFrame::filled(width, 4, [0, 0, 0, 255]))
        });
        pollster::block_on(source.init()).unwrap();
        assert_eq!(source.native_size(), Some((8, 4)));

        assert_eq!(source.capture().map(VideoFrame::size), Some((16, 4)));
        assert_eq!(source.native_size(), Some((16, 4)));
    }

    #[test]
    fn test_failed_grab_keeps_last_frame() {
        let mut calls = 0;
        let mut source = scripted(move || {
            calls += 1;
            if calls == 1 {
                Ok(VideoFrame::filled(4, 4, [1, 2, 3, 255]))
            } else {
                Err(ArError::VideoSource("device unplugged".into()))
            }
        });
        pollster::block_on(source.init()).unwrap();

        assert_eq!(source.capture().map(VideoFrame::size), Some((4, 4)));
        assert_eq!(source.native_size(), Some((4, 4)));
    }

    #[test]
    fn test_no_first_frame_fails_init() {
        let mut source = scripted(|| Err(ArError::VideoSource("no signal".into())));
        let result = pollster::block_on(source.init());
        assert!(matches!(result, Err(ArError::VideoSource(_))));
        assert!(!source.is_ready());
        assert!(source.current().is_none());
    }
}
