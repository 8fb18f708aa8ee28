//! Error type shared by every layer of the AR session.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while setting up or running an AR session.
#[derive(Debug, Error)]
pub enum ArError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid camera parameters: {0}")]
    Calibration(String),

    #[error("invalid marker pattern: {0}")]
    Pattern(String),

    #[error("failed to decode frame {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("video source error: {0}")]
    VideoSource(String),

    #[error("gpu error: {0}")]
    Gpu(String),

    #[error("window error: {0}")]
    Window(String),

    #[error("session has already been initialized")]
    AlreadyInitialized,

    #[error("camera projection matrix is already set")]
    ProjectionLocked,

    #[error("{0} used before initialization completed")]
    NotInitialized(&'static str),
}

impl ArError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ArError>;
