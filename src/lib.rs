// src/lib.rs
//! arcube
//!
//! A marker-based augmented reality demo on wgpu and winit: a cube anchored
//! to a printed pattern marker, drawn over a video feed.

pub mod app;
pub mod config;
pub mod error;
pub mod gfx;
pub mod session;
pub mod tracking;
pub mod video;
pub mod wgpu_utils;

// Re-export main types for convenience
pub use app::ArApp;
pub use config::{LossPolicy, SessionConfig};
pub use error::{ArError, Result};
pub use session::{ArSession, SessionState};
