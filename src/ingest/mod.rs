//! Video capture sources.
//!
//! This module provides sources of decoded frames for the batch loop:
//! - Local video files (feature: ingest-file-ffmpeg)
//! - Synthetic clips (tests, `--synthetic` dry runs)
//!
//! A capture handle is single-pass: once `next_frame` returns `Ok(None)` the
//! handle is exhausted and a new one must be opened.

use anyhow::Result;
use std::path::Path;

use crate::frame::Frame;

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
pub mod synthetic;

pub use file::{FileConfig, FileOpener, FileSource};
pub use synthetic::{SyntheticOpener, SyntheticSource};

/// Frame rate assumed when a container does not report one.
pub const DEFAULT_FPS: f64 = 30.0;

/// An open video, yielding frames in presentation order.
pub trait VideoCapture {
    /// Total frame count as reported by the container, if known.
    fn frame_count(&self) -> Option<u64>;

    /// Nominal frames per second.
    fn fps(&self) -> f64;

    /// Decode the next frame; `Ok(None)` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

/// Opens a fresh capture handle for a path.
pub trait CaptureOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn VideoCapture>>;
}
