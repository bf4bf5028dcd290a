//! Local file frame source.
//!
//! `FileSource` decodes a local video file into BGR frames. Decoding is backed
//! by FFmpeg and requires the `ingest-file-ffmpeg` feature; without it, opening
//! a file is an error.

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::{CaptureOpener, VideoCapture};
use crate::frame::Frame;

/// Configuration for a local file source.
#[derive(Clone, Debug, Default)]
pub struct FileConfig {
    /// Local file path (e.g., "data/kinetics/walk/walk_01.mp4").
    pub path: PathBuf,
}

/// Local file frame source.
pub struct FileSource {
    backend: FileBackend,
}

enum FileBackend {
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
    #[cfg(not(feature = "ingest-file-ffmpeg"))]
    #[allow(dead_code)]
    Unavailable(std::convert::Infallible),
}

impl FileSource {
    pub fn new(config: FileConfig) -> Result<Self> {
        if !is_local_file_path(&config.path) {
            return Err(anyhow!(
                "file ingestion only supports local paths (no URL schemes)"
            ));
        }
        #[cfg(feature = "ingest-file-ffmpeg")]
        {
            Ok(Self {
                backend: FileBackend::Ffmpeg(FfmpegFileSource::new(config)?),
            })
        }
        #[cfg(not(feature = "ingest-file-ffmpeg"))]
        {
            Err(anyhow!(
                "decoding {} requires the ingest-file-ffmpeg feature",
                config.path.display()
            ))
        }
    }
}

impl VideoCapture for FileSource {
    fn frame_count(&self) -> Option<u64> {
        match &self.backend {
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.frame_count(),
            #[cfg(not(feature = "ingest-file-ffmpeg"))]
            FileBackend::Unavailable(never) => match *never {},
        }
    }

    fn fps(&self) -> f64 {
        match &self.backend {
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.fps(),
            #[cfg(not(feature = "ingest-file-ffmpeg"))]
            FileBackend::Unavailable(never) => match *never {},
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_frame(),
            #[cfg(not(feature = "ingest-file-ffmpeg"))]
            FileBackend::Unavailable(never) => match *never {},
        }
    }
}

/// Opens `FileSource`s; the default opener for batch runs.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileOpener;

impl CaptureOpener for FileOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn VideoCapture>> {
        let source = FileSource::new(FileConfig {
            path: path.to_path_buf(),
        })?;
        Ok(Box::new(source))
    }
}

fn is_local_file_path(path: &Path) -> bool {
    let text = path.to_string_lossy();
    if text.trim().is_empty() {
        return false;
    }
    !text.contains("://")
}
