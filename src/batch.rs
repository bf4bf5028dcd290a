//! The batch loop: enumerate videos, skip finished ones, detect, write.
//!
//! Videos are processed one at a time. Each video goes
//! `Pending -> Skipped` or `Pending -> Processing -> Written`; any error stops
//! the whole run and leaves that video without an output document.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::RunConfig;
use crate::detect::Predictor;
use crate::frame::Frame;
use crate::ingest::{CaptureOpener, VideoCapture};
use crate::output::{frames_to_video, records_for, write_detections, DetectionMap};
use crate::ui::BatchProgress;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VideoState {
    Pending,
    Skipped,
    Processing,
    Written,
}

/// Input and output locations for one video.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoJob {
    pub input: PathBuf,
    /// Parent directory name of the input.
    pub action: String,
    pub json_out: PathBuf,
    pub video_out: PathBuf,
}

impl VideoJob {
    pub fn new(cfg: &RunConfig, input: &Path) -> Result<Self> {
        let action = input
            .parent()
            .and_then(|parent| parent.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = input
            .file_stem()
            .ok_or_else(|| anyhow!("{} has no file name", input.display()))?
            .to_string_lossy()
            .into_owned();
        Ok(Self {
            input: input.to_path_buf(),
            json_out: cfg.json_out_dir.join(&action).join(format!("{}.json", stem)),
            video_out: cfg
                .video_out_dir
                .join(&action)
                .join(format!("{}.{}", stem, cfg.writer.extension())),
            action,
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub processed: usize,
    pub skipped: usize,
}

/// Everything gathered from one pass over a video.
#[derive(Debug, Default)]
pub struct VideoOutcome {
    pub detections: DetectionMap,
    /// Annotated RGB frames; empty unless video generation was requested.
    pub frames: Vec<Frame>,
    pub fps: f64,
}

/// Recursively list files under `root` whose name ends with `ext`, sorted.
///
/// Symlinks are followed. The suffix match is case-sensitive.
pub fn enumerate_videos(root: &Path, ext: &str) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
        let entry = entry.with_context(|| format!("listing {}", root.display()))?;
        if entry.file_type().is_file() && entry.file_name().to_string_lossy().ends_with(ext) {
            found.push(entry.into_path());
        }
    }
    found.sort();
    Ok(found)
}

/// Resume guard: an existing, non-empty output counts as done.
pub fn is_complete(json_out: &Path) -> bool {
    std::fs::metadata(json_out)
        .map(|meta| meta.len() > 0)
        .unwrap_or(false)
}

/// Run the predictor over one capture, collecting detections per frame index.
pub fn consume_video(
    predictor: &mut Predictor,
    capture: &mut dyn VideoCapture,
    generate_video: bool,
    progress: &BatchProgress,
) -> Result<VideoOutcome> {
    let n_frames = capture.frame_count();
    let fps = capture.fps();
    let mut outcome = VideoOutcome {
        fps,
        ..VideoOutcome::default()
    };

    for (index, item) in predictor.run_on_video(capture)?.enumerate() {
        let (viz, predictions) = item?;
        progress.set_frame(index as u64, n_frames);
        if generate_video {
            outcome.frames.push(viz.into_rgb());
        }
        outcome
            .detections
            .insert(index as u64, records_for(&predictions));
    }
    Ok(outcome)
}

/// Process one video end to end, honouring the resume guard.
pub fn process_video(
    cfg: &RunConfig,
    job: &VideoJob,
    predictor: &mut Predictor,
    opener: &dyn CaptureOpener,
    progress: &BatchProgress,
) -> Result<VideoState> {
    if is_complete(&job.json_out) {
        log::debug!("skip {} (output exists)", job.input.display());
        return Ok(VideoState::Skipped);
    }

    progress.status(job, VideoState::Processing);
    let outcome = {
        let mut capture = opener
            .open(&job.input)
            .with_context(|| format!("opening {}", job.input.display()))?;
        consume_video(predictor, capture.as_mut(), cfg.generate_videos, progress)
            .with_context(|| format!("detecting on {}", job.input.display()))?
    };

    // The JSON is the resume marker, so it goes last.
    if cfg.generate_videos {
        if outcome.frames.is_empty() {
            log::warn!("{} decoded no frames; no video written", job.input.display());
        } else {
            frames_to_video(&outcome.frames, &job.video_out, cfg.writer, outcome.fps)
                .with_context(|| format!("writing {}", job.video_out.display()))?;
        }
    }

    write_detections(&job.json_out, &outcome.detections)?;
    Ok(VideoState::Written)
}

/// Process every matching video under the configured input directory.
pub fn run_batch(
    cfg: &RunConfig,
    predictor: &mut Predictor,
    opener: &dyn CaptureOpener,
    progress: &mut BatchProgress,
) -> Result<BatchSummary> {
    let files = enumerate_videos(&cfg.video_in_dir, &cfg.video_ext)?;
    let mut summary = BatchSummary {
        total: files.len(),
        ..BatchSummary::default()
    };
    progress.set_total(files.len() as u64);
    log::info!(
        "found {} '{}' videos under {}",
        files.len(),
        cfg.video_ext,
        cfg.video_in_dir.display()
    );

    for input in &files {
        let job = VideoJob::new(cfg, input)?;
        let state = process_video(cfg, &job, predictor, opener, progress)?;
        match state {
            VideoState::Skipped => summary.skipped += 1,
            VideoState::Written => summary.processed += 1,
            VideoState::Pending | VideoState::Processing => {}
        }
        progress.advance(&job, state);
    }
    progress.finish();
    Ok(summary)
}
