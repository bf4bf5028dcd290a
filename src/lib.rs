//! Batch object detection over video trees.
//!
//! The crate applies a pretrained detector to every video under a dataset
//! directory and writes one JSON document of per-frame detections per video,
//! optionally with an annotated re-encode.
//!
//! # Module Structure
//!
//! - `config`: settings file + env + inline overrides → frozen `RunConfig`, `DetectorConfig`
//! - `detect`: backends, post-processing, the `Predictor` wrapper and its worker pool
//! - `ingest`: capture sources (FFmpeg file decode, synthetic clips)
//! - `batch`: enumeration, resume guard, per-video loop
//! - `output`: detections JSON and annotated video writers
//! - `ui`: progress bars and the confirmation prompt

pub mod batch;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod output;
pub mod ui;

pub use batch::{
    consume_video, enumerate_videos, is_complete, process_video, run_batch, BatchSummary,
    VideoJob, VideoOutcome, VideoState,
};
pub use config::{DetectorConfig, RunConfig};
pub use detect::{
    BackendRegistry, BoundingBox, DetectorBackend, Instance, Predictions, Predictor, Proposal,
    StubBackend,
};
pub use frame::{ChannelOrder, Frame};
pub use ingest::{CaptureOpener, FileOpener, FileSource, SyntheticOpener, SyntheticSource, VideoCapture};
pub use output::{
    frames_to_video, read_detections, write_detections, DetectionMap, InstanceRecord,
    VideoWriterKind,
};
pub use ui::{BatchProgress, Ui};
