//! Per-video outputs: the detections document and the optional annotated video.

mod json;
mod video;
#[cfg(feature = "video-ffmpeg")]
mod video_libav;

pub use json::{read_detections, records_for, write_detections, DetectionMap, InstanceRecord};
pub use video::{count_y4m_frames, frames_to_video, VideoWriterKind};
