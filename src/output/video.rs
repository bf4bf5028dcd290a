//! Annotated video writers.
//!
//! - `ffmpeg`: raw RGB24 piped into an `ffmpeg` child process (H.264 MP4)
//! - `libav`: in-process H.264 MP4 encode (feature: video-ffmpeg)
//! - `y4m`: uncompressed YUV4MPEG2, no external tooling

use anyhow::{anyhow, bail, Context, Result};
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::str::FromStr;

use crate::frame::Frame;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VideoWriterKind {
    #[default]
    Ffmpeg,
    Libav,
    Y4m,
}

impl VideoWriterKind {
    /// File extension (without dot) of videos this writer produces.
    pub fn extension(&self) -> &'static str {
        match self {
            VideoWriterKind::Ffmpeg | VideoWriterKind::Libav => "mp4",
            VideoWriterKind::Y4m => "y4m",
        }
    }
}

impl FromStr for VideoWriterKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ffmpeg" => Ok(VideoWriterKind::Ffmpeg),
            "libav" => Ok(VideoWriterKind::Libav),
            "y4m" => Ok(VideoWriterKind::Y4m),
            other => Err(anyhow!(
                "unknown video writer '{}' (expected ffmpeg, libav or y4m)",
                other
            )),
        }
    }
}

impl fmt::Display for VideoWriterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VideoWriterKind::Ffmpeg => "ffmpeg",
            VideoWriterKind::Libav => "libav",
            VideoWriterKind::Y4m => "y4m",
        };
        f.write_str(name)
    }
}

/// Encode `frames` (in order) to `path`. Frames are converted to RGB if needed.
pub fn frames_to_video(frames: &[Frame], path: &Path, kind: VideoWriterKind, fps: f64) -> Result<()> {
    let (width, height) = check_frames(frames)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating video directory {}", parent.display()))?;
    }
    let fps = if fps.is_finite() && fps > 0.0 {
        fps
    } else {
        crate::ingest::DEFAULT_FPS
    };
    match kind {
        VideoWriterKind::Ffmpeg => write_ffmpeg_cli(frames, path, width, height, fps),
        VideoWriterKind::Y4m => write_y4m(frames, path, width, height, fps),
        #[cfg(feature = "video-ffmpeg")]
        VideoWriterKind::Libav => super::video_libav::write_libav(frames, path, width, height, fps),
        #[cfg(not(feature = "video-ffmpeg"))]
        VideoWriterKind::Libav => bail!("the libav video writer requires the video-ffmpeg feature"),
    }
}

fn check_frames(frames: &[Frame]) -> Result<(u32, u32)> {
    let first = frames
        .first()
        .ok_or_else(|| anyhow!("cannot encode a video without frames"))?;
    let (width, height) = (first.width, first.height);
    if width == 0 || height == 0 {
        bail!("cannot encode {}x{} frames", width, height);
    }
    if let Some((index, frame)) = frames
        .iter()
        .enumerate()
        .find(|(_, frame)| frame.width != width || frame.height != height)
    {
        bail!(
            "frame {} is {}x{}, expected {}x{}",
            index,
            frame.width,
            frame.height,
            width,
            height
        );
    }
    Ok((width, height))
}

fn write_ffmpeg_cli(frames: &[Frame], path: &Path, width: u32, height: u32, fps: f64) -> Result<()> {
    let mut child = Command::new("ffmpeg")
        .args(["-y", "-loglevel", "error", "-f", "rawvideo", "-pix_fmt", "rgb24"])
        .arg("-s")
        .arg(format!("{}x{}", width, height))
        .arg("-r")
        .arg(format!("{:.3}", fps))
        .args(["-i", "-", "-an", "-c:v", "libx264", "-pix_fmt", "yuv420p"])
        .args(["-vf", "pad=ceil(iw/2)*2:ceil(ih/2)*2"])
        .arg(path)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .context("failed to start ffmpeg (is it installed and in PATH?)")?;

    let write_result = {
        let stdin = child
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow!("ffmpeg stdin unavailable"))?;
        frames
            .iter()
            .try_for_each(|frame| stdin.write_all(&frame.rgb_pixels()))
    };
    // Close stdin so ffmpeg sees end of input.
    drop(child.stdin.take());

    let output = child.wait_with_output().context("waiting for ffmpeg")?;
    if !output.status.success() {
        bail!(
            "ffmpeg failed writing {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    write_result.with_context(|| format!("piping frames to ffmpeg for {}", path.display()))?;
    Ok(())
}

fn write_y4m(frames: &[Frame], path: &Path, width: u32, height: u32, fps: f64) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut out = BufWriter::new(file);
    let (num, den) = fps_ratio(fps);
    writeln!(out, "YUV4MPEG2 W{} H{} F{}:{} Ip A1:1 C444", width, height, num, den)?;

    let plane = width as usize * height as usize;
    let mut yuv = vec![0u8; plane * 3];
    for frame in frames {
        let rgb = frame.rgb_pixels();
        for (i, px) in rgb.chunks_exact(3).enumerate() {
            let [y, u, v] = rgb_to_yuv(px[0], px[1], px[2]);
            yuv[i] = y;
            yuv[plane + i] = u;
            yuv[2 * plane + i] = v;
        }
        out.write_all(b"FRAME\n")?;
        out.write_all(&yuv)?;
    }
    out.flush()
        .with_context(|| format!("flushing {}", path.display()))?;
    Ok(())
}

/// BT.601 full-range RGB -> YCbCr.
fn rgb_to_yuv(r: u8, g: u8, b: u8) -> [u8; 3] {
    let (r, g, b) = (r as f32, g as f32, b as f32);
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let u = -0.168_736 * r - 0.331_264 * g + 0.5 * b + 128.0;
    let v = 0.5 * r - 0.418_688 * g - 0.081_312 * b + 128.0;
    [
        y.round().clamp(0.0, 255.0) as u8,
        u.round().clamp(0.0, 255.0) as u8,
        v.round().clamp(0.0, 255.0) as u8,
    ]
}

/// Frame rate as `numerator / denominator`, exact to a thousandth.
pub(super) fn fps_ratio(fps: f64) -> (u64, u64) {
    let rounded = fps.round();
    if (fps - rounded).abs() < 1e-3 {
        (rounded as u64, 1)
    } else {
        ((fps * 1000.0).round() as u64, 1000)
    }
}

/// Count `FRAME` markers in a YUV4MPEG2 stream.
pub fn count_y4m_frames(path: &Path) -> Result<usize> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let header_end = bytes
        .iter()
        .position(|b| *b == b'\n')
        .ok_or_else(|| anyhow!("{} has no y4m header", path.display()))?;
    let header = std::str::from_utf8(&bytes[..header_end])?;
    let mut width = 0usize;
    let mut height = 0usize;
    for token in header.split_whitespace() {
        if let Some(w) = token.strip_prefix('W') {
            width = w.parse()?;
        } else if let Some(h) = token.strip_prefix('H') {
            height = h.parse()?;
        }
    }
    let frame_bytes = width * height * 3;
    let mut offset = header_end + 1;
    let mut count = 0;
    while offset < bytes.len() {
        if !bytes[offset..].starts_with(b"FRAME\n") {
            bail!("{}: malformed frame header at byte {}", path.display(), offset);
        }
        offset += "FRAME\n".len() + frame_bytes;
        if offset > bytes.len() {
            bail!("{}: truncated frame {}", path.display(), count);
        }
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ChannelOrder;

    #[test]
    fn parses_writer_names() {
        assert_eq!("FFmpeg".parse::<VideoWriterKind>().unwrap(), VideoWriterKind::Ffmpeg);
        assert_eq!("y4m".parse::<VideoWriterKind>().unwrap(), VideoWriterKind::Y4m);
        assert!("opencv".parse::<VideoWriterKind>().is_err());
        assert_eq!(VideoWriterKind::Libav.extension(), "mp4");
        assert_eq!(VideoWriterKind::Y4m.to_string(), "y4m");
    }

    #[test]
    fn y4m_keeps_every_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("clip.y4m");
        let frames: Vec<Frame> = (0..4u8)
            .map(|i| Frame::filled(6, 4, ChannelOrder::Rgb, [i * 40, 0, 0]))
            .collect();
        frames_to_video(&frames, &path, VideoWriterKind::Y4m, 25.0).unwrap();
        assert_eq!(count_y4m_frames(&path).unwrap(), 4);

        let header = std::fs::read(&path).unwrap();
        assert!(header.starts_with(b"YUV4MPEG2 W6 H4 F25:1 "));
    }

    #[test]
    fn rejects_empty_and_mixed_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.y4m");
        assert!(frames_to_video(&[], &path, VideoWriterKind::Y4m, 30.0).is_err());

        let frames = vec![
            Frame::filled(4, 4, ChannelOrder::Rgb, [0, 0, 0]),
            Frame::filled(2, 2, ChannelOrder::Rgb, [0, 0, 0]),
        ];
        let err = frames_to_video(&frames, &path, VideoWriterKind::Y4m, 30.0).unwrap_err();
        assert!(err.to_string().contains("frame 1 is 2x2"));
        assert!(!path.exists());
    }

    #[test]
    fn gray_maps_to_neutral_chroma() {
        assert_eq!(rgb_to_yuv(128, 128, 128), [128, 128, 128]);
        assert_eq!(fps_ratio(29.97), (29970, 1000));
    }
}
