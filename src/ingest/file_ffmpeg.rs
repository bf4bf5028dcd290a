//! Local file frame source using FFmpeg.
//!
//! Decodes the best video stream of a local file into packed BGR24 frames,
//! draining the decoder at end of stream so no trailing frames are lost.

use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg::util::error::EAGAIN;

use super::file::FileConfig;
use super::DEFAULT_FPS;
use crate::frame::{ChannelOrder, Frame};

pub(crate) struct FfmpegFileSource {
    config: FileConfig,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    frame_count: Option<u64>,
    fps: f64,
    frames_decoded: u64,
    eof_sent: bool,
}

impl FfmpegFileSource {
    pub(crate) fn new(config: FileConfig) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&config.path).with_context(|| {
            format!(
                "failed to open file input '{}' with ffmpeg",
                config.path.display()
            )
        })?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow::anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let frame_count = u64::try_from(input_stream.frames())
            .ok()
            .filter(|frames| *frames > 0);
        let rate = input_stream.avg_frame_rate();
        let fps = if rate.numerator() > 0 && rate.denominator() > 0 {
            f64::from(rate)
        } else {
            DEFAULT_FPS
        };
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::BGR24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        log::debug!(
            "FileSource: opened {} (ffmpeg, frames={:?}, fps={:.2})",
            config.path.display(),
            frame_count,
            fps
        );

        Ok(Self {
            config,
            input,
            stream_index,
            decoder,
            scaler,
            frame_count,
            fps,
            frames_decoded: 0,
            eof_sent: false,
        })
    }

    pub(crate) fn frame_count(&self) -> Option<u64> {
        self.frame_count
    }

    pub(crate) fn fps(&self) -> f64 {
        self.fps
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => {
                    let mut bgr_frame = ffmpeg::frame::Video::empty();
                    self.scaler
                        .run(&decoded, &mut bgr_frame)
                        .context("scale frame to BGR")?;
                    let (pixels, width, height) = frame_to_pixels(&bgr_frame)?;
                    self.frames_decoded += 1;
                    return Frame::new(pixels, width, height, ChannelOrder::Bgr).map(Some);
                }
                // Needs more input, or fully drained after EOF.
                Err(ffmpeg::Error::Other { errno }) if errno == EAGAIN => {}
                Err(ffmpeg::Error::Eof) => {}
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!(
                            "decoding frame {} of {}",
                            self.frames_decoded,
                            self.config.path.display()
                        )
                    })
                }
            }
            if self.eof_sent {
                log::debug!(
                    "{}: decoded {} frames",
                    self.config.path.display(),
                    self.frames_decoded
                );
                return Ok(None);
            }

            let mut next_packet = None;
            for (stream, packet) in self.input.packets() {
                if stream.index() == self.stream_index {
                    next_packet = Some(packet);
                    break;
                }
            }

            match next_packet {
                Some(packet) => self
                    .decoder
                    .send_packet(&packet)
                    .context("send packet to ffmpeg decoder")?,
                None => {
                    self.decoder
                        .send_eof()
                        .context("flush ffmpeg decoder")?;
                    self.eof_sent = true;
                }
            }
        }
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        return Ok((data[..row_bytes * height as usize].to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
