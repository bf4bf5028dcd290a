//! In-process H.264 encoding through FFmpeg's libraries.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg::util::error::EAGAIN;
use ffmpeg::util::format::pixel::Pixel;
use ffmpeg::Rational;
use std::path::Path;

use crate::frame::Frame;

/// Exact stream rate; the time base is its inverse, so one tick is one frame.
fn frame_rate(fps: f64) -> Rational {
    let (num, den) = super::video::fps_ratio(fps);
    Rational::new(num as i32, den as i32)
}

pub(crate) fn write_libav(
    frames: &[Frame],
    path: &Path,
    width: u32,
    height: u32,
    fps: f64,
) -> Result<()> {
    ffmpeg::init().context("initialize ffmpeg")?;

    // yuv420p needs even dimensions; the odd edge row/column is dropped.
    let out_width = width & !1;
    let out_height = height & !1;
    if out_width == 0 || out_height == 0 {
        return Err(anyhow!("frames of {}x{} are too small to encode", width, height));
    }
    let frame_rate = frame_rate(fps);
    let time_base = frame_rate.invert();

    let mut octx = ffmpeg::format::output(&path)
        .with_context(|| format!("creating output container {}", path.display()))?;
    let global_header = octx
        .format()
        .flags()
        .contains(ffmpeg::format::Flags::GLOBAL_HEADER);
    let codec = ffmpeg::encoder::find(ffmpeg::codec::Id::H264)
        .ok_or_else(|| anyhow!("no H.264 encoder available in this ffmpeg build"))?;

    let mut stream = octx.add_stream(codec).context("adding video stream")?;
    let stream_index = stream.index();

    let mut encoder = ffmpeg::codec::context::Context::new_with_codec(codec)
        .encoder()
        .video()
        .context("creating video encoder")?;
    encoder.set_width(out_width);
    encoder.set_height(out_height);
    encoder.set_format(Pixel::YUV420P);
    encoder.set_time_base(time_base);
    encoder.set_frame_rate(Some(frame_rate));
    if global_header {
        encoder.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
    }
    let mut encoder = encoder.open_as(codec).context("opening H.264 encoder")?;
    stream.set_parameters(&encoder);

    octx.write_header().context("writing container header")?;
    let stream_time_base = octx
        .stream(stream_index)
        .ok_or_else(|| anyhow!("output stream disappeared"))?
        .time_base();

    let mut scaler = ffmpeg::software::scaling::Context::get(
        Pixel::RGB24,
        width,
        height,
        Pixel::YUV420P,
        out_width,
        out_height,
        ffmpeg::software::scaling::Flags::BILINEAR,
    )
    .context("create ffmpeg scaler")?;

    let row_bytes = width as usize * 3;
    for (index, frame) in frames.iter().enumerate() {
        let rgb = frame.rgb_pixels();
        let mut rgb_frame = ffmpeg::frame::Video::new(Pixel::RGB24, width, height);
        let stride = rgb_frame.stride(0);
        let data = rgb_frame.data_mut(0);
        for (row, src) in rgb.chunks_exact(row_bytes).enumerate() {
            let start = row * stride;
            data[start..start + row_bytes].copy_from_slice(src);
        }

        let mut yuv_frame = ffmpeg::frame::Video::empty();
        scaler
            .run(&rgb_frame, &mut yuv_frame)
            .context("scale frame to yuv420p")?;
        yuv_frame.set_pts(Some(index as i64));

        encoder
            .send_frame(&yuv_frame)
            .context("send frame to encoder")?;
        drain_packets(&mut encoder, &mut octx, stream_index, time_base, stream_time_base)?;
    }

    encoder.send_eof().context("flush encoder")?;
    drain_packets(&mut encoder, &mut octx, stream_index, time_base, stream_time_base)?;
    octx.write_trailer().context("writing container trailer")?;
    Ok(())
}

fn drain_packets(
    encoder: &mut ffmpeg::encoder::Video,
    octx: &mut ffmpeg::format::context::Output,
    stream_index: usize,
    encoder_time_base: Rational,
    stream_time_base: Rational,
) -> Result<()> {
    let mut packet = ffmpeg::Packet::empty();
    loop {
        match encoder.receive_packet(&mut packet) {
            Ok(()) => {
                packet.set_stream(stream_index);
                packet.rescale_ts(encoder_time_base, stream_time_base);
                packet
                    .write_interleaved(octx)
                    .context("write encoded packet")?;
            }
            Err(ffmpeg::Error::Eof) => return Ok(()),
            Err(ffmpeg::Error::Other { errno }) if errno == EAGAIN => return Ok(()),
            Err(e) => return Err(e).context("receive packet from encoder"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fractional_rates_keep_their_time_base() {
        let ntsc = frame_rate(29.97);
        assert_eq!((ntsc.numerator(), ntsc.denominator()), (29970, 1000));
        let tick = ntsc.invert();
        assert_eq!((tick.numerator(), tick.denominator()), (1000, 29970));

        let pal = frame_rate(25.0);
        assert_eq!((pal.numerator(), pal.denominator()), (25, 1));
    }
}
