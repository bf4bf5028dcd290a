//! Decoded video frames.
//!
//! - `Frame`: packed 8-bit, 3-channel pixels plus dimensions and channel order.
//! - `ChannelOrder`: decoders hand out BGR (the capture convention), encoders
//!   consume RGB. `Frame::into_rgb` is the only conversion point.

use anyhow::{anyhow, Result};

/// Byte order of the three colour channels in a packed pixel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelOrder {
    Bgr,
    Rgb,
}

/// Packed 24-bit frame. Rows are tightly packed (`stride == width * 3`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub order: ChannelOrder,
}

impl Frame {
    /// Wrap packed pixels. Fails when the buffer does not match `width * height * 3`.
    pub fn new(data: Vec<u8>, width: u32, height: u32, order: ChannelOrder) -> Result<Self> {
        let expected_len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected_len {
            return Err(anyhow!(
                "expected {} bytes for a {}x{} frame, received {}",
                expected_len,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            order,
        })
    }

    /// Solid-colour frame, mostly useful for fixtures.
    pub fn filled(width: u32, height: u32, order: ChannelOrder, pixel: [u8; 3]) -> Self {
        let len = width as usize * height as usize;
        let mut data = Vec::with_capacity(len * 3);
        for _ in 0..len {
            data.extend_from_slice(&pixel);
        }
        Self {
            data,
            width,
            height,
            order,
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.data
    }

    /// Pixel at (x, y) in this frame's channel order.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 3;
        Some([self.data[idx], self.data[idx + 1], self.data[idx + 2]])
    }

    /// Write an RGB colour at (x, y), respecting the frame's channel order.
    /// Out-of-bounds writes are ignored.
    pub fn put_rgb(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 3;
        let px = match self.order {
            ChannelOrder::Rgb => rgb,
            ChannelOrder::Bgr => [rgb[2], rgb[1], rgb[0]],
        };
        self.data[idx..idx + 3].copy_from_slice(&px);
    }

    /// Convert to RGB order in place (no-op when already RGB).
    pub fn into_rgb(mut self) -> Self {
        if self.order == ChannelOrder::Bgr {
            for px in self.data.chunks_exact_mut(3) {
                px.swap(0, 2);
            }
            self.order = ChannelOrder::Rgb;
        }
        self
    }

    /// RGB copy of the pixel buffer, leaving `self` untouched.
    pub fn rgb_pixels(&self) -> Vec<u8> {
        match self.order {
            ChannelOrder::Rgb => self.data.clone(),
            ChannelOrder::Bgr => self.clone().into_rgb().data,
        }
    }
}
