//! Synthetic frame source.
//!
//! Produces a fixed number of deterministic BGR frames. The pattern depends on
//! the frame index and a seed, so different clips (and different frames of the
//! same clip) never share pixels.

use anyhow::Result;
use sha2::{Digest, Sha256};
use std::path::Path;

use super::{CaptureOpener, VideoCapture, DEFAULT_FPS};
use crate::frame::{ChannelOrder, Frame};

pub struct SyntheticSource {
    frames: u64,
    width: u32,
    height: u32,
    seed: u64,
    next_index: u64,
}

impl SyntheticSource {
    pub fn new(frames: u64, width: u32, height: u32, seed: u64) -> Self {
        Self {
            frames,
            width,
            height,
            seed,
            next_index: 0,
        }
    }

    fn generate_pixels(&self, index: u64) -> Vec<u8> {
        let pixel_count = self.width as usize * self.height as usize * 3;
        let offset = self.seed.wrapping_add(index.wrapping_mul(31));
        (0..pixel_count)
            .map(|i| ((i as u64).wrapping_add(offset) % 251) as u8)
            .collect()
    }
}

impl VideoCapture for SyntheticSource {
    fn frame_count(&self) -> Option<u64> {
        Some(self.frames)
    }

    fn fps(&self) -> f64 {
        DEFAULT_FPS
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.next_index >= self.frames {
            return Ok(None);
        }
        let pixels = self.generate_pixels(self.next_index);
        self.next_index += 1;
        Frame::new(pixels, self.width, self.height, ChannelOrder::Bgr).map(Some)
    }
}

/// Opens a `SyntheticSource` per path, seeded from the path itself.
#[derive(Clone, Copy, Debug)]
pub struct SyntheticOpener {
    pub frames: u64,
    pub width: u32,
    pub height: u32,
}

impl SyntheticOpener {
    pub fn new(frames: u64) -> Self {
        Self {
            frames,
            width: 64,
            height: 48,
        }
    }
}

impl CaptureOpener for SyntheticOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn VideoCapture>> {
        let digest: [u8; 32] = Sha256::digest(path.to_string_lossy().as_bytes()).into();
        let mut seed_bytes = [0u8; 8];
        seed_bytes.copy_from_slice(&digest[..8]);
        let seed = u64::from_le_bytes(seed_bytes);
        Ok(Box::new(SyntheticSource::new(
            self.frames,
            self.width,
            self.height,
            seed,
        )))
    }
}
