use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Proposal};
use crate::frame::Frame;

/// Number of classes the stub pretends to know.
pub const STUB_NUM_CLASSES: u32 = 80;

/// Stub backend for testing and dry runs.
///
/// Emits exactly one proposal per frame, derived from a SHA-256 of the pixels:
/// identical frames give identical boxes. The score is always in `0.5..=1.0`.
#[derive(Default)]
pub struct StubBackend;

impl StubBackend {
    pub fn new() -> Self {
        Self
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Proposal>> {
        let digest: [u8; 32] = Sha256::digest(frame.pixels()).into();
        let w = frame.width as f32;
        let h = frame.height as f32;

        let x1 = (digest[0] as f32 / 255.0) * w * 0.5;
        let y1 = (digest[1] as f32 / 255.0) * h * 0.5;
        let x2 = x1 + (0.1 + digest[2] as f32 / 255.0 * 0.4) * w;
        let y2 = y1 + (0.1 + digest[3] as f32 / 255.0 * 0.4) * h;
        let score = 0.5 + digest[4] as f32 / 510.0;
        let class_id = digest[5] as u32 % STUB_NUM_CLASSES;

        Ok(vec![Proposal {
            bbox: BoundingBox::new(x1, y1, x2, y2),
            class_scores: vec![(class_id, score)],
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ChannelOrder;

    #[test]
    fn stub_backend_is_deterministic() {
        let mut backend = StubBackend::new();
        let a = Frame::filled(64, 48, ChannelOrder::Bgr, [1, 2, 3]);
        let b = Frame::filled(64, 48, ChannelOrder::Bgr, [9, 9, 9]);

        let r1 = backend.detect(&a).unwrap();
        let r2 = backend.detect(&a).unwrap();
        let r3 = backend.detect(&b).unwrap();
        assert_eq!(r1, r2);
        assert_eq!(r1.len(), 1);
        assert_ne!(r1, r3);

        let p = &r1[0];
        assert!(p.bbox.x1 >= 0.0 && p.bbox.x2 <= 64.0);
        assert!(p.bbox.y1 >= 0.0 && p.bbox.y2 <= 48.0);
        let (class_id, score) = p.class_scores[0];
        assert!(class_id < STUB_NUM_CLASSES);
        assert!((0.5..=1.0).contains(&score));
    }
}
