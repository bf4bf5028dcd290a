use anyhow::Result;

use crate::frame::Frame;

use super::result::Proposal;

/// Detector backend trait.
///
/// A backend produces scored proposals for one frame. Thresholding,
/// NMS and the detection cap are applied afterwards by `postprocess`, so
/// backends should return everything they scored.
///
/// Each worker of the parallel predictor owns its own backend instance.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame. Boxes are in the frame's pixel coordinates.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Proposal>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
