mod async_predictor;
mod backend;
mod backends;
mod postprocess;
mod predictor;
mod registry;
mod result;
mod visualize;

pub use async_predictor::AsyncPredictor;
pub use backend::DetectorBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use backends::{stub::STUB_NUM_CLASSES, StubBackend};
pub use postprocess::postprocess;
pub use predictor::{Predictor, VideoPredictions};
pub use registry::{BackendConstructor, BackendRegistry};
pub use result::{BoundingBox, Instance, Predictions, Proposal};
pub use visualize::{class_color, draw_instances};
