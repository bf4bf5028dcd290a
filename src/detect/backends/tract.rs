#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::config::DetectorConfig;
use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Proposal};
use crate::frame::Frame;

/// Tract-based backend for ONNX detection models.
///
/// Expected model I/O:
/// - input `[1, 3, H, W]` f32 RGB in `0..1`
/// - output `[1, N, 4 + C]`: `x1 y1 x2 y2` in input pixels, then C class scores
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    width: u32,
    height: u32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
        })
    }

    pub fn from_config(cfg: &DetectorConfig) -> Result<Self> {
        let weights = cfg
            .weights
            .as_ref()
            .ok_or_else(|| anyhow!("tract backend requires 'weights'"))?;
        Self::new(weights, cfg.input_width, cfg.input_height)
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let rgb = image::RgbImage::from_raw(frame.width, frame.height, frame.rgb_pixels())
            .ok_or_else(|| anyhow!("frame buffer does not match its dimensions"))?;
        let resized = image::imageops::resize(
            &rgb,
            self.width,
            self.height,
            image::imageops::FilterType::Triangle,
        );

        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );

        Ok(input.into_tensor())
    }

    fn extract_proposals(&self, outputs: TVec<TValue>, frame: &Frame) -> Result<Vec<Proposal>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 || shape[2] < 5 {
            return Err(anyhow!(
                "unexpected model output shape {:?}, want [1, N, 4 + C]",
                shape
            ));
        }
        let rows = view
            .into_shape((shape[1], shape[2]))
            .context("reshape model output")?;

        let sx = frame.width as f32 / self.width as f32;
        let sy = frame.height as f32 / self.height as f32;

        let mut proposals = Vec::with_capacity(rows.nrows());
        for row in rows.outer_iter() {
            let bbox = BoundingBox::new(row[0], row[1], row[2], row[3]).scale(sx, sy);
            let class_scores = row
                .iter()
                .skip(4)
                .enumerate()
                .map(|(class_id, score)| (class_id as u32, *score))
                .collect();
            proposals.push(Proposal { bbox, class_scores });
        }
        Ok(proposals)
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Proposal>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.extract_proposals(outputs, frame)
    }
}
