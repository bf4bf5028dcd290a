use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};

use crate::config::DetectorConfig;
use crate::frame::Frame;
use crate::ingest::VideoCapture;

use super::async_predictor::AsyncPredictor;
use super::backend::DetectorBackend;
use super::postprocess::postprocess;
use super::registry::BackendRegistry;
use super::result::Predictions;
use super::visualize::draw_instances;

enum Engine {
    Inline(Box<dyn DetectorBackend>),
    Pool(AsyncPredictor),
}

/// Detector wrapper: one long-lived model, many videos.
///
/// `run_on_video` turns a capture handle into a lazy sequence of
/// `(annotated frame, predictions)` pairs, one per decoded frame.
pub struct Predictor {
    cfg: Arc<DetectorConfig>,
    engine: Engine,
}

impl Predictor {
    /// Build with the built-in backends.
    ///
    /// With `parallel`, `workers` backend instances run on their own threads;
    /// `workers == 0` uses the available parallelism.
    pub fn new(cfg: Arc<DetectorConfig>, parallel: bool, workers: usize) -> Result<Self> {
        Self::with_registry(&BackendRegistry::with_builtin(), cfg, parallel, workers)
    }

    pub fn with_registry(
        registry: &BackendRegistry,
        cfg: Arc<DetectorConfig>,
        parallel: bool,
        workers: usize,
    ) -> Result<Self> {
        let engine = if parallel {
            let count = if workers == 0 {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            } else {
                workers
            };
            let mut backends = Vec::with_capacity(count);
            for _ in 0..count {
                let mut backend = registry.build(&cfg)?;
                backend.warm_up()?;
                backends.push(backend);
            }
            Engine::Pool(AsyncPredictor::new(backends, Arc::clone(&cfg))?)
        } else {
            let mut backend = registry.build(&cfg)?;
            backend.warm_up()?;
            Engine::Inline(backend)
        };
        log::info!(
            "predictor ready: backend={} parallel={} workers={}",
            cfg.backend,
            parallel,
            match &engine {
                Engine::Inline(_) => 1,
                Engine::Pool(pool) => pool.num_workers(),
            }
        );
        Ok(Self { cfg, engine })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.cfg
    }

    /// Predictions for a single frame.
    ///
    /// In pool mode this is refused while frames of a video are still in
    /// flight, since their results would be lost.
    pub fn predict(&mut self, frame: &Frame) -> Result<Predictions> {
        match &mut self.engine {
            Engine::Inline(backend) => {
                let proposals = backend.detect(frame)?;
                Ok(postprocess(proposals, &self.cfg, frame.width, frame.height))
            }
            Engine::Pool(pool) => {
                if pool.pending() > 0 {
                    bail!(
                        "predict called with {} frames in flight on the worker pool",
                        pool.pending()
                    );
                }
                pool.put(Arc::new(frame.clone()))?;
                pool.get()
            }
        }
    }

    /// Lazily run detection over every frame of `capture`.
    ///
    /// The sequence is finite and single-pass; it fuses after the first error.
    pub fn run_on_video<'a>(
        &'a mut self,
        capture: &'a mut dyn VideoCapture,
    ) -> Result<VideoPredictions<'a>> {
        let buffer_size = match &mut self.engine {
            Engine::Inline(_) => 0,
            Engine::Pool(pool) => {
                pool.reset()?;
                pool.num_workers() * 2
            }
        };
        Ok(VideoPredictions {
            predictor: self,
            capture,
            in_flight: VecDeque::new(),
            buffer_size,
            capture_done: false,
            failed: false,
        })
    }
}

/// Iterator returned by `Predictor::run_on_video`.
pub struct VideoPredictions<'a> {
    predictor: &'a mut Predictor,
    capture: &'a mut dyn VideoCapture,
    in_flight: VecDeque<Arc<Frame>>,
    buffer_size: usize,
    capture_done: bool,
    failed: bool,
}

impl VideoPredictions<'_> {
    fn next_inline(&mut self) -> Result<Option<(Frame, Predictions)>> {
        let Some(frame) = self.capture.next_frame()? else {
            return Ok(None);
        };
        let predictions = self.predictor.predict(&frame)?;
        let viz = draw_instances(&frame, &predictions);
        Ok(Some((viz, predictions)))
    }

    fn next_pooled(&mut self) -> Result<Option<(Frame, Predictions)>> {
        let Engine::Pool(pool) = &mut self.predictor.engine else {
            return Err(anyhow!("predictor has no worker pool"));
        };
        // Keep the pool busy: up to `buffer_size` frames ahead of the consumer.
        while !self.capture_done && self.in_flight.len() <= self.buffer_size {
            match self.capture.next_frame()? {
                Some(frame) => {
                    let frame = Arc::new(frame);
                    pool.put(Arc::clone(&frame))?;
                    self.in_flight.push_back(frame);
                }
                None => self.capture_done = true,
            }
        }
        let Some(frame) = self.in_flight.pop_front() else {
            return Ok(None);
        };
        let predictions = pool.get()?;
        let viz = draw_instances(&frame, &predictions);
        Ok(Some((viz, predictions)))
    }
}

impl Iterator for VideoPredictions<'_> {
    type Item = Result<(Frame, Predictions)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let step = match self.predictor.engine {
            Engine::Inline(_) => self.next_inline(),
            Engine::Pool(_) => self.next_pooled(),
        };
        match step {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
