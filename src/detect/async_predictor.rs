//! Multi-threaded inference pool.
//!
//! Each worker thread owns one backend. Frames are submitted with `put` and
//! results come back from `get` in submission order, whatever order the
//! workers finish in.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use anyhow::{anyhow, Result};

use crate::config::DetectorConfig;
use crate::frame::Frame;

use super::backend::DetectorBackend;
use super::postprocess::postprocess;
use super::result::Predictions;

struct Task {
    index: u64,
    frame: Arc<Frame>,
}

type TaskResult = (u64, Result<Predictions>);

pub struct AsyncPredictor {
    task_tx: Option<SyncSender<Task>>,
    result_rx: Receiver<TaskResult>,
    workers: Vec<JoinHandle<()>>,
    finished: BTreeMap<u64, Result<Predictions>>,
    next_put: u64,
    next_get: u64,
}

impl AsyncPredictor {
    /// Spawn one worker per backend.
    pub fn new(backends: Vec<Box<dyn DetectorBackend>>, cfg: Arc<DetectorConfig>) -> Result<Self> {
        if backends.is_empty() {
            return Err(anyhow!("async predictor needs at least one backend"));
        }
        let capacity = backends.len() * 3;
        let (task_tx, task_rx) = mpsc::sync_channel::<Task>(capacity);
        let (result_tx, result_rx) = mpsc::channel::<TaskResult>();
        let task_rx = Arc::new(Mutex::new(task_rx));

        let mut workers = Vec::with_capacity(backends.len());
        for (worker_id, mut backend) in backends.into_iter().enumerate() {
            let task_rx = Arc::clone(&task_rx);
            let result_tx = result_tx.clone();
            let cfg = Arc::clone(&cfg);
            let handle = std::thread::Builder::new()
                .name(format!("predict-{}", worker_id))
                .spawn(move || loop {
                    let task = {
                        let Ok(guard) = task_rx.lock() else {
                            return;
                        };
                        match guard.recv() {
                            Ok(task) => task,
                            Err(_) => return,
                        }
                    };
                    // A panicking backend still answers for its frame, so `get`
                    // never waits on an index that will not arrive.
                    let result = panic::catch_unwind(AssertUnwindSafe(|| {
                        backend.detect(&task.frame)
                    }))
                    .unwrap_or_else(|_| {
                        log::error!(
                            "predictor worker {} panicked on frame {}",
                            worker_id,
                            task.index
                        );
                        Err(anyhow!("predictor worker panicked on frame {}", task.index))
                    })
                    .map(|proposals| {
                        postprocess(proposals, &cfg, task.frame.width, task.frame.height)
                    });
                    if result_tx.send((task.index, result)).is_err() {
                        return;
                    }
                })
                .map_err(|e| anyhow!("failed to spawn predictor worker: {}", e))?;
            workers.push(handle);
        }
        log::debug!("async predictor started with {} workers", workers.len());

        Ok(Self {
            task_tx: Some(task_tx),
            result_rx,
            workers,
            finished: BTreeMap::new(),
            next_put: 0,
            next_get: 0,
        })
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Frames submitted but not yet returned by `get`.
    pub fn pending(&self) -> u64 {
        self.next_put - self.next_get
    }

    /// Submit a frame for inference.
    pub fn put(&mut self, frame: Arc<Frame>) -> Result<()> {
        let task_tx = self
            .task_tx
            .as_ref()
            .ok_or_else(|| anyhow!("async predictor is shut down"))?;
        task_tx
            .send(Task {
                index: self.next_put,
                frame,
            })
            .map_err(|_| anyhow!("all predictor workers have stopped"))?;
        self.next_put += 1;
        Ok(())
    }

    /// Block until the result of the oldest outstanding frame is available.
    pub fn get(&mut self) -> Result<Predictions> {
        if self.next_get >= self.next_put {
            return Err(anyhow!("no frame pending in async predictor"));
        }
        loop {
            if let Some(result) = self.finished.remove(&self.next_get) {
                self.next_get += 1;
                return result;
            }
            let (index, result) = self
                .result_rx
                .recv()
                .map_err(|_| anyhow!("predictor workers exited before returning results"))?;
            self.finished.insert(index, result);
        }
    }

    /// Frame indices are numbered per predictor; restart them for a new video.
    ///
    /// Outstanding results are drained and dropped. If the workers are gone the
    /// counters are still cleared and the error is returned.
    pub(crate) fn reset(&mut self) -> Result<()> {
        let mut drained = Ok(());
        while self.pending() > 0 {
            let before = self.next_get;
            if let Err(e) = self.get() {
                // Per-frame errors advance the cursor; a closed channel does not.
                if self.next_get == before {
                    drained = Err(e);
                    break;
                }
            }
        }
        self.next_put = 0;
        self.next_get = 0;
        self.finished.clear();
        drained
    }
}

impl Drop for AsyncPredictor {
    fn drop(&mut self) {
        // Closing the task channel lets every worker fall out of its loop.
        self.task_tx = None;
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::error!("predictor worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::{BoundingBox, Proposal};
    use crate::frame::ChannelOrder;
    use std::time::Duration;

    /// Encodes the first pixel byte into the class id; sleeps longer for
    /// early frames so results finish out of order.
    struct SlowEcho;

    impl DetectorBackend for SlowEcho {
        fn name(&self) -> &'static str {
            "slow-echo"
        }

        fn detect(&mut self, frame: &Frame) -> Result<Vec<Proposal>> {
            let tag = frame.pixels()[0];
            std::thread::sleep(Duration::from_millis(u64::from(10u8.saturating_sub(tag)) * 3));
            Ok(vec![Proposal {
                bbox: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
                class_scores: vec![(u32::from(tag), 0.9)],
            }])
        }
    }

    #[test]
    fn returns_results_in_submission_order() {
        let backends: Vec<Box<dyn DetectorBackend>> =
            (0..3).map(|_| Box::new(SlowEcho) as Box<dyn DetectorBackend>).collect();
        let mut pool = AsyncPredictor::new(backends, Arc::new(DetectorConfig::default())).unwrap();
        assert_eq!(pool.num_workers(), 3);

        for tag in 0..6u8 {
            pool.put(Arc::new(Frame::filled(4, 4, ChannelOrder::Bgr, [tag, 0, 0])))
                .unwrap();
        }
        let classes: Vec<u32> = (0..6)
            .map(|_| pool.get().unwrap().instances[0].class_id)
            .collect();
        assert_eq!(classes, vec![0, 1, 2, 3, 4, 5]);
        assert!(pool.get().is_err());
    }

    /// Panics on frames whose first byte equals `tag`.
    struct PanicOn(u8);

    impl DetectorBackend for PanicOn {
        fn name(&self) -> &'static str {
            "panic-on"
        }

        fn detect(&mut self, frame: &Frame) -> Result<Vec<Proposal>> {
            let tag = frame.pixels()[0];
            if tag == self.0 {
                panic!("backend blew up on frame tagged {}", tag);
            }
            Ok(vec![Proposal {
                bbox: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
                class_scores: vec![(u32::from(tag), 0.9)],
            }])
        }
    }

    #[test]
    fn worker_panic_becomes_an_error_for_that_frame() {
        let backends: Vec<Box<dyn DetectorBackend>> =
            (0..2).map(|_| Box::new(PanicOn(2)) as Box<dyn DetectorBackend>).collect();
        let mut pool = AsyncPredictor::new(backends, Arc::new(DetectorConfig::default())).unwrap();

        for tag in 0..5u8 {
            pool.put(Arc::new(Frame::filled(4, 4, ChannelOrder::Bgr, [tag, 0, 0])))
                .unwrap();
        }
        let results: Vec<Result<Predictions>> = (0..5).map(|_| pool.get()).collect();
        for (tag, result) in results.iter().enumerate() {
            if tag == 2 {
                let err = result.as_ref().err().unwrap();
                assert!(err.to_string().contains("panicked on frame 2"));
            } else {
                assert_eq!(result.as_ref().unwrap().instances[0].class_id, tag as u32);
            }
        }

        // The pool stays usable after the panic.
        pool.reset().unwrap();
        pool.put(Arc::new(Frame::filled(4, 4, ChannelOrder::Bgr, [7, 0, 0])))
            .unwrap();
        assert_eq!(pool.get().unwrap().instances[0].class_id, 7);
    }

    #[test]
    fn reset_drops_outstanding_results() {
        let backends: Vec<Box<dyn DetectorBackend>> =
            (0..2).map(|_| Box::new(PanicOn(1)) as Box<dyn DetectorBackend>).collect();
        let mut pool = AsyncPredictor::new(backends, Arc::new(DetectorConfig::default())).unwrap();
        for tag in 0..4u8 {
            pool.put(Arc::new(Frame::filled(4, 4, ChannelOrder::Bgr, [tag, 0, 0])))
                .unwrap();
        }
        assert!(pool.get().is_ok());

        pool.reset().unwrap();
        assert_eq!(pool.pending(), 0);
        assert!(pool.get().is_err());
    }

    #[test]
    fn rejects_empty_backend_list() {
        assert!(AsyncPredictor::new(Vec::new(), Arc::new(DetectorConfig::default())).is_err());
    }
}
