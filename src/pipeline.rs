//! Detection orchestrator.
//!
//! `Pipeline::detect` hands each request to a dedicated worker pool so the
//! caller (typically a UI or capture-consumer thread) never blocks on the
//! model. Requests are independent: no coalescing and no cached results.

use anyhow::{Context, Result};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

use crate::detect::{Detection, InferenceAdapter};
use crate::frame::{Frame, StillImage};

/// Default confidence threshold for still images: show everything.
pub const DEFAULT_STILL_CONFIDENCE: f32 = 0.0;
/// Default confidence threshold for live frames.
pub const DEFAULT_LIVE_CONFIDENCE: f32 = 0.5;

const DEFAULT_WORKERS: usize = 2;

/// What to run detection on.
#[derive(Clone)]
pub enum DetectionSource {
    /// Imported or captured photo. Survivors carry crops.
    Still(StillImage),
    /// Camera frame. Survivors carry no crops.
    Live(Frame),
}

impl From<StillImage> for DetectionSource {
    fn from(image: StillImage) -> Self {
        Self::Still(image)
    }
}

impl From<Frame> for DetectionSource {
    fn from(frame: Frame) -> Self {
        Self::Live(frame)
    }
}

/// Per-source default thresholds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectionThresholds {
    pub still: f32,
    pub live: f32,
}

impl Default for DetectionThresholds {
    fn default() -> Self {
        Self {
            still: DEFAULT_STILL_CONFIDENCE,
            live: DEFAULT_LIVE_CONFIDENCE,
        }
    }
}

pub struct Pipeline {
    adapter: Arc<InferenceAdapter>,
    pool: ThreadPool,
    thresholds: DetectionThresholds,
}

impl Pipeline {
    pub fn new(adapter: InferenceAdapter) -> Result<Self> {
        Self::with_workers(adapter, DEFAULT_WORKERS)
    }

    pub fn with_workers(adapter: InferenceAdapter, workers: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|index| format!("detect-{}", index))
            .build()
            .context("build detection worker pool")?;
        Ok(Self {
            adapter: Arc::new(adapter),
            pool,
            thresholds: DetectionThresholds::default(),
        })
    }

    pub fn with_thresholds(mut self, thresholds: DetectionThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn thresholds(&self) -> DetectionThresholds {
        self.thresholds
    }

    /// Configured default threshold for this kind of source.
    pub fn threshold_for(&self, source: &DetectionSource) -> f32 {
        match source {
            DetectionSource::Still(_) => self.thresholds.still,
            DetectionSource::Live(_) => self.thresholds.live,
        }
    }

    pub fn adapter(&self) -> &Arc<InferenceAdapter> {
        &self.adapter
    }

    /// Run detection off the calling thread; collect the result from the
    /// returned handle.
    pub fn detect(
        &self,
        source: impl Into<DetectionSource>,
        confidence_threshold: f32,
    ) -> PendingDetections {
        let (tx, rx) = mpsc::sync_channel(1);
        self.detect_with(source, confidence_threshold, move |detections| {
            // The caller may have dropped the handle; nothing to deliver then.
            let _ = tx.send(detections);
        });
        PendingDetections { rx }
    }

    /// Run detection off the calling thread and pass the result to
    /// `completion`, which runs on a worker thread.
    pub fn detect_with<F>(
        &self,
        source: impl Into<DetectionSource>,
        confidence_threshold: f32,
        completion: F,
    ) where
        F: FnOnce(Vec<Detection>) + Send + 'static,
    {
        let source = source.into();
        let adapter = self.adapter.clone();
        self.pool.spawn(move || {
            completion(run(&adapter, &source, confidence_threshold));
        });
    }

    /// Run detection on the calling thread.
    pub fn detect_blocking(
        &self,
        source: impl Into<DetectionSource>,
        confidence_threshold: f32,
    ) -> Vec<Detection> {
        run(&self.adapter, &source.into(), confidence_threshold)
    }
}

fn run(adapter: &InferenceAdapter, source: &DetectionSource, confidence_threshold: f32) -> Vec<Detection> {
    let detections = match source {
        DetectionSource::Still(image) => adapter.infer_still(image, confidence_threshold),
        DetectionSource::Live(frame) => adapter.infer_frame(frame, confidence_threshold),
    };
    log::debug!(
        "{} detection(s) at threshold {:.2}",
        detections.len(),
        confidence_threshold
    );
    detections
}

/// Handle to an in-flight `detect` call.
pub struct PendingDetections {
    rx: Receiver<Vec<Detection>>,
}

impl PendingDetections {
    /// Block until the result arrives. A lost worker yields no detections.
    pub fn wait(self) -> Vec<Detection> {
        match self.rx.recv() {
            Ok(detections) => detections,
            Err(_) => {
                log::error!("detection worker disconnected; returning no detections");
                Vec::new()
            }
        }
    }

    /// `None` on timeout; a lost worker yields an empty result.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Vec<Detection>> {
        match self.rx.recv_timeout(timeout) {
            Ok(detections) => Some(detections),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                log::error!("detection worker disconnected; returning no detections");
                Some(Vec::new())
            }
        }
    }

    /// Non-blocking check, for callers polling from a frame loop.
    pub fn try_take(&self) -> Option<Vec<Detection>> {
        match self.rx.try_recv() {
            Ok(detections) => Some(detections),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Vec::new()),
        }
    }
}
