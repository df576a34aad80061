use anyhow::{anyhow, Result};
use image::RgbImage;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::detect::model::{DetectionModel, ModelOutput};

/// Model that replays scripted outputs instead of running inference.
///
/// Scripted steps are consumed one per call; once exhausted, every call
/// returns the repeating outputs. Used by tests and the synthetic demo.
pub struct ScriptedModel {
    steps: VecDeque<Result<Vec<ModelOutput>, String>>,
    repeating: Vec<ModelOutput>,
    latency: Duration,
    calls: Arc<AtomicUsize>,
}

impl ScriptedModel {
    /// Return the same outputs on every call.
    pub fn repeating(outputs: Vec<ModelOutput>) -> Self {
        Self {
            steps: VecDeque::new(),
            repeating: outputs,
            latency: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Model that never detects anything.
    pub fn empty() -> Self {
        Self::repeating(Vec::new())
    }

    /// Queue outputs for the next call.
    pub fn then(mut self, outputs: Vec<ModelOutput>) -> Self {
        self.steps.push_back(Ok(outputs));
        self
    }

    /// Queue a failure for the next call.
    pub fn then_fail(mut self, message: impl Into<String>) -> Self {
        self.steps.push_back(Err(message.into()));
        self
    }

    /// Sleep for `latency` inside every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Shared counter of `infer` calls.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl DetectionModel for ScriptedModel {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn infer(&mut self, _image: &RgbImage) -> Result<Vec<ModelOutput>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        match self.steps.pop_front() {
            Some(Ok(outputs)) => Ok(outputs),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(self.repeating.clone()),
        }
    }
}
