use image::RgbImage;
use std::sync::Mutex;

use super::model::{DetectionModel, ModelOutput, VerticalOrigin};
use super::nms::suppress_candidates;
use super::result::{Detection, RawCandidate};
use crate::error::ScanError;
use crate::frame::{crop_normalized, Frame, StillImage};

/// IoU above which a lower-confidence overlapping box is dropped.
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.5;

/// Wraps a detection model and turns its raw output into `Detection`s.
///
/// Per call: run the model once, drop entries below the confidence
/// threshold, convert boxes to top-left origin, suppress overlaps, and (for
/// stills) crop each survivor. Every failure degrades to an empty list.
pub struct InferenceAdapter {
    model: Option<Mutex<Box<dyn DetectionModel>>>,
    iou_threshold: f32,
    origin: VerticalOrigin,
}

impl InferenceAdapter {
    pub fn new<M: DetectionModel + 'static>(model: M) -> Self {
        Self::from_boxed(Box::new(model))
    }

    pub fn from_boxed(model: Box<dyn DetectionModel>) -> Self {
        Self {
            model: Some(Mutex::new(model)),
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            origin: VerticalOrigin::default(),
        }
    }

    /// Adapter with no model loaded. Every call returns no detections.
    pub fn unavailable() -> Self {
        log::warn!("detection model not loaded; detection will return no results");
        Self {
            model: None,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            origin: VerticalOrigin::default(),
        }
    }

    pub fn with_iou_threshold(mut self, iou_threshold: f32) -> Self {
        self.iou_threshold = iou_threshold;
        self
    }

    pub fn with_vertical_origin(mut self, origin: VerticalOrigin) -> Self {
        self.origin = origin;
        self
    }

    pub fn is_available(&self) -> bool {
        self.model.is_some()
    }

    /// Detect on a still image, attaching a crop of each surviving region.
    pub fn infer_still(&self, image: &StillImage, confidence_threshold: f32) -> Vec<Detection> {
        let survivors = self.survivors(image.image(), confidence_threshold);
        survivors
            .into_iter()
            .map(|candidate| {
                let crop = crop_normalized(image.image(), &candidate.bbox);
                Detection::new(candidate, crop)
            })
            .collect()
    }

    /// Detect on a live frame. No crops: a region is cropped only when a
    /// caller selects it, via the latest-frame cache.
    pub fn infer_frame(&self, frame: &Frame, confidence_threshold: f32) -> Vec<Detection> {
        self.survivors(frame.image(), confidence_threshold)
            .into_iter()
            .map(|candidate| Detection::new(candidate, None))
            .collect()
    }

    fn survivors(&self, image: &RgbImage, confidence_threshold: f32) -> Vec<RawCandidate> {
        match self.candidates(image, confidence_threshold) {
            Ok(candidates) => suppress_candidates(candidates, self.iou_threshold),
            Err(ScanError::ModelUnavailable) => {
                log::debug!("detection skipped: model unavailable");
                Vec::new()
            }
            Err(err) => {
                log::error!("{}; returning no detections", err);
                Vec::new()
            }
        }
    }

    /// Run the model and return filtered, top-left-origin candidates.
    pub fn candidates(
        &self,
        image: &RgbImage,
        confidence_threshold: f32,
    ) -> Result<Vec<RawCandidate>, ScanError> {
        let model = self.model.as_ref().ok_or(ScanError::ModelUnavailable)?;
        let outputs = {
            let mut guard = model
                .lock()
                .map_err(|_| ScanError::InferenceFailed("model lock poisoned".into()))?;
            guard
                .infer(image)
                .map_err(|err| ScanError::InferenceFailed(format!("{} ({:#})", guard.name(), err)))?
        };

        Ok(outputs
            .into_iter()
            .filter_map(|output| self.convert(output, confidence_threshold))
            .collect())
    }

    fn convert(&self, output: ModelOutput, confidence_threshold: f32) -> Option<RawCandidate> {
        // Filtering before suppression keeps the O(n^2) pass small.
        if !(output.confidence >= confidence_threshold) || !output.bbox.is_finite() {
            return None;
        }
        let bbox = match self.origin {
            VerticalOrigin::BottomLeft => output.bbox.flipped_vertically(),
            VerticalOrigin::TopLeft => output.bbox,
        };
        Some(RawCandidate {
            label: output.label,
            confidence: output.confidence.clamp(0.0, 1.0),
            bbox: bbox.clamped_to_unit(),
        })
    }
}
