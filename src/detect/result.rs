use image::RgbImage;
use rand::RngCore;
use serde::{Serialize, Serializer};
use std::fmt;

use crate::geometry::NormalizedRect;

/// Opaque, randomly generated detection identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DetectionId([u8; 16]);

impl DetectionId {
    pub fn random() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }
}

impl fmt::Display for DetectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl Serialize for DetectionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Pre-suppression candidate. Never leaves the detection pipeline.
#[derive(Clone, Debug, PartialEq)]
pub struct RawCandidate {
    pub label: String,
    pub confidence: f32,
    /// Top-left origin, normalized.
    pub bbox: NormalizedRect,
}

impl RawCandidate {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: NormalizedRect) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }
}

/// A labeled, scored box that survived suppression. Immutable.
#[derive(Clone, Debug, Serialize)]
pub struct Detection {
    id: DetectionId,
    label: String,
    confidence: f32,
    bbox: NormalizedRect,
    #[serde(skip)]
    crop: Option<RgbImage>,
}

impl Detection {
    pub fn new(candidate: RawCandidate, crop: Option<RgbImage>) -> Self {
        Self {
            id: DetectionId::random(),
            label: candidate.label,
            confidence: candidate.confidence,
            bbox: candidate.bbox,
            crop,
        }
    }

    pub fn id(&self) -> DetectionId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn bbox(&self) -> &NormalizedRect {
        &self.bbox
    }

    /// Region cropped from the source still image. Always `None` for live frames.
    pub fn crop(&self) -> Option<&RgbImage> {
        self.crop.as_ref()
    }

    /// Confidence as a display percentage, e.g. `"87.5%"`.
    pub fn confidence_percentage(&self) -> String {
        format!("{:.1}%", self.confidence * 100.0)
    }
}
