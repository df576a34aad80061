use anyhow::Result;
use image::RgbImage;
use serde::Deserialize;
use std::str::FromStr;

use crate::geometry::NormalizedRect;

/// One raw entry emitted by a model, in the model's own box convention.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelOutput {
    pub label: String,
    pub confidence: f32,
    pub bbox: NormalizedRect,
}

impl ModelOutput {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: NormalizedRect) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }
}

/// Where a model places the origin of its normalized boxes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerticalOrigin {
    /// y grows upward from the bottom edge; boxes are flipped on the way in.
    #[default]
    BottomLeft,
    /// Already top-left; boxes pass through.
    TopLeft,
}

impl FromStr for VerticalOrigin {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "bottom-left" | "bottom_left" => Ok(Self::BottomLeft),
            "top-left" | "top_left" => Ok(Self::TopLeft),
            other => Err(anyhow::anyhow!(
                "unknown vertical origin '{}' (expected bottom-left or top-left)",
                other
            )),
        }
    }
}

/// Opaque object-detection model.
///
/// Implementations map one RGB image to a list of label/confidence/box
/// entries. They do no filtering or suppression; the inference adapter owns
/// both. `infer` takes `&mut self` so backends can keep scratch buffers.
pub trait DetectionModel: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run the model once.
    fn infer(&mut self, image: &RgbImage) -> Result<Vec<ModelOutput>>;
}
