#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::{imageops, RgbImage};
use tract_onnx::prelude::*;

use super::labels::coco_label;
use crate::detect::model::{DetectionModel, ModelOutput};
use crate::geometry::NormalizedRect;

/// Values per detection row: x, y, width, height, score, class index.
const ROW_LEN: usize = 6;

/// Tract-based ONNX detection model.
///
/// Expects a single NCHW f32 input and an output whose trailing dimension is
/// `[x, y, w, h, score, class]` in normalized coordinates. The model file is
/// loaded once; inference touches no disk or network.
pub struct TractModel {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    width: u32,
    height: u32,
}

impl TractModel {
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

    fn build_input(&self, image: &RgbImage) -> Tensor {
        let resized;
        let image = if image.dimensions() == (self.width, self.height) {
            image
        } else {
            resized = imageops::resize(
                image,
                self.width,
                self.height,
                imageops::FilterType::Triangle,
            );
            &resized
        };

        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, channel, y, x)| image.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );
        input.into_tensor()
    }

    fn decode(&self, outputs: TVec<TValue>) -> Result<Vec<ModelOutput>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let values = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let flat: Vec<f32> = values.iter().copied().collect();
        if flat.len() % ROW_LEN != 0 {
            return Err(anyhow!(
                "model output length {} is not a multiple of {}",
                flat.len(),
                ROW_LEN
            ));
        }

        Ok(flat
            .chunks_exact(ROW_LEN)
            .filter(|row| row[4].is_finite() && row[5] >= 0.0)
            .map(|row| {
                ModelOutput::new(
                    coco_label(row[5] as usize),
                    row[4],
                    NormalizedRect::new(row[0], row[1], row[2], row[3]),
                )
            })
            .collect())
    }
}

impl DetectionModel for TractModel {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn infer(&mut self, image: &RgbImage) -> Result<Vec<ModelOutput>> {
        let input = self.build_input(image);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs)
    }
}
