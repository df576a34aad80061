//! Frame and still-image containers, plus region cropping.
//!
//! - `Frame`: one camera frame. Cloning shares the pixel buffer, so the
//!   latest-frame cache and the subscription channel only move a handle.
//! - `StillImage`: an imported or captured photo handed straight to detection.
//! - `crop` / `crop_normalized`: extract a detected region as its own image.

use anyhow::{anyhow, Result};
use image::{imageops, RgbImage};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::ScanError;
use crate::geometry::{to_pixel_rect, NormalizedRect, PixelRect};

// ----------------------------------------------------------------------------
// Frame: shared camera frame
// ----------------------------------------------------------------------------

/// A captured camera frame (RGB8). Cheap to clone.
#[derive(Clone, Debug)]
pub struct Frame {
    image: Arc<RgbImage>,
    /// Monotonic per-device frame counter.
    pub sequence: u64,
    captured_at: Instant,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self {
            image: Arc::new(image),
            sequence,
            captured_at: Instant::now(),
        }
    }

    /// Build a frame from packed RGB24 bytes.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        let image = rgb_image_from_raw(pixels, width, height)?;
        Ok(Self::new(image, sequence))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }

    /// True when both handles point at the same pixel buffer.
    pub fn shares_pixels_with(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.image, &other.image)
    }
}

// ----------------------------------------------------------------------------
// StillImage: photo input for detection
// ----------------------------------------------------------------------------

/// A still photo submitted for detection. Cheap to clone.
#[derive(Clone, Debug)]
pub struct StillImage {
    image: Arc<RgbImage>,
}

impl StillImage {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image: Arc::new(image),
        }
    }

    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        Ok(Self::new(rgb_image_from_raw(pixels, width, height)?))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }
}

impl From<Frame> for StillImage {
    /// Freeze a camera frame as a still (the "capture photo" path).
    fn from(frame: Frame) -> Self {
        Self { image: frame.image }
    }
}

fn rgb_image_from_raw(pixels: Vec<u8>, width: u32, height: u32) -> Result<RgbImage> {
    let expected = (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))?;
    if pixels.len() != expected {
        return Err(anyhow!(
            "RGB frame length mismatch: expected {}, got {}",
            expected,
            pixels.len()
        ));
    }
    RgbImage::from_raw(width, height, pixels)
        .ok_or_else(|| anyhow!("RGB buffer does not fit {}x{}", width, height))
}

// ----------------------------------------------------------------------------
// Cropping
// ----------------------------------------------------------------------------

/// Crop a pixel rectangle out of `image`.
///
/// The rectangle is snapped outward to whole pixels and limited to the image.
/// Fails with `InvalidRegion` when nothing is left.
pub fn crop(image: &RgbImage, rect: &PixelRect) -> Result<RgbImage, ScanError> {
    let finite = [rect.x, rect.y, rect.width, rect.height]
        .iter()
        .all(|v| v.is_finite());
    if !finite || rect.is_empty() {
        return Err(ScanError::InvalidRegion {
            width: 0,
            height: 0,
        });
    }

    let (iw, ih) = (image.width() as i64, image.height() as i64);
    let x0 = (rect.x.floor() as i64).clamp(0, iw);
    let y0 = (rect.y.floor() as i64).clamp(0, ih);
    let x1 = ((rect.x + rect.width).ceil() as i64).clamp(x0, iw);
    let y1 = ((rect.y + rect.height).ceil() as i64).clamp(y0, ih);
    let (width, height) = (x1 - x0, y1 - y0);

    if width == 0 || height == 0 {
        return Err(ScanError::InvalidRegion { width, height });
    }

    Ok(imageops::crop_imm(image, x0 as u32, y0 as u32, width as u32, height as u32).to_image())
}

/// Crop a normalized box. Degenerate regions yield `None`.
pub fn crop_normalized(image: &RgbImage, rect: &NormalizedRect) -> Option<RgbImage> {
    if !rect.is_finite() {
        return None;
    }
    let px = to_pixel_rect(rect, image.width(), image.height());
    match crop(image, &px) {
        Ok(cropped) => Some(cropped),
        Err(err) => {
            log::debug!("crop skipped: {}", err);
            None
        }
    }
}
