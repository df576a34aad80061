//! Box geometry shared by suppression, inference and cropping.
//!
//! All detection boxes are `NormalizedRect`s: fractions of the image width and
//! height with a top-left origin. Pixel rectangles stay fractional (`f64`)
//! until a crop snaps them to whole pixels.

use serde::{Deserialize, Serialize};

/// Rectangle in [0, 1] image-relative coordinates, top-left origin.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl NormalizedRect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn max_x(&self) -> f32 {
        self.x + self.width
    }

    pub fn max_y(&self) -> f32 {
        self.y + self.height
    }

    /// Area with negative extents treated as empty.
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Mirror the box about the horizontal midline: `y' = 1 - (y + height)`.
    ///
    /// Converts between bottom-left and top-left origin conventions.
    pub fn flipped_vertically(&self) -> Self {
        Self {
            y: 1.0 - (self.y + self.height),
            ..*self
        }
    }

    /// Intersect with the unit square. Boxes entirely outside collapse to zero area.
    pub fn clamped_to_unit(&self) -> Self {
        let x0 = self.x.clamp(0.0, 1.0);
        let y0 = self.y.clamp(0.0, 1.0);
        let x1 = self.max_x().clamp(0.0, 1.0);
        let y1 = self.max_y().clamp(0.0, 1.0);
        Self {
            x: x0,
            y: y0,
            width: (x1 - x0).max(0.0),
            height: (y1 - y0).max(0.0),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite()
    }
}

/// Rectangle in image pixel space. Fractional until cropped.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PixelRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl PixelRect {
    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }
}

pub fn intersection_area(a: &NormalizedRect, b: &NormalizedRect) -> f32 {
    let w = a.max_x().min(b.max_x()) - a.x.max(b.x);
    let h = a.max_y().min(b.max_y()) - a.y.max(b.y);
    if w <= 0.0 || h <= 0.0 {
        return 0.0;
    }
    w * h
}

pub fn union_area(a: &NormalizedRect, b: &NormalizedRect) -> f32 {
    a.area() + b.area() - intersection_area(a, b)
}

/// Intersection over union. Zero when the union has no area.
pub fn iou(a: &NormalizedRect, b: &NormalizedRect) -> f32 {
    let union = union_area(a, b);
    if !(union > 0.0) {
        return 0.0;
    }
    let ratio = intersection_area(a, b) / union;
    if ratio.is_finite() {
        ratio
    } else {
        0.0
    }
}

/// Map a normalized box onto an image of the given size.
///
/// Negative origins clamp to 0; extents clamp so the rectangle never runs past
/// the right or bottom edge. The result may be empty, which `crop` rejects.
pub fn to_pixel_rect(rect: &NormalizedRect, image_width: u32, image_height: u32) -> PixelRect {
    let iw = image_width as f64;
    let ih = image_height as f64;

    let x = (rect.x as f64 * iw).max(0.0);
    let y = (rect.y as f64 * ih).max(0.0);
    let width = (rect.width as f64 * iw).min(iw - x);
    let height = (rect.height as f64 * ih).min(ih - y);

    PixelRect {
        x,
        y,
        width,
        height,
    }
}

/// Inverse of `to_pixel_rect` for in-bounds rectangles.
pub fn normalize_pixel_rect(rect: &PixelRect, image_width: u32, image_height: u32) -> NormalizedRect {
    if image_width == 0 || image_height == 0 {
        return NormalizedRect::default();
    }
    let iw = image_width as f64;
    let ih = image_height as f64;
    NormalizedRect {
        x: (rect.x / iw) as f32,
        y: (rect.y / ih) as f32,
        width: (rect.width / iw) as f32,
        height: (rect.height / ih) as f32,
    }
}
