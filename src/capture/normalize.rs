//! Decoding of raw V4L2 buffers into RGB images.
//!
//! The negotiated format is captured once per device as a `FrameLayout`;
//! each dequeued buffer is then decoded against it. Rows may carry driver
//! padding (`bytesperline` wider than the visible row), which is skipped.

use anyhow::{anyhow, bail, Result};
use image::{Rgb, RgbImage};

/// Pixel encodings a capture device may negotiate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelEncoding {
    Rgb24,
    /// Packed 4:2:2, `Y0 U Y1 V` per pixel pair.
    Yuyv,
    /// Planar luma followed by interleaved 4:2:0 chroma.
    Nv12,
}

impl PixelEncoding {
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(Self::Rgb24),
            b"YUYV" => Some(Self::Yuyv),
            b"NV12" => Some(Self::Nv12),
            _ => None,
        }
    }

    fn min_stride(self, width: u32) -> Option<usize> {
        let width = width as usize;
        match self {
            Self::Rgb24 => width.checked_mul(3),
            Self::Yuyv => width.checked_mul(2),
            Self::Nv12 => Some(width),
        }
    }
}

/// Negotiated buffer geometry for one device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FrameLayout {
    pub encoding: PixelEncoding,
    pub width: u32,
    pub height: u32,
    /// Bytes per row of the first plane.
    stride: usize,
    /// Total bytes a complete buffer must hold.
    required: usize,
}

impl FrameLayout {
    /// `stride` is the driver's `bytesperline`; zero means tightly packed.
    pub(crate) fn new(encoding: PixelEncoding, width: u32, height: u32, stride: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            bail!("{:?} frame has no pixels ({}x{})", encoding, width, height);
        }
        if encoding != PixelEncoding::Rgb24 && width % 2 != 0 {
            bail!("{:?} needs an even width, got {}", encoding, width);
        }
        let min_stride = encoding
            .min_stride(width)
            .ok_or_else(|| anyhow!("{:?} row size overflows", encoding))?;
        let stride = match stride as usize {
            0 => min_stride,
            s if s < min_stride => bail!("stride {} shorter than a {:?} row of {}", s, encoding, min_stride),
            s => s,
        };

        let rows = match encoding {
            PixelEncoding::Nv12 => height as usize + (height as usize).div_ceil(2),
            _ => height as usize,
        };
        // The last row of a buffer does not need its padding.
        let required = (rows - 1)
            .checked_mul(stride)
            .and_then(|bytes| bytes.checked_add(min_stride))
            .ok_or_else(|| anyhow!("{:?} frame size overflows", encoding))?;

        Ok(Self {
            encoding,
            width,
            height,
            stride,
            required,
        })
    }

    pub(crate) fn decode(&self, buf: &[u8]) -> Result<RgbImage> {
        if buf.len() < self.required {
            bail!(
                "{:?} buffer truncated: need {} bytes, got {}",
                self.encoding,
                self.required,
                buf.len()
            );
        }
        let stride = self.stride;
        let image = match self.encoding {
            PixelEncoding::Rgb24 => RgbImage::from_fn(self.width, self.height, |x, y| {
                let at = y as usize * stride + x as usize * 3;
                Rgb([buf[at], buf[at + 1], buf[at + 2]])
            }),
            PixelEncoding::Yuyv => RgbImage::from_fn(self.width, self.height, |x, y| {
                let pair = y as usize * stride + (x as usize / 2) * 4;
                let luma = buf[pair + (x as usize % 2) * 2];
                ycbcr_to_rgb(luma, buf[pair + 1], buf[pair + 3])
            }),
            PixelEncoding::Nv12 => {
                let chroma = self.height as usize * stride;
                RgbImage::from_fn(self.width, self.height, |x, y| {
                    let luma = buf[y as usize * stride + x as usize];
                    let at = chroma + (y as usize / 2) * stride + (x as usize / 2) * 2;
                    ycbcr_to_rgb(luma, buf[at], buf[at + 1])
                })
            }
        };
        Ok(image)
    }
}

/// Full-range BT.601 in 16.16 fixed point.
fn ycbcr_to_rgb(y: u8, cb: u8, cr: u8) -> Rgb<u8> {
    let y = i32::from(y);
    let cb = i32::from(cb) - 128;
    let cr = i32::from(cr) - 128;

    let r = y + ((91_881 * cr) >> 16);
    let g = y - ((22_554 * cb + 46_802 * cr) >> 16);
    let b = y + ((116_130 * cb) >> 16);
    Rgb([channel(r), channel(g), channel(b)])
}

fn channel(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}
