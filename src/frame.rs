//! Captured frames and the pixel operations applied between capture and streaming.
//!
//! - `RawFrame`: RGB24 pixels plus capture metadata. Produced by a frame source,
//!   consumed by the classifier and the stream encoder.
//! - `Rotation`: fixed 90-degree rotations applied right after capture.
//! - `annotate_boxes` / `encode_jpeg`: drawing and encoding for the MJPEG stream.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, Rgb, RgbImage};
use std::time::Instant;

use crate::classify::BoundingBox;

pub const DEFAULT_JPEG_QUALITY: u8 = 80;

const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const BOX_THICKNESS: u32 = 2;

/// One RGB24 frame as delivered by a frame source.
pub struct RawFrame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Monotonic per-source sequence number, starting at 1.
    pub sequence: u64,
    pub captured_at: Instant,
}

impl RawFrame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "frame {}x{} expects {} RGB bytes, got {}",
                width,
                height,
                expected,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
            sequence,
            captured_at: Instant::now(),
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn to_image(&self) -> Result<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.pixels.clone())
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", self.width, self.height))
    }

    fn from_image(image: RgbImage, sequence: u64, captured_at: Instant) -> Self {
        let (width, height) = image.dimensions();
        Self {
            pixels: image.into_raw(),
            width,
            height,
            sequence,
            captured_at,
        }
    }

    /// Rotate clockwise by `rotation`. A no-op for `Rotation::None`.
    pub fn rotated(self, rotation: Rotation) -> Result<Self> {
        if rotation == Rotation::None {
            return Ok(self);
        }
        let sequence = self.sequence;
        let captured_at = self.captured_at;
        let image = self.to_image()?;
        let rotated = match rotation {
            Rotation::None => image,
            Rotation::Clockwise90 => imageops::rotate90(&image),
            Rotation::Rotate180 => imageops::rotate180(&image),
            Rotation::Clockwise270 => imageops::rotate270(&image),
        };
        Ok(Self::from_image(rotated, sequence, captured_at))
    }
}

/// Camera mounting rotation. Only quarter turns are supported.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Rotation {
    #[default]
    None,
    Clockwise90,
    Rotate180,
    Clockwise270,
}

impl Rotation {
    pub fn from_degrees(degrees: u32) -> Result<Self> {
        match degrees {
            0 => Ok(Rotation::None),
            90 => Ok(Rotation::Clockwise90),
            180 => Ok(Rotation::Rotate180),
            270 => Ok(Rotation::Clockwise270),
            other => Err(anyhow!(
                "rotation {} not supported; must be 0, 90, 180, or 270",
                other
            )),
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Rotation::None => 0,
            Rotation::Clockwise90 => 90,
            Rotation::Rotate180 => 180,
            Rotation::Clockwise270 => 270,
        }
    }
}

/// Draw detection boxes onto `image`. Boxes are clipped to the image bounds.
pub fn annotate_boxes(image: &mut RgbImage, boxes: &[BoundingBox]) {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    for bb in boxes {
        let x0 = bb.x.min(width - 1);
        let y0 = bb.y.min(height - 1);
        let x1 = bb.x.saturating_add(bb.width).min(width - 1);
        let y1 = bb.y.saturating_add(bb.height).min(height - 1);
        for t in 0..BOX_THICKNESS {
            for x in x0..=x1 {
                put(image, x, y0.saturating_add(t).min(y1), BOX_COLOR);
                put(image, x, y1.saturating_sub(t).max(y0), BOX_COLOR);
            }
            for y in y0..=y1 {
                put(image, x0.saturating_add(t).min(x1), y, BOX_COLOR);
                put(image, x1.saturating_sub(t).max(x0), y, BOX_COLOR);
            }
        }
    }
}

fn put(image: &mut RgbImage, x: u32, y: u32, color: Rgb<u8>) {
    if let Some(pixel) = image.get_pixel_mut_checked(x, y) {
        *pixel = color;
    }
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    encoder.encode_image(image).context("encode jpeg")?;
    Ok(buf)
}

pub(crate) fn rgb_len(width: u32, height: u32) -> Result<usize> {
    width
        .checked_mul(height)
        .and_then(|v| v.checked_mul(3))
        .map(|v| v as usize)
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_frame(width: u32, height: u32) -> RawFrame {
        let mut pixels = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                pixels.extend_from_slice(&[x as u8, y as u8, 0]);
            }
        }
        RawFrame::new(pixels, width, height, 1).expect("frame")
    }

    #[test]
    fn raw_frame_rejects_wrong_length() {
        assert!(RawFrame::new(vec![0u8; 10], 2, 2, 1).is_err());
    }

    #[test]
    fn rotation_parses_quarter_turns_only() {
        assert_eq!(Rotation::from_degrees(0).unwrap(), Rotation::None);
        assert_eq!(Rotation::from_degrees(270).unwrap().degrees(), 270);
        assert!(Rotation::from_degrees(45).is_err());
    }

    #[test]
    fn rotate_90_swaps_dimensions_and_moves_origin() -> Result<()> {
        let frame = gradient_frame(4, 2);
        let rotated = frame.rotated(Rotation::Clockwise90)?;
        assert_eq!((rotated.width, rotated.height), (2, 4));
        // Bottom-left pixel (x=0, y=1) lands at the top-left after a clockwise turn.
        assert_eq!(&rotated.pixels()[..3], &[0, 1, 0]);
        assert_eq!(rotated.sequence, 1);
        Ok(())
    }

    #[test]
    fn annotate_draws_clipped_box_outline() {
        let mut image = RgbImage::new(10, 10);
        annotate_boxes(
            &mut image,
            &[BoundingBox {
                label: "person".to_string(),
                score: 0.9,
                x: 2,
                y: 2,
                width: 20,
                height: 4,
            }],
        );
        assert_eq!(*image.get_pixel(2, 2), BOX_COLOR);
        assert_eq!(*image.get_pixel(9, 4), BOX_COLOR);
        assert_eq!(*image.get_pixel(5, 6), BOX_COLOR);
        // Interior and outside stay untouched.
        assert_eq!(*image.get_pixel(5, 4), Rgb([0, 0, 0]));
        assert_eq!(*image.get_pixel(5, 0), Rgb([0, 0, 0]));
    }

    #[test]
    fn encode_jpeg_produces_soi_marker() -> Result<()> {
        let image = gradient_frame(8, 8).to_image()?;
        let jpeg = encode_jpeg(&image, DEFAULT_JPEG_QUALITY)?;
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        Ok(())
    }
}
