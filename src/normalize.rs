//! Center-crop to square, resize, lossy encode

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::RgbImage;
use tracing::instrument;

use crate::capture::RawFrame;
use crate::Error;

pub const DEFAULT_TARGET_SIZE: u32 = 512;
pub const DEFAULT_QUALITY: f32 = 0.7;

/// Upper bound on the encode buffer preallocation.
const MAX_PAYLOAD_HINT: usize = 4 << 20;

/// Square region of the source frame that survives the crop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub size: u32,
}

/// Centered square crop. Landscape frames lose their sides, everything else
/// (portrait and exact squares) loses top and bottom.
pub fn crop_region(width: u32, height: u32) -> Option<CropRegion> {
    if width == 0 || height == 0 {
        return None;
    }
    let region = if width > height {
        CropRegion {
            x: (width - height) / 2,
            y: 0,
            size: height,
        }
    } else {
        CropRegion {
            x: 0,
            y: (height - width) / 2,
            size: width,
        }
    };
    Some(region)
}

/// One normalized frame: the square preview and its encoded bytes.
#[derive(Debug, Clone)]
pub struct NormalizedFrame {
    pub sequence: u64,
    pub crop: CropRegion,
    pub preview: Arc<RgbImage>,
    pub payload: Bytes,
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    target_size: u32,
    quality: u8,
    filter: FilterType,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(DEFAULT_TARGET_SIZE, DEFAULT_QUALITY)
    }
}

impl Normalizer {
    /// `quality` is the lossy factor in `(0, 1]`.
    pub fn new(target_size: u32, quality: f32) -> Self {
        Self {
            target_size: target_size.max(1),
            quality: jpeg_quality(quality),
            filter: FilterType::Triangle,
        }
    }

    pub fn target_size(&self) -> u32 {
        self.target_size
    }

    pub fn jpeg_quality(&self) -> u8 {
        self.quality
    }

    /// Crop, resize and encode `frame`. `Ok(None)` when the frame has no pixels.
    #[instrument(skip(self, frame), fields(sequence = frame.sequence), level = "debug")]
    pub fn normalize(&self, frame: &RawFrame) -> Result<Option<NormalizedFrame>, Error> {
        let Some(crop) = crop_region(frame.width(), frame.height()) else {
            return Ok(None);
        };
        let start = Instant::now();

        let view = imageops::crop_imm(&frame.image, crop.x, crop.y, crop.size, crop.size);
        let square = imageops::resize(&*view, self.target_size, self.target_size, self.filter);

        let mut buf = Vec::with_capacity(payload_capacity(self.target_size));
        JpegEncoder::new_with_quality(&mut buf, self.quality)
            .encode_image(&square)
            .map_err(Error::Encode)?;

        metrics::histogram!("normalize_time_us").record(start.elapsed().as_micros() as f64);

        Ok(Some(NormalizedFrame {
            sequence: frame.sequence,
            crop,
            preview: Arc::new(square),
            payload: Bytes::from(buf),
        }))
    }
}

/// Encoded size guess for a `size` square: a quarter byte per pixel, capped.
fn payload_capacity(size: u32) -> usize {
    let side = size as usize;
    (side.saturating_mul(side) / 4).min(MAX_PAYLOAD_HINT)
}

fn jpeg_quality(factor: f32) -> u8 {
    if !factor.is_finite() {
        return (DEFAULT_QUALITY * 100.0).round() as u8;
    }
    (factor * 100.0).round().clamp(1.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn frame(width: u32, height: u32) -> RawFrame {
        RawFrame::new(RgbImage::from_pixel(width, height, Rgb([90, 120, 30])), 1)
    }

    #[test]
    fn landscape_crops_sides() {
        assert_eq!(
            crop_region(1920, 1080),
            Some(CropRegion { x: 420, y: 0, size: 1080 })
        );
    }

    #[test]
    fn portrait_crops_top_and_bottom() {
        assert_eq!(
            crop_region(480, 640),
            Some(CropRegion { x: 0, y: 80, size: 480 })
        );
    }

    #[test]
    fn square_takes_portrait_branch() {
        assert_eq!(
            crop_region(300, 300),
            Some(CropRegion { x: 0, y: 0, size: 300 })
        );
    }

    #[test]
    fn empty_frame_has_no_crop() {
        assert_eq!(crop_region(0, 480), None);
        assert_eq!(crop_region(640, 0), None);
    }

    #[test]
    fn hd_frame_normalizes_to_target_square() {
        let normalizer = Normalizer::default();
        let out = normalizer.normalize(&frame(1920, 1080)).unwrap().unwrap();

        assert_eq!(out.crop, CropRegion { x: 420, y: 0, size: 1080 });
        assert_eq!(out.preview.dimensions(), (512, 512));
        let decoded = image::load_from_memory(&out.payload).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (512, 512));
        assert_eq!(&out.payload[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn portrait_frame_normalizes_to_target_square() {
        let normalizer = Normalizer::new(64, 0.7);
        let out = normalizer.normalize(&frame(480, 640)).unwrap().unwrap();
        assert_eq!(out.crop, CropRegion { x: 0, y: 80, size: 480 });
        assert_eq!(out.preview.dimensions(), (64, 64));
    }

    #[test]
    fn crop_keeps_only_the_center() {
        // Red side bands on a 30x10 frame; the centered 10x10 square is blue.
        let image = RgbImage::from_fn(30, 10, |x, _| {
            if (10..20).contains(&x) {
                Rgb([0, 0, 255])
            } else {
                Rgb([255, 0, 0])
            }
        });
        let normalizer = Normalizer::new(8, 1.0);
        let out = normalizer.normalize(&RawFrame::new(image, 3)).unwrap().unwrap();

        assert_eq!(out.sequence, 3);
        assert!(out.preview.pixels().all(|p| p[0] == 0 && p[2] == 255));
    }

    #[test]
    fn crop_is_centered_and_in_bounds_for_any_shape() {
        let shapes = [
            (641, 480),
            (480, 641),
            (1, 1000),
            (1000, 1),
            (1, 1),
            (2, 1),
            (1, 2),
            (3, 2),
            (17, 5),
            (5, 17),
            (640, 480),
            (1920, 1080),
        ];
        let normalizer = Normalizer::new(24, 0.7);

        for (w, h) in shapes {
            let crop = crop_region(w, h).unwrap();
            let expected = if w > h {
                CropRegion { x: (w - h) / 2, y: 0, size: h }
            } else {
                CropRegion { x: 0, y: (h - w) / 2, size: w }
            };
            assert_eq!(crop, expected, "{}x{}", w, h);
            assert_eq!(crop.size, w.min(h), "{}x{}", w, h);
            assert!(crop.x + crop.size <= w, "{}x{} overflows width", w, h);
            assert!(crop.y + crop.size <= h, "{}x{} overflows height", w, h);

            let out = normalizer.normalize(&frame(w, h)).unwrap().unwrap();
            assert_eq!(out.crop, crop);
            assert_eq!(out.preview.dimensions(), (24, 24));
            let decoded = image::load_from_memory(&out.payload).unwrap();
            assert_eq!((decoded.width(), decoded.height()), (24, 24), "{}x{}", w, h);
        }
    }

    #[test]
    fn payload_hint_never_overflows() {
        assert_eq!(payload_capacity(512), 65_536);
        assert_eq!(payload_capacity(1), 0);
        assert_eq!(payload_capacity(65_536), MAX_PAYLOAD_HINT);
        assert_eq!(payload_capacity(u32::MAX), MAX_PAYLOAD_HINT);
    }

    #[test]
    fn empty_frame_is_skipped() {
        let normalizer = Normalizer::default();
        assert!(normalizer.normalize(&frame(0, 0)).unwrap().is_none());
    }

    #[test]
    fn quality_factor_maps_to_percent() {
        assert_eq!(Normalizer::new(512, 0.7).jpeg_quality(), 70);
        assert_eq!(Normalizer::new(512, 0.0).jpeg_quality(), 1);
        assert_eq!(Normalizer::new(512, 3.0).jpeg_quality(), 100);
        assert_eq!(Normalizer::new(512, f32::NAN).jpeg_quality(), 70);
    }
}
