use std::time::Instant;

use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Decoded camera image, valid as "current" only until the next one lands.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub image: RgbImage,

    /// Monotonic per-source counter
    pub sequence: u64,

    /// Capture timestamp for latency tracking
    pub captured_at: Instant,
}

impl RawFrame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self {
            image,
            sequence,
            captured_at: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgb24,
    Yuyv,
    Mjpeg,
}
