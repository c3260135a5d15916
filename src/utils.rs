use crate::capture::frame::PixelFormat;
use serde::{Deserialize, Serialize};

// Detected capture device info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoundDevice {
    pub path: String,
    pub format: PixelFormat,
}

impl FoundDevice {
    pub fn new(path: String, format: PixelFormat) -> Self {
        Self { path, format }
    }
}

/// Auto-detect best capture device
#[cfg(feature = "v4l2")]
pub fn auto_detect_device() -> Result<FoundDevice, crate::Error> {
    use std::path::Path;
    use tracing::info;
    use v4l::{capability::Flags, video::Capture, Device, FourCC};

    info!("Auto-detecting capture devices...");

    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            continue;
        }
        let Ok(formats) = dev.enum_formats() else {
            continue;
        };

        // Prefer MJPEG, fall back to YUYV
        if formats.iter().any(|f| f.fourcc == FourCC::new(b"MJPG")) {
            info!("Found MJPEG device: {} - {}", path, caps.card);
            return Ok(FoundDevice::new(path, PixelFormat::Mjpeg));
        }
        if formats.iter().any(|f| f.fourcc == FourCC::new(b"YUYV")) {
            info!("Found YUYV device: {} - {}", path, caps.card);
            return Ok(FoundDevice::new(path, PixelFormat::Yuyv));
        }
    }

    Err(crate::Error::DeviceUnavailable(
        "No suitable capture device found".into(),
    ))
}

/// Render a derived rate for display; `-` when it is not finite.
pub fn format_rate(rate: f64) -> String {
    if rate.is_finite() {
        format!("{:.0}", rate)
    } else {
        "-".into()
    }
}
