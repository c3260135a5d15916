//! V4L2 capture with memory-mapped buffers

use image::RgbImage;
use tracing::{debug, info, instrument};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::decoder;
use super::frame::PixelFormat;
use crate::{CaptureConfig, Error};

/// Blocking V4L2 reader. Lives on the capture worker thread.
pub struct V4l2Capture {
    _device: Box<Device>,
    stream: MmapStream<'static>,
    width: u32,
    height: u32,
    format: PixelFormat,
}

impl V4l2Capture {
    /// Open the device, negotiate the format and start streaming.
    pub fn open(config: &CaptureConfig) -> Result<Self, Error> {
        info!("Initializing V4L2 capture: {}", config.device);

        let unavailable = |e: std::io::Error| Error::DeviceUnavailable(format!("{}: {}", config.device, e));

        let device = Device::with_path(&config.device).map_err(unavailable)?;

        let caps = device.query_caps().map_err(unavailable)?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(Error::DeviceUnavailable(format!(
                "{} doesn't support video capture",
                config.device
            )));
        }

        let mut fmt = device.format().map_err(unavailable)?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = fourcc(config.format);

        // Drivers may round the size; trust what comes back.
        let fmt = device.set_format(&fmt).map_err(unavailable)?;
        if fmt.fourcc != fourcc(config.format) {
            return Err(Error::UnsupportedFormat(config.format));
        }

        let stream = MmapStream::with_buffers(&device, Type::VideoCapture, config.buffer_count.max(1))
            .map_err(unavailable)?;
        info!(
            width = fmt.width,
            height = fmt.height,
            buffers = config.buffer_count,
            "capture stream started"
        );

        Ok(Self {
            _device: Box::new(device),
            stream,
            width: fmt.width,
            height: fmt.height,
            format: config.format,
        })
    }

    /// Dequeue the next buffer and decode it to RGB.
    #[instrument(skip(self), level = "trace")]
    pub fn next_frame(&mut self) -> Result<RgbImage, Error> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

        let used = (meta.bytesused as usize).min(buf.len());
        let data = if used == 0 { buf } else { &buf[..used] };
        debug!(sequence = meta.sequence, bytes = data.len(), "dequeued buffer");

        decoder::decode_frame(data, self.width, self.height, self.format)
    }
}

pub(crate) fn fourcc(format: PixelFormat) -> FourCC {
    match format {
        PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
        PixelFormat::Yuyv => FourCC::new(b"YUYV"),
        PixelFormat::Rgb24 => FourCC::new(b"RGB3"),
    }
}
