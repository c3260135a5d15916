use crate::capture::frame::PixelFormat;

/// Errors raised by the capture, normalize, stream and display stages.
///
/// Only configuration errors are meant to stop the process. The running
/// pipeline logs and counts everything else and keeps ticking.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Camera permission denied, no device, or the device refused the format.
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),
    /// A frame could not be handed to the streaming channel.
    #[error("channel send failed: {0}")]
    ChannelSend(String),
    /// The streaming channel has shut down for good.
    #[error("channel closed")]
    ChannelClosed,
    /// A result payload is not a decodable image.
    #[error("malformed result payload: {0}")]
    MalformedResult(#[source] image::ImageError),
    /// A socket message did not match the expected MessagePack envelope.
    #[error("envelope codec failed: {0}")]
    Envelope(String),
    #[error("frame encode failed: {0}")]
    Encode(#[source] image::ImageError),
    #[error("frame decode failed: {0}")]
    Decode(String),
    #[error("unsupported pixel format: {0:?}")]
    UnsupportedFormat(PixelFormat),
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),
}
