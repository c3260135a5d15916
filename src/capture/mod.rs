pub mod decoder;
pub mod frame;
pub mod pattern;
pub mod source;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use frame::PixelFormat;
pub use frame::RawFrame;
pub use source::{FramePublisher, FrameSource, LiveSource};
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Capture;
