pub mod sink;

#[cfg(feature = "sdl-display")]
pub mod window;

pub use sink::{DisplaySink, DisplayedImage};

#[cfg(feature = "sdl-display")]
pub use window::Sdl2Display;
