use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use bytes::Bytes;
use image::RgbaImage;
use tracing::debug;

use crate::stream::ResultPayload;
use crate::Error;

/// The image currently on screen. Generation 0 is the blank placeholder.
#[derive(Debug)]
pub struct DisplayedImage {
    pub generation: u64,
    pub image: RgbaImage,
    pub payload: Bytes,
}

impl DisplayedImage {
    fn placeholder() -> Self {
        Self {
            generation: 0,
            image: RgbaImage::new(1, 1),
            payload: Bytes::new(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.generation == 0
    }
}

/// Holds only the latest decoded result; every successful `show` replaces it.
pub struct DisplaySink {
    current: ArcSwap<DisplayedImage>,
    generation: AtomicU64,
}

impl Default for DisplaySink {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplaySink {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(DisplayedImage::placeholder()),
            generation: AtomicU64::new(0),
        }
    }

    /// Decode `payload` and make it current. A payload that is not an image
    /// leaves the previous one in place.
    pub fn show(&self, payload: &ResultPayload) -> Result<u64, Error> {
        let image = image::load_from_memory(&payload.content)
            .map_err(Error::MalformedResult)?
            .to_rgba8();

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(
            generation,
            width = image.width(),
            height = image.height(),
            latency_ms = payload.received_at.elapsed().as_millis() as u64,
            "result displayed"
        );
        self.current.store(Arc::new(DisplayedImage {
            generation,
            image,
            payload: payload.content.clone(),
        }));
        Ok(generation)
    }

    pub fn current(&self) -> Arc<DisplayedImage> {
        self.current.load_full()
    }

    pub fn generation(&self) -> u64 {
        self.current.load().generation
    }
}
