//! Live frame source: a latest-frame slot filled by a capture worker thread

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use arc_swap::ArcSwapOption;
use image::RgbImage;
use tracing::{info, warn};

use super::frame::RawFrame;
use crate::{CaptureConfig, Error, SourceKind};

/// Anything that can hand out the current camera frame on demand.
pub trait FrameSource: Send + Sync {
    /// The most recent frame, or `None` before the device is ready.
    fn current_frame(&self) -> Option<Arc<RawFrame>>;
}

#[derive(Default)]
struct FrameSlot {
    current: ArcSwapOption<RawFrame>,
    sequence: AtomicU64,
}

/// Write side of a [`LiveSource`]. Each publish replaces the current frame.
#[derive(Clone)]
pub struct FramePublisher {
    slot: Arc<FrameSlot>,
    stop: Arc<AtomicBool>,
}

impl FramePublisher {
    pub fn publish(&self, image: RgbImage) -> u64 {
        let sequence = self.slot.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        self.slot
            .current
            .store(Some(Arc::new(RawFrame::new(image, sequence))));
        sequence
    }

    /// Set once the owning source is dropped; workers should exit.
    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

struct CaptureWorker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("capture worker panicked");
            }
        }
    }
}

/// Frame source backed by a shared latest-frame slot.
pub struct LiveSource {
    slot: Arc<FrameSlot>,
    _worker: Option<CaptureWorker>,
}

impl LiveSource {
    /// Acquire the configured device and start its capture worker.
    pub fn acquire(config: &CaptureConfig) -> Result<Self, Error> {
        let (source, publisher) = Self::manual();
        let handle = match config.source {
            SourceKind::V4l2 => spawn_v4l2(config.clone(), publisher.clone())?,
            SourceKind::Pattern => super::pattern::spawn(
                config.width,
                config.height,
                config.fps,
                publisher.clone(),
            )?,
        };
        info!(source = ?config.source, "frame source acquired");

        Ok(Self {
            _worker: Some(CaptureWorker {
                stop: publisher.stop,
                handle: Some(handle),
            }),
            ..source
        })
    }

    /// A source that never becomes ready.
    pub fn inert() -> Self {
        Self {
            slot: Arc::new(FrameSlot::default()),
            _worker: None,
        }
    }

    /// A source fed by the caller through the returned publisher.
    pub fn manual() -> (Self, FramePublisher) {
        let source = Self::inert();
        let publisher = FramePublisher {
            slot: source.slot.clone(),
            stop: Arc::new(AtomicBool::new(false)),
        };
        (source, publisher)
    }

    pub fn frames_seen(&self) -> u64 {
        self.slot.sequence.load(Ordering::Relaxed)
    }
}

impl FrameSource for LiveSource {
    fn current_frame(&self) -> Option<Arc<RawFrame>> {
        self.slot.current.load_full()
    }
}

#[cfg(feature = "v4l2")]
fn spawn_v4l2(mut config: CaptureConfig, publisher: FramePublisher) -> Result<JoinHandle<()>, Error> {
    use std::time::Duration;

    if config.device.is_empty() {
        let found = crate::utils::auto_detect_device()?;
        config.device = found.path;
        config.format = found.format;
    }

    // The device is opened on the worker thread; report the outcome back before returning.
    let (ready_tx, ready_rx) = flume::bounded::<Result<(), Error>>(1);
    let handle = std::thread::Builder::new()
        .name("v4l2-capture".into())
        .spawn(move || {
            let mut capture = match super::v4l2::V4l2Capture::open(&config) {
                Ok(capture) => {
                    let _ = ready_tx.send(Ok(()));
                    capture
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            while !publisher.is_stopped() {
                match capture.next_frame() {
                    Ok(image) => {
                        publisher.publish(image);
                        metrics::counter!("frames_captured").increment(1);
                    }
                    Err(e) => {
                        warn!(error = %e, "capture error");
                        std::thread::sleep(Duration::from_millis(10));
                    }
                }
            }
            info!("capture worker stopped");
        })
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(handle),
        Ok(Err(e)) => {
            let _ = handle.join();
            Err(e)
        }
        Err(_) => {
            let _ = handle.join();
            Err(Error::DeviceUnavailable("capture worker exited".into()))
        }
    }
}

#[cfg(not(feature = "v4l2"))]
fn spawn_v4l2(_config: CaptureConfig, _publisher: FramePublisher) -> Result<JoinHandle<()>, Error> {
    Err(Error::DeviceUnavailable(
        "built without the `v4l2` feature".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn inert_source_never_ready() {
        let source = LiveSource::inert();
        assert!(source.current_frame().is_none());
        assert_eq!(source.frames_seen(), 0);
    }

    #[test]
    fn publish_replaces_current_frame() {
        let (source, publisher) = LiveSource::manual();
        publisher.publish(RgbImage::from_pixel(4, 2, Rgb([1, 2, 3])));
        publisher.publish(RgbImage::from_pixel(8, 6, Rgb([4, 5, 6])));

        let frame = source.current_frame().unwrap();
        assert_eq!(frame.sequence, 2);
        assert_eq!((frame.width(), frame.height()), (8, 6));
        assert_eq!(source.frames_seen(), 2);
    }

    #[test]
    fn pattern_source_becomes_ready_and_stops_on_drop() {
        let config = CaptureConfig {
            source: SourceKind::Pattern,
            width: 32,
            height: 24,
            fps: 200,
            ..CaptureConfig::default()
        };
        let source = LiveSource::acquire(&config).unwrap();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while source.current_frame().is_none() && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let frame = source.current_frame().unwrap();
        assert_eq!((frame.width(), frame.height()), (32, 24));
        drop(source);
    }

    #[test]
    fn missing_device_is_unavailable() {
        let config = CaptureConfig {
            source: SourceKind::V4l2,
            device: "/dev/framecast-does-not-exist".into(),
            ..CaptureConfig::default()
        };
        let result = LiveSource::acquire(&config);
        assert!(matches!(result, Err(Error::DeviceUnavailable(_))));
    }
}
