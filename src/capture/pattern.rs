//! Synthetic moving test pattern, for running without a camera

use std::thread::JoinHandle;
use std::time::Duration;

use image::{Rgb, RgbImage};
use tracing::info;

use super::source::FramePublisher;
use crate::Error;

/// Render one frame: diagonal gradient with a bright bar sweeping left to right.
pub fn render(width: u32, height: u32, phase: u32) -> RgbImage {
    let bar_width = (width / 16).max(1);
    let bar_x = if width == 0 { 0 } else { (phase * 4) % width };
    RgbImage::from_fn(width, height, |x, y| {
        if x >= bar_x && x < bar_x + bar_width {
            return Rgb([255, 255, 255]);
        }
        let r = (x * 255 / width.max(1)) as u8;
        let g = (y * 255 / height.max(1)) as u8;
        let b = (phase % 256) as u8;
        Rgb([r, g, b])
    })
}

pub(crate) fn spawn(
    width: u32,
    height: u32,
    fps: u32,
    publisher: FramePublisher,
) -> Result<JoinHandle<()>, Error> {
    if width == 0 || height == 0 {
        return Err(Error::DeviceUnavailable(format!(
            "pattern size {}x{} is empty",
            width, height
        )));
    }
    let period = Duration::from_secs_f64(1.0 / f64::from(fps.max(1)));

    std::thread::Builder::new()
        .name("pattern-capture".into())
        .spawn(move || {
            info!(width, height, fps, "test pattern source running");
            let mut phase = 0u32;
            while !publisher.is_stopped() {
                publisher.publish(render(width, height, phase));
                metrics::counter!("frames_captured").increment(1);
                phase = phase.wrapping_add(1);
                std::thread::sleep(period);
            }
        })
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_has_requested_size_and_moves() {
        let a = render(64, 48, 0);
        let b = render(64, 48, 5);
        assert_eq!(a.dimensions(), (64, 48));
        assert_eq!(a.get_pixel(0, 10), &Rgb([255, 255, 255]));
        assert_ne!(a, b);
    }
}
