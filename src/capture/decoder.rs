use image::RgbImage;
use jpeg_decoder::{Decoder, PixelFormat as JpegPixelFormat};

use super::frame::PixelFormat;
use crate::Error;

/// Decode one device buffer into an RGB24 image of `width` x `height`.
///
/// MJPEG frames carry their own dimensions; those win over the requested ones.
pub fn decode_frame(data: &[u8], width: u32, height: u32, format: PixelFormat) -> Result<RgbImage, Error> {
    match format {
        PixelFormat::Mjpeg => decode_mjpeg(data),
        PixelFormat::Rgb24 => {
            let expected = rgb_len(width, height)?;
            if data.len() < expected {
                return Err(Error::Decode(format!(
                    "RGB frame length mismatch: expected {}, got {}",
                    expected,
                    data.len()
                )));
            }
            RgbImage::from_raw(width, height, data[..expected].to_vec())
                .ok_or_else(|| Error::Decode("RGB buffer does not fit frame".into()))
        }
        PixelFormat::Yuyv => yuyv_to_rgb(data, width, height),
    }
}

fn decode_mjpeg(data: &[u8]) -> Result<RgbImage, Error> {
    let mut decoder = Decoder::new(data);
    let pixels = decoder
        .decode()
        .map_err(|e| Error::Decode(e.to_string()))?;
    let info = decoder
        .info()
        .ok_or_else(|| Error::Decode("JPEG header missing".into()))?;
    let (width, height) = (u32::from(info.width), u32::from(info.height));

    let rgb = match info.pixel_format {
        JpegPixelFormat::RGB24 => pixels,
        JpegPixelFormat::L8 => pixels.iter().flat_map(|&l| [l, l, l]).collect(),
        other => {
            return Err(Error::Decode(format!(
                "unsupported JPEG pixel format {:?}",
                other
            )))
        }
    };

    RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| Error::Decode("JPEG pixel buffer does not fit frame".into()))
}

/// YUYV 4:2:2 (Y0 U Y1 V per pixel pair) to RGB24, BT.601 full range.
fn yuyv_to_rgb(data: &[u8], width: u32, height: u32) -> Result<RgbImage, Error> {
    let pixels = (width as usize)
        .checked_mul(height as usize)
        .ok_or_else(|| Error::Decode("YUYV frame dimensions overflow".into()))?;
    let expected = pixels * 2;
    if width % 2 != 0 || data.len() < expected {
        return Err(Error::Decode(format!(
            "YUYV frame length mismatch: expected {}, got {}",
            expected,
            data.len()
        )));
    }

    let mut rgb = Vec::with_capacity(pixels * 3);
    for chunk in data[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0], chunk[2]] {
            let y = y as f32;
            rgb.push(clamp_to_u8(y + 1.402 * v));
            rgb.push(clamp_to_u8(y - 0.344_136 * u - 0.714_136 * v));
            rgb.push(clamp_to_u8(y + 1.772 * u));
        }
    }

    RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| Error::Decode("YUYV buffer does not fit frame".into()))
}

fn rgb_len(width: u32, height: u32) -> Result<usize, Error> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| Error::Decode("RGB frame dimensions overflow".into()))
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::jpeg::JpegEncoder;
    use image::Rgb;

    #[test]
    fn yuyv_neutral_chroma_is_gray() {
        let data = [128u8, 128, 128, 128, 64, 128, 64, 128];
        let rgb = decode_frame(&data, 4, 1, PixelFormat::Yuyv).unwrap();
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([128, 128, 128]));
        assert_eq!(rgb.get_pixel(3, 0), &Rgb([64, 64, 64]));
    }

    #[test]
    fn yuyv_short_buffer_rejected() {
        let result = decode_frame(&[0u8; 6], 2, 2, PixelFormat::Yuyv);
        assert!(matches!(result, Err(Error::Decode(_))));
    }

    #[test]
    fn rgb_pass_through_validates_length() {
        let pixels = vec![7u8; 2 * 3 * 3];
        let rgb = decode_frame(&pixels, 2, 3, PixelFormat::Rgb24).unwrap();
        assert_eq!(rgb.dimensions(), (2, 3));
        assert!(decode_frame(&pixels[..5], 2, 3, PixelFormat::Rgb24).is_err());
    }

    #[test]
    fn mjpeg_uses_embedded_dimensions() {
        let img = RgbImage::from_pixel(24, 16, Rgb([200, 10, 10]));
        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(&mut buf, 90)
            .encode_image(&img)
            .unwrap();

        let rgb = decode_frame(&buf, 640, 480, PixelFormat::Mjpeg).unwrap();
        assert_eq!(rgb.dimensions(), (24, 16));
        let px = rgb.get_pixel(12, 8);
        assert!(px[0] > 150 && px[1] < 60);
    }

    #[test]
    fn mjpeg_garbage_is_decode_error() {
        let result = decode_frame(b"not a jpeg", 2, 2, PixelFormat::Mjpeg);
        assert!(matches!(result, Err(Error::Decode(_))));
    }
}
