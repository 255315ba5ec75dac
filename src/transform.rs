//! Decode an upload, cut out the foreground and re-encode it as PNG

use crate::error::TransformError;
use crate::segmentation::{Matte, Preprocessor, SegmentationModel};
use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader, RgbaImage};
use serde::Deserialize;
use std::io::Cursor;
use std::time::{Duration, Instant};

/// Per-request switches for the transform
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct RemovalOptions {
    /// Return the grayscale matte instead of the cut-out image
    #[serde(default)]
    pub only_mask: bool,
}

/// JPEG end-of-image marker
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

/// Decode raw upload bytes, guessing the format from magic bytes
///
/// EXIF orientation is applied so the matte lines up with what the user sees.
pub fn decode_upload(bytes: &[u8]) -> Result<DynamicImage, TransformError> {
    if bytes.is_empty() {
        return Err(TransformError::EmptyUpload);
    }

    let decode_err = |e: image::ImageError| TransformError::Decode(e.to_string());

    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| TransformError::Decode(e.to_string()))?;

    // The JPEG decoder fills a cut-off scan with gray instead of failing
    if reader.format() == Some(ImageFormat::Jpeg) && !has_jpeg_eoi(bytes) {
        return Err(TransformError::Decode(
            "JPEG data is truncated (missing end-of-image marker)".to_string(),
        ));
    }

    let mut decoder = reader.into_decoder().map_err(decode_err)?;
    let orientation = decoder.orientation().map_err(decode_err)?;
    let mut image = DynamicImage::from_decoder(decoder).map_err(decode_err)?;
    image.apply_orientation(orientation);

    Ok(image)
}

/// Whether JPEG data ends with EOI, ignoring zero padding after it
fn has_jpeg_eoi(bytes: &[u8]) -> bool {
    let end = bytes.iter().rposition(|&b| b != 0x00).map_or(0, |i| i + 1);
    bytes[..end].ends_with(&JPEG_EOI)
}

/// Cut the foreground out onto a transparent background
///
/// Color and alpha are both scaled by the matte, so removed pixels end up
/// transparent black. Transparency the source already had is kept.
pub fn apply_matte(image: &DynamicImage, matte: &Matte) -> RgbaImage {
    let mut output = image.to_rgba8();
    let width = output.width();

    for (x, y, pixel) in output.enumerate_pixels_mut() {
        let idx = (y * width + x) as usize;
        let mask_alpha = matte.get(idx).copied().unwrap_or(0.0).clamp(0.0, 1.0);
        for channel in pixel.0.iter_mut() {
            *channel = (*channel as f32 * mask_alpha).round() as u8;
        }
    }

    output
}

/// Encode an image as PNG bytes
pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, TransformError> {
    let mut buffer = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .map_err(|e| TransformError::Encode(e.to_string()))?;
    Ok(buffer)
}

/// Run the full decode, segment, composite and encode pipeline on one upload
pub fn remove_background(
    model: &dyn SegmentationModel,
    bytes: &[u8],
    options: RemovalOptions,
) -> Result<Vec<u8>, TransformError> {
    let _span = tracing::debug_span!("remove_background", model = model.name()).entered();
    let start = Instant::now();

    let decode_start = Instant::now();
    let image = decode_upload(bytes)?;
    let decode_time = decode_start.elapsed();

    let (width, height) = (image.width(), image.height());

    let segment_start = Instant::now();
    let matte = model
        .segment(&image.to_rgb8())
        .map_err(|e| TransformError::Segmentation(format!("{:#}", e)))?;
    let segment_time = segment_start.elapsed();

    if matte.len() != (width as usize) * (height as usize) {
        return Err(TransformError::Segmentation(format!(
            "matte has {} values for a {}x{} image",
            matte.len(),
            width,
            height
        )));
    }

    let encode_start = Instant::now();
    let result = if options.only_mask {
        DynamicImage::ImageLuma8(Preprocessor::matte_to_gray(&matte, width, height))
    } else {
        DynamicImage::ImageRgba8(apply_matte(&image, &matte))
    };
    let png = encode_png(&result)?;
    let encode_time = encode_start.elapsed();

    tracing::debug!(
        "decode={:.1}ms, segment={:.1}ms, encode={:.1}ms",
        millis(decode_time),
        millis(segment_time),
        millis(encode_time)
    );
    tracing::info!(
        "Removed background from {}x{} image ({} -> {} bytes) in {:.1}ms",
        width,
        height,
        bytes.len(),
        png.len(),
        millis(start.elapsed())
    );

    Ok(png)
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use image::{Rgb, RgbImage, Rgba};

    /// Foreground is the left half of the image
    struct LeftHalf;

    impl SegmentationModel for LeftHalf {
        fn segment(&self, image: &RgbImage) -> Result<Matte> {
            let (w, h) = image.dimensions();
            Ok((0..h)
                .flat_map(|_| (0..w).map(move |x| if x < w / 2 { 1.0 } else { 0.0 }))
                .collect())
        }

        fn input_size(&self) -> (u32, u32) {
            (320, 320)
        }
    }

    struct Failing;

    impl SegmentationModel for Failing {
        fn segment(&self, _image: &RgbImage) -> Result<Matte> {
            anyhow::bail!("model exploded")
        }

        fn input_size(&self) -> (u32, u32) {
            (320, 320)
        }
    }

    fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([10, 200, 30])));
        let mut buffer = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Jpeg)
            .unwrap();
        buffer
    }

    #[test]
    fn empty_upload_is_rejected() {
        assert!(matches!(decode_upload(&[]), Err(TransformError::EmptyUpload)));
    }

    #[test]
    fn truncated_jpeg_fails_to_decode() {
        let data = jpeg_bytes(64, 64);
        for keep in [data.len() / 2, data.len() * 9 / 10, data.len() - 1] {
            let err = decode_upload(&data[..keep]).unwrap_err();
            assert!(matches!(err, TransformError::Decode(_)), "kept {} bytes", keep);
        }
    }

    #[test]
    fn complete_jpeg_with_zero_padding_decodes() {
        let mut data = jpeg_bytes(16, 8);
        data.extend_from_slice(&[0, 0, 0, 0]);

        let image = decode_upload(&data).unwrap();
        assert_eq!((image.width(), image.height()), (16, 8));
    }

    #[test]
    fn exif_orientation_is_applied() {
        // APP1 segment carrying a big-endian TIFF IFD with Orientation = 6 (rotate 90 CW)
        let app1: [u8; 36] = [
            0xFF, 0xE1, 0x00, 0x22, b'E', b'x', b'i', b'f', 0x00, 0x00, b'M', b'M', 0x00, 0x2A,
            0x00, 0x00, 0x00, 0x08, 0x00, 0x01, 0x01, 0x12, 0x00, 0x03, 0x00, 0x00, 0x00, 0x01,
            0x00, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        let plain = jpeg_bytes(40, 20);
        let mut data = plain[..2].to_vec();
        data.extend_from_slice(&app1);
        data.extend_from_slice(&plain[2..]);

        let image = decode_upload(&data).unwrap();
        assert_eq!((image.width(), image.height()), (20, 40));
    }

    #[test]
    fn garbage_upload_fails_to_decode() {
        let err = decode_upload(b"definitely not an image").unwrap_err();
        assert!(matches!(err, TransformError::Decode(_)));
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn apply_matte_adds_alpha_to_rgb() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 1, Rgb([1, 2, 3])));
        let out = apply_matte(&image, &vec![1.0, 0.0]);

        assert_eq!(out.get_pixel(0, 0), &Rgba([1, 2, 3, 255]));
        assert_eq!(out.get_pixel(1, 0), &Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn apply_matte_scales_color_with_partial_matte() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(1, 1, Rgb([200, 100, 50])));
        let out = apply_matte(&image, &vec![0.5]);

        assert_eq!(out.get_pixel(0, 0), &Rgba([100, 50, 25, 128]));
    }

    #[test]
    fn apply_matte_keeps_existing_transparency() {
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(1, 1, Rgba([9, 9, 9, 128])));
        let out = apply_matte(&image, &vec![0.5]);

        assert_eq!(out.get_pixel(0, 0)[3], 64);
    }

    #[test]
    fn pipeline_preserves_dimensions_and_cuts_background() {
        let png = remove_background(&LeftHalf, &jpeg_bytes(300, 150), RemovalOptions::default())
            .unwrap();

        let decoded = image::load_from_memory_with_format(&png, ImageFormat::Png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (300, 150));

        let rgba = decoded.to_rgba8();
        assert_eq!(rgba.get_pixel(10, 75)[3], 255);
        assert_eq!(rgba.get_pixel(290, 75)[3], 0);
    }

    #[test]
    fn only_mask_returns_grayscale_matte() {
        let options = RemovalOptions { only_mask: true };
        let png = remove_background(&LeftHalf, &jpeg_bytes(40, 20), options).unwrap();

        let decoded = image::load_from_memory_with_format(&png, ImageFormat::Png).unwrap();
        let gray = decoded.to_luma8();
        assert_eq!(gray.dimensions(), (40, 20));
        assert_eq!(gray.get_pixel(0, 0)[0], 255);
        assert_eq!(gray.get_pixel(39, 19)[0], 0);
    }

    #[test]
    fn model_failure_surfaces_its_message() {
        let err = remove_background(&Failing, &jpeg_bytes(8, 8), RemovalOptions::default())
            .unwrap_err();

        assert!(matches!(err, TransformError::Segmentation(_)));
        assert!(err.to_string().contains("model exploded"));
    }
}
