use anyhow::{ensure, Result};
use image::{imageops, GrayImage, RgbImage};
use ndarray::Array4;

/// ImageNet normalization constants
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Preprocessor for converting RGB images to model input tensors
pub struct Preprocessor {
    target_width: u32,
    target_height: u32,
}

impl Preprocessor {
    pub fn new(target_width: u32, target_height: u32) -> Self {
        Self {
            target_width,
            target_height,
        }
    }

    /// Preprocess an RGB image into a normalized NCHW tensor
    ///
    /// Steps:
    /// 1. Resize to target dimensions
    /// 2. Scale by the brightest channel value of the resized image
    /// 3. Normalize with ImageNet mean/std
    /// 4. Transpose from HWC to NCHW format
    ///
    /// Returns: Array4<f32> with shape [1, 3, height, width]
    pub fn preprocess(&self, image: &RgbImage) -> Array4<f32> {
        let _span = tracing::debug_span!("preprocess").entered();

        let resized = if image.dimensions() != (self.target_width, self.target_height) {
            imageops::resize(
                image,
                self.target_width,
                self.target_height,
                imageops::FilterType::Lanczos3,
            )
        } else {
            image.clone()
        };

        // An all-black image has no maximum to scale by
        let max_value = resized.as_raw().iter().copied().max().unwrap_or(0).max(1) as f32;

        let (width, height) = resized.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                let value = pixel[c] as f32 / max_value;
                tensor[[0, c, y as usize, x as usize]] =
                    (value - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
            }
        }

        tensor
    }

    /// Min-max normalize a raw prediction map into [0, 1]
    ///
    /// A constant prediction carries no foreground signal and maps to zeros.
    pub fn normalize_prediction(prediction: &[f32]) -> Vec<f32> {
        let (min, max) = prediction
            .iter()
            .fold((f32::MAX, f32::MIN), |(min, max), &v| (min.min(v), max.max(v)));

        let range = max - min;
        if !range.is_finite() || range <= f32::EPSILON {
            return vec![0.0; prediction.len()];
        }

        prediction.iter().map(|&v| (v - min) / range).collect()
    }

    /// Postprocess model output matte back to original image dimensions
    ///
    /// # Arguments
    /// * `matte` - Flattened matte at model resolution
    /// * `matte_width` - Width of the matte
    /// * `matte_height` - Height of the matte
    /// * `target_width` - Desired output width
    /// * `target_height` - Desired output height
    ///
    /// Returns: Resized matte flattened in row-major order
    pub fn postprocess_matte(
        matte: &[f32],
        matte_width: u32,
        matte_height: u32,
        target_width: u32,
        target_height: u32,
    ) -> Result<Vec<f32>> {
        let _span = tracing::debug_span!("postprocess").entered();

        ensure!(
            matte.len() == (matte_width * matte_height) as usize,
            "matte has {} values, expected {}x{}",
            matte.len(),
            matte_width,
            matte_height
        );

        // If dimensions match, no resize needed
        if matte_width == target_width && matte_height == target_height {
            return Ok(matte.to_vec());
        }

        let gray_image = Self::matte_to_gray(matte, matte_width, matte_height);

        let resized = imageops::resize(
            &gray_image,
            target_width,
            target_height,
            imageops::FilterType::Lanczos3,
        );

        Ok(resized.pixels().map(|p| p[0] as f32 / 255.0).collect())
    }

    /// Convert matte to a grayscale image (white = foreground)
    pub fn matte_to_gray(matte: &[f32], width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            let idx = (y * width + x) as usize;
            let value = matte.get(idx).copied().unwrap_or(0.0);
            image::Luma([(value * 255.0).round().clamp(0.0, 255.0) as u8])
        })
    }
}
