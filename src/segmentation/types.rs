use anyhow::Result;
use image::RgbImage;

/// Alpha matte: grayscale values where 0.0 = background, 1.0 = foreground
/// Dimensions match the input image dimensions
pub type Matte = Vec<f32>;

/// Trait for segmentation models
/// Allows swapping between different backends (U²-Net, IS-Net, test doubles, etc.)
///
/// Implementations are shared across concurrent requests, so `segment` takes
/// `&self` and any interior state must be synchronised by the implementation.
pub trait SegmentationModel: Send + Sync {
    /// Process an image and return an alpha matte
    ///
    /// # Arguments
    /// * `image` - Input RGB image
    ///
    /// # Returns
    /// * Alpha matte with values 0.0-1.0, flattened in row-major order,
    ///   exactly `width * height` long
    fn segment(&self, image: &RgbImage) -> Result<Matte>;

    /// Get the model's native input dimensions
    ///
    /// Returns (width, height)
    fn input_size(&self) -> (u32, u32);

    /// Short identifier for logs
    fn name(&self) -> &str {
        "segmentation"
    }
}
