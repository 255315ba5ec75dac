use super::preprocess::Preprocessor;
use super::types::{Matte, SegmentationModel};
use anyhow::{anyhow, bail, ensure, Context, Result};
use image::RgbImage;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Native resolution of u2net, u2netp and silueta
pub const DEFAULT_INPUT_SIZE: u32 = 320;

/// U²-Net family salient object segmentation model
///
/// Covers the u2net, u2netp, silueta and isnet-general-use exports. All of them
/// take a single `[1, 3, H, W]` image and return the refined prediction as the
/// first output.
pub struct U2Net {
    session: Arc<Mutex<Session>>,
    input_name: String,
    preprocessor: Preprocessor,
    width: u32,
    height: u32,
    name: String,
}

impl U2Net {
    /// Create a new U²-Net model from an ONNX file
    ///
    /// # Arguments
    /// * `model_path` - Path to the ONNX model file
    /// * `input_size` - Square input resolution the model was exported at
    ///   (320 for u2net/u2netp/silueta, 1024 for isnet-general-use)
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let path = model_path.as_ref();

        ensure!(input_size > 0, "Model input size must be positive");

        if !path.exists() {
            bail!("Segmentation model not found: {}", path.display());
        }

        tracing::info!("Loading U²-Net model from {}", path.display());

        let builder = Session::builder().context("Failed to create session builder")?;

        #[cfg(feature = "cuda")]
        let builder = builder
            .with_execution_providers([
                ort::execution_providers::TensorRTExecutionProvider::default().build(),
                ort::execution_providers::CUDAExecutionProvider::default().build(),
            ])
            .context("Failed to register GPU execution providers")?;

        let session = builder
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .context("Failed to set optimization level")?
            .with_intra_threads(4)
            .context("Failed to set intra threads")?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        let input = session
            .inputs
            .first()
            .ok_or_else(|| anyhow!("Model {} declares no inputs", path.display()))?;
        let input_name = input.name.clone();
        tracing::debug!("Model input type: {:?}", input.input_type);

        let (width, height) = (input_size, input_size);

        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "u2net".to_string());

        tracing::info!(
            "U²-Net model '{}' loaded: input '{}' at {}x{}",
            name,
            input_name,
            width,
            height
        );

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            input_name,
            preprocessor: Preprocessor::new(width, height),
            width,
            height,
            name,
        })
    }
}

impl SegmentationModel for U2Net {
    fn segment(&self, image: &RgbImage) -> Result<Matte> {
        let _span = tracing::debug_span!("u2net_segment").entered();

        let (image_width, image_height) = image.dimensions();
        ensure!(
            image_width > 0 && image_height > 0,
            "Cannot segment an empty {}x{} image",
            image_width,
            image_height
        );

        let input_tensor = self.preprocessor.preprocess(image);
        let input_value =
            Value::from_array(input_tensor).context("Failed to create input tensor")?;

        let (prediction, matte_width, matte_height) = {
            let mut session = self
                .session
                .lock()
                .map_err(|_| anyhow!("Segmentation session lock poisoned"))?;

            let _infer_span = tracing::debug_span!("inference").entered();
            let outputs = session
                .run(ort::inputs![self.input_name.as_str() => input_value])
                .context("Failed to run inference")?;

            // The first output (d0) is the fused, most refined prediction
            let pred = outputs[0]
                .try_extract_array::<f32>()
                .context("Failed to extract prediction tensor")?;

            // Expected shape: [1, 1, H, W]
            let shape = pred.shape().to_vec();
            let (h, w) = match shape.as_slice() {
                [.., h, w] => (*h, *w),
                _ => bail!("Unexpected prediction shape: {:?}", shape),
            };
            let plane = h * w;
            let values: Vec<f32> = pred.iter().take(plane).copied().collect();
            ensure!(
                values.len() == plane,
                "Prediction tensor too small for shape {:?}",
                shape
            );

            (values, w as u32, h as u32)
        };

        let normalized = Preprocessor::normalize_prediction(&prediction);

        Preprocessor::postprocess_matte(
            &normalized,
            matte_width,
            matte_height,
            image_width,
            image_height,
        )
    }

    fn input_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
