mod preprocess;
mod u2net;
pub mod types;

pub use preprocess::Preprocessor;
pub use types::{Matte, SegmentationModel};
pub use u2net::{U2Net, DEFAULT_INPUT_SIZE};

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

/// Create a default segmentation model (U²-Net)
pub fn create_default_model<P: AsRef<Path>>(
    model_path: P,
    input_size: u32,
) -> Result<Arc<dyn SegmentationModel>> {
    let model = U2Net::new(model_path, input_size)?;
    Ok(Arc::new(model))
}
