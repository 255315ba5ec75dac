//! Background removal web service
//!
//! Accepts an uploaded image over HTTP, runs a salient object segmentation
//! model over it and returns the foreground as a transparent PNG.

pub mod error;
pub mod segmentation;
pub mod server;
pub mod transform;

pub use error::TransformError;
pub use segmentation::{Matte, SegmentationModel};
pub use server::{router, serve, AppState, ServerConfig};
pub use transform::{remove_background, RemovalOptions};
