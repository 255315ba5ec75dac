use anyhow::{Context, Result};
use bgremover::segmentation;
use bgremover::server::{self, ServerConfig};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about = "Remove image backgrounds over HTTP", long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 8000)]
    port: u16,

    /// Path to segmentation model (ONNX file, U²-Net family)
    #[arg(short, long, default_value = "models/u2net.onnx")]
    model: String,

    /// Square input resolution of the model (320 for u2net, 1024 for isnet)
    #[arg(long, default_value_t = segmentation::DEFAULT_INPUT_SIZE)]
    model_size: u32,

    /// Largest accepted upload in megabytes
    #[arg(long, default_value_t = 10)]
    max_upload_mb: usize,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("bgremover starting");

    tracing::info!("Loading segmentation model from {}", args.model);
    let model = segmentation::create_default_model(&args.model, args.model_size)
        .context("Failed to load segmentation model")?;
    let (width, height) = model.input_size();
    tracing::info!(
        "Segmentation model '{}' ready ({}x{})",
        model.name(),
        width,
        height
    );

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        max_upload_bytes: args.max_upload_mb.saturating_mul(1024 * 1024),
    };

    server::serve(config, model).await
}
