//! Model manager binary

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use infermesh_core::config::ModelManagerConfig;
use infermesh_model_manager::{api, ModelManager};

#[derive(Parser, Debug)]
#[command(name = "infermesh-model-manager")]
#[command(about = "Content-addressed model storage for InferMesh")]
struct Args {
    /// Path to a JSON config file
    #[arg(long)]
    config: Option<String>,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Directory to store model blobs under
    #[arg(long)]
    storage_path: Option<String>,

    /// Maximum model size ("1GB", "500MB", or bytes)
    #[arg(long)]
    max_model_size: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path))?;
            serde_json::from_str::<ModelManagerConfig>(&raw)
                .with_context(|| format!("parsing config file {}", path))?
        }
        None => ModelManagerConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(path) = args.storage_path {
        config.storage_path = path;
    }
    if let Some(size) = args.max_model_size {
        config.max_model_size = size;
    }

    let addr = format!("0.0.0.0:{}", config.port);
    let manager = Arc::new(ModelManager::new(config)?);

    tracing::info!("model manager listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    axum::serve(listener, api::router(manager)).await?;

    Ok(())
}
