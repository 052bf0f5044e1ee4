//! Inference worker binary
//!
//! Boots a worker, optionally preloads models, registers with an
//! orchestrator when one is configured, and serves the worker API.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use infermesh_core::config::WorkerConfig;
use infermesh_core::transport::HttpTransport;
use infermesh_core::RpcTransport;
use infermesh_worker::{api, InferenceWorker, SyntheticPredictorFactory};

#[derive(Parser, Debug)]
#[command(name = "infermesh-worker")]
#[command(about = "Capacity-gated inference worker for InferMesh")]
struct Args {
    /// Path to a JSON config file
    #[arg(long)]
    config: Option<String>,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Stable worker id (generated when absent)
    #[arg(long)]
    worker_id: Option<String>,

    /// Maximum concurrent inferences
    #[arg(long)]
    max_concurrent: Option<u32>,

    /// Model manager base URL
    #[arg(long)]
    model_manager_url: Option<String>,

    /// Orchestrator base URL to register with
    #[arg(long)]
    orchestrator_url: Option<String>,

    /// Address this worker advertises (defaults to http://127.0.0.1:<port>)
    #[arg(long)]
    advertise_address: Option<String>,

    /// Model ids to preload at boot (repeatable)
    #[arg(long = "preload")]
    preload: Vec<String>,
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
            serde_json::from_str::<WorkerConfig>(&raw)
                .with_context(|| format!("parsing config file {}", path))?
        }
        None => WorkerConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if args.worker_id.is_some() {
        config.worker_id = args.worker_id.clone();
    }
    if let Some(max) = args.max_concurrent {
        config.max_concurrent_inferences = max;
    }
    if let Some(url) = &args.model_manager_url {
        config.model_manager_url = url.clone();
    }
    if !args.preload.is_empty() {
        for model_id in &args.preload {
            if !config.models.contains(model_id) {
                config.models.push(model_id.clone());
            }
        }
    }

    let manager: Arc<dyn RpcTransport> = Arc::new(HttpTransport::new(config.model_manager_url.clone()));
    let advertise = args
        .advertise_address
        .clone()
        .unwrap_or_else(|| format!("http://127.0.0.1:{}", config.port));
    let addr = format!("0.0.0.0:{}", config.port);

    let worker = Arc::new(InferenceWorker::new(
        config,
        manager,
        Arc::new(SyntheticPredictorFactory::new()),
    ));

    for model_id in &args.preload {
        match worker.load_model(model_id).await {
            Ok(_) => tracing::info!(%model_id, "preloaded at boot"),
            Err(e) => tracing::warn!(%model_id, "preload failed: {}", e),
        }
    }

    if let Some(orchestrator_url) = &args.orchestrator_url {
        let orchestrator = HttpTransport::new(orchestrator_url.clone());
        let registration = worker.registration(&advertise);
        match orchestrator
            .call(
                "registerWorker",
                serde_json::to_value(&registration)?,
                Duration::from_secs(10),
            )
            .await
        {
            Ok(_) => tracing::info!(%orchestrator_url, "registered with orchestrator"),
            Err(e) => tracing::warn!(%orchestrator_url, "registration failed: {}", e),
        }
    }

    tracing::info!(worker_id = worker.id(), "worker listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    axum::serve(listener, api::router(worker)).await?;

    Ok(())
}
