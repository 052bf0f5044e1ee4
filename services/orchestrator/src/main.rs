//! Orchestrator binary

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use infermesh_core::config::OrchestratorConfig;
use infermesh_core::protocol::Strategy;
use infermesh_core::transport::HttpTransportFactory;
use infermesh_orchestrator::{api, Orchestrator, StaticDiscovery};

#[derive(Parser, Debug)]
#[command(name = "infermesh-orchestrator")]
#[command(about = "Control plane for InferMesh inference workers")]
struct Args {
    /// Path to a JSON config file
    #[arg(long)]
    config: Option<String>,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Load balancing strategy (round-robin, least-connections, weighted, random)
    #[arg(long)]
    strategy: Option<Strategy>,

    /// Health probe cadence in milliseconds
    #[arg(long)]
    health_check_interval_ms: Option<u64>,

    /// Per-request RPC deadline in milliseconds
    #[arg(long)]
    request_timeout_ms: Option<u64>,
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
            serde_json::from_str::<OrchestratorConfig>(&raw)
                .with_context(|| format!("parsing config file {}", path))?
        }
        None => OrchestratorConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(strategy) = args.strategy {
        config.load_balancing_strategy = strategy;
    }
    if let Some(ms) = args.health_check_interval_ms {
        config.health_check_interval_ms = ms;
    }
    if let Some(ms) = args.request_timeout_ms {
        config.request_timeout_ms = ms;
    }

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!(
        strategy = %config.load_balancing_strategy,
        "orchestrator listening on {}",
        addr
    );

    let orchestrator = Arc::new(Orchestrator::new(
        config,
        Arc::new(HttpTransportFactory::new()),
        Arc::new(StaticDiscovery::empty()),
    ));
    orchestrator.start();

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    axum::serve(listener, api::router(orchestrator)).await?;

    Ok(())
}
