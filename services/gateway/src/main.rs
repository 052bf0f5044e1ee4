//! Gateway binary

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use infermesh_core::config::GatewayConfig;
use infermesh_core::transport::HttpTransport;
use infermesh_gateway::{api, Gateway};

#[derive(Parser, Debug)]
#[command(name = "infermesh-gateway")]
#[command(about = "Authenticated, rate-limited edge for InferMesh")]
struct Args {
    /// Path to a JSON config file
    #[arg(long)]
    config: Option<String>,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Orchestrator base URL
    #[arg(long)]
    orchestrator_url: Option<String>,

    /// Model manager base URL
    #[arg(long)]
    model_manager_url: Option<String>,

    /// Disable API key authentication
    #[arg(long)]
    no_auth: bool,

    /// Pre-shared API key to accept (repeatable; granted all permissions)
    #[arg(long = "api-key")]
    api_keys: Vec<String>,
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
            serde_json::from_str::<GatewayConfig>(&raw)
                .with_context(|| format!("parsing config file {}", path))?
        }
        None => GatewayConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(url) = args.orchestrator_url {
        config.orchestrator_url = url;
    }
    if let Some(url) = args.model_manager_url {
        config.model_manager_url = url;
    }
    if args.no_auth {
        config.authentication.enabled = false;
    }

    let orchestrator = Arc::new(HttpTransport::new(config.orchestrator_url.clone()));
    let model_manager = Arc::new(HttpTransport::new(config.model_manager_url.clone()));
    let addr = format!("0.0.0.0:{}", config.port);

    let gateway = Arc::new(Gateway::new(config, orchestrator, model_manager));

    // Demo key for local development plus any operator-supplied keys
    gateway.keys().insert("demo-api-key-123", "demo", &["*"]);
    for key in &args.api_keys {
        gateway.keys().insert(key.clone(), "configured", &["*"]);
    }

    gateway.start();

    tracing::info!("gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    axum::serve(
        listener,
        api::router(gateway).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
