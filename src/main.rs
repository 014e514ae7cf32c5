use clap::Parser;
use tracing_subscriber::EnvFilter;

use stockroom::app::AppState;
use stockroom::config::{self, StorageBackend};
use stockroom::server;

#[derive(Parser)]
#[command(name = "stockroom")]
#[command(about = "Stockroom - multi-tenant inventory API server")]
#[command(version)]
struct Cli {
    #[arg(long, help = "Port to listen on (overrides API_PORT / PORT)")]
    port: Option<u16>,

    #[arg(long, value_enum, help = "Storage backend (overrides STORAGE_BACKEND)")]
    storage: Option<StorageBackend>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, JWT_SECRET, etc.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let mut config = config::config().clone();
    if let Some(port) = cli.port {
        config.api.port = port;
    }
    if let Some(storage) = cli.storage {
        config.storage = storage;
    }

    let default_filter = if config.api.enable_request_logging {
        "info,tower_http=debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .init();

    tracing::info!("Starting Stockroom in {:?} mode ({:?} storage)", config.environment, config.storage);
    if config.security.jwt_secret.is_empty() {
        tracing::warn!("JWT_SECRET is not set; logins will fail until it is configured");
    }

    let bind_addr = format!("0.0.0.0:{}", config.api.port);
    let state = AppState::from_config(config).await?;

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {}: {}", bind_addr, e))?;
    tracing::info!("Listening on http://{}", bind_addr);

    server::run(state, listener, server::shutdown_signal()).await
}
