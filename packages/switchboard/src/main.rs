use anyhow::{Context, Result};
use backplane::{
    BackplaneConfig, BackplaneMetrics, ClusterSubstrate, HeartbeatManager, HubLifetimeManager,
    ServerDirectory, ServerDirectoryActor, UuidServerIdProvider,
};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

mod config;
mod server;
mod ws;

use crate::config::{DEFAULT_CONFIG_FILE, DEFAULT_HOST, DEFAULT_HUB, DEFAULT_PORT, FileConfig};
use crate::server::AppState;

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(about = "WebSocket host for a backplane hub")]
struct Cli {
    /// Config file (defaults to ./switchboard.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host to bind to
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Port for the web server (0 = auto-select)
    #[arg(short, long)]
    port: Option<u16>,

    /// Hub served on /ws
    #[arg(long)]
    hub: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let default_directive = if cli.debug {
        "switchboard=debug,backplane=debug,keyed_actors=debug,tower_http=debug,info"
    } else {
        "switchboard=info,backplane=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let config_file = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let file_config: FileConfig = config::load_config(&config_file)
        .extract()
        .with_context(|| format!("invalid configuration in {}", config_file.display()))?;

    run_server(cli, file_config).await
}

async fn run_server(cli: Cli, file_config: FileConfig) -> Result<()> {
    let backplane_config = BackplaneConfig::from_file(&file_config.backplane);
    let hub_name = cli
        .hub
        .or(file_config.server.hub)
        .unwrap_or_else(|| DEFAULT_HUB.to_string());

    let substrate = ClusterSubstrate::in_memory(backplane_config.topic_capacity);
    let metrics = Arc::new(BackplaneMetrics::new());
    let directory: Arc<dyn ServerDirectory> =
        Arc::new(ServerDirectoryActor::new(substrate.directory.clone()));

    let heartbeat = Arc::new(HeartbeatManager::new(
        directory.clone(),
        &UuidServerIdProvider,
        backplane_config.heartbeat_options(),
        metrics.clone(),
    ));
    let hub = Arc::new(
        HubLifetimeManager::new(
            &hub_name,
            heartbeat.server_id(),
            &backplane_config.provider,
            substrate,
            metrics.clone(),
        )
        .context("failed to create hub")?,
    );
    heartbeat
        .start(hub.registry())
        .await
        .context("failed to register with the server directory")?;

    info!(
        server_id = %heartbeat.server_id(),
        hub = %hub_name,
        provider = %backplane_config.provider,
        "Starting switchboard"
    );

    let state = AppState {
        hub: hub.clone(),
        heartbeat: heartbeat.clone(),
        directory,
        metrics,
        dead_server_timeout: backplane_config.dead_server_timeout,
    };
    let app = server::build_router(state);

    let host = cli
        .host
        .or(file_config.server.host)
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = cli.port.or(file_config.server.port).unwrap_or(DEFAULT_PORT);
    let addr = format!("{}:{}", host, port).parse::<SocketAddr>()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Switchboard listening on http://{}", actual_addr);
    info!("  GET /ws?user=<id>  - WebSocket connection to hub '{}'", hub_name);
    info!("  GET /health        - Fleet view of this server");

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, cleaning up...");
    };

    let server_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error");

    if let Err(e) = heartbeat.stop().await {
        warn!("Failed to unregister from the server directory: {}", e);
    }
    hub.dispose().await;

    info!("Shutdown complete");
    server_result
}
