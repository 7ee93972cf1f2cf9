//! ProxyDB server binary.
//!
//! Restores or seeds the object registry and serves it over a Unix domain
//! socket.

use clap::Parser;
use proxydb_core::store::StateFile;
use proxydb_server::ProxyServer;
use proxydb_server::config::{Cli, ServerConfig};
use proxydb_server::server::open_registry;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ServerConfig::from(Cli::parse());

    // Ensure parent directories exist.
    if let Some(parent) = config.state_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if let Some(parent) = config.socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    info!(
        socket = %config.socket_path.display(),
        state = %config.state_path.display(),
        page_size = config.page_size,
        max_temp_tables = config.max_temp_tables,
        "starting"
    );

    let registry = open_registry(&config)?;
    let server = ProxyServer::new(registry, config.socket_path.clone())
        .with_state(StateFile::new(&config.state_path), config.flush_interval);
    server.run().await?;

    Ok(())
}
