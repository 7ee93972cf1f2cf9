//! Server configuration: command-line flags resolved against defaults.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use proxydb_core::types::{DEFAULT_MAX_TEMP_TABLES, DEFAULT_PAGE_SIZE};

use crate::server::DEFAULT_FLUSH_INTERVAL;

#[derive(Parser, Debug)]
#[command(name = "proxydb-server", version, about = "Serve synchronized ProxyDB objects over a Unix socket")]
pub struct Cli {
    /// Unix socket path (default: ~/.local/share/proxydb/server.sock).
    #[arg(short, long)]
    pub socket: Option<PathBuf>,

    /// Object state file (default: ~/.local/share/proxydb/state.json).
    #[arg(long)]
    pub state: Option<PathBuf>,

    /// Maximum rows returned by one paged read.
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    pub page_size: usize,

    /// Maximum number of temp tables held at once.
    #[arg(long, default_value_t = DEFAULT_MAX_TEMP_TABLES)]
    pub max_temp_tables: usize,

    /// Password connections must present to the engine. Any password is
    /// accepted when unset.
    #[arg(long)]
    pub password: Option<String>,

    /// Seconds between flushes of changed objects to the state file.
    #[arg(long, default_value_t = DEFAULT_FLUSH_INTERVAL.as_secs())]
    pub flush_secs: u64,
}

/// Fully resolved server settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub socket_path: PathBuf,
    pub state_path: PathBuf,
    pub page_size: usize,
    pub max_temp_tables: usize,
    pub password: Option<String>,
    pub flush_interval: Duration,
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("proxydb")
}

impl Default for ServerConfig {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            socket_path: data_dir.join("server.sock"),
            state_path: data_dir.join("state.json"),
            page_size: DEFAULT_PAGE_SIZE,
            max_temp_tables: DEFAULT_MAX_TEMP_TABLES,
            password: None,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

impl From<Cli> for ServerConfig {
    fn from(cli: Cli) -> Self {
        let defaults = ServerConfig::default();
        Self {
            socket_path: cli.socket.unwrap_or(defaults.socket_path),
            state_path: cli.state.unwrap_or(defaults.state_path),
            // A zero page size would make every paged read empty.
            page_size: cli.page_size.max(1),
            max_temp_tables: cli.max_temp_tables,
            password: cli.password,
            flush_interval: Duration::from_secs(cli.flush_secs.max(1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["proxydb-server"]).unwrap();
        let config = ServerConfig::from(cli);
        assert_eq!(config.page_size, 500);
        assert_eq!(config.max_temp_tables, 64);
        assert_eq!(config.password, None);
        assert!(config.socket_path.ends_with("proxydb/server.sock"));
        assert!(config.state_path.ends_with("proxydb/state.json"));
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "proxydb-server",
            "--socket",
            "/tmp/p.sock",
            "--state",
            "/tmp/p.json",
            "--page-size",
            "100",
            "--max-temp-tables",
            "2",
            "--password",
            "pw",
        ])
        .unwrap();
        let config = ServerConfig::from(cli);
        assert_eq!(config.socket_path, PathBuf::from("/tmp/p.sock"));
        assert_eq!(config.state_path, PathBuf::from("/tmp/p.json"));
        assert_eq!(config.page_size, 100);
        assert_eq!(config.max_temp_tables, 2);
        assert_eq!(config.password.as_deref(), Some("pw"));
    }

    #[test]
    fn test_zero_page_size_is_raised() {
        let cli = Cli::try_parse_from(["proxydb-server", "--page-size", "0"]).unwrap();
        assert_eq!(ServerConfig::from(cli).page_size, 1);
    }
}
