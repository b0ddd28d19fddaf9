//! Startup orchestration.
//!
//! # Responsibilities
//! - Resolve configuration from file and command-line overrides
//! - Initialize logging and metrics
//! - Bind the listener and run the server until shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listener binds last (traffic only when ready)

use std::path::PathBuf;

use crate::config::{load_config, ConfigError, ProxyConfig};
use crate::config::validation::validate_config;
use crate::http::ProxyServer;
use crate::lifecycle::{signals, Shutdown};
use crate::net::{Listener, ListenerError};
use crate::observability::{logging, metrics};

/// Startup inputs collected from the command line.
#[derive(Debug, Clone, Default)]
pub struct StartupOptions {
    /// Port to listen on; replaces the port of `listener.bind_address`.
    pub port: u16,
    pub config_path: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub single_session: bool,
}

/// Errors that abort startup.
#[derive(Debug)]
pub enum StartupError {
    Config(ConfigError),
    Listener(ListenerError),
}

impl std::fmt::Display for StartupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StartupError::Config(e) => write!(f, "Configuration error: {}", e),
            StartupError::Listener(e) => write!(f, "Listener error: {}", e),
        }
    }
}

impl std::error::Error for StartupError {}

/// Build the effective configuration.
pub fn resolve_config(options: &StartupOptions) -> Result<ProxyConfig, ConfigError> {
    let mut config = match &options.config_path {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    config.listener.bind_address = with_port(&config.listener.bind_address, options.port);
    if let Some(dir) = &options.cache_dir {
        config.cache.root = dir.display().to_string();
    }
    if options.single_session {
        config.listener.single_session = true;
    }

    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Replace the port of a `host:port` bind address.
fn with_port(bind_address: &str, port: u16) -> String {
    let host = bind_address
        .rsplit_once(':')
        .map(|(host, _)| host)
        .unwrap_or(bind_address);
    format!("{host}:{port}")
}

/// Start the proxy and serve until interrupted.
pub async fn run(options: StartupOptions) -> Result<(), StartupError> {
    let config = resolve_config(&options).map_err(StartupError::Config)?;

    logging::init_logging(&config.observability.log_level);
    tracing::info!(
        bind_address = %config.listener.bind_address,
        cache_root = %config.cache.root,
        max_connections = config.listener.max_connections,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = Listener::bind(&config.listener)
        .await
        .map_err(StartupError::Listener)?;

    let shutdown = Shutdown::new();
    tokio::spawn(signals::shutdown_on_ctrl_c(shutdown.clone()));

    let server = ProxyServer::new(config);
    server
        .run(listener, shutdown.subscribe())
        .await
        .map_err(StartupError::Listener)?;

    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_replaces_configured_port() {
        assert_eq!(with_port("0.0.0.0:8080", 3128), "0.0.0.0:3128");
        assert_eq!(with_port("[::]:8080", 3128), "[::]:3128");
    }

    #[test]
    fn command_line_overrides_defaults() {
        let options = StartupOptions {
            port: 3128,
            config_path: None,
            cache_dir: Some(PathBuf::from("/tmp/proxy-cache")),
            single_session: true,
        };
        let config = resolve_config(&options).unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:3128");
        assert_eq!(config.cache.root, "/tmp/proxy-cache");
        assert!(config.listener.single_session);
    }
}
