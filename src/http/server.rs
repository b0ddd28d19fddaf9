//! Accept loop and session dispatch.
//!
//! # Responsibilities
//! - Own the listener for the life of the server
//! - Dispatch each accepted connection to its own task
//! - Stop accepting on shutdown and drain running sessions
//! - Optionally serve a single connection and close the listener

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::cache::CacheStore;
use crate::config::ProxyConfig;
use crate::http::session::{handle_connection, SessionContext, SessionSettings};
use crate::net::{ConnectionTracker, Listener, ListenerError};

/// How long shutdown waits for running sessions.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Backoff after a failed accept, e.g. when out of file descriptors.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// The caching forward proxy server.
pub struct ProxyServer {
    config: Arc<ProxyConfig>,
    ctx: SessionContext,
    tracker: ConnectionTracker,
}

impl ProxyServer {
    pub fn new(config: ProxyConfig) -> Self {
        let cache = CacheStore::new(PathBuf::from(&config.cache.root))
            .with_max_entry_bytes(config.cache.max_entry_bytes);
        let ctx = SessionContext::new(cache, SessionSettings::from_config(&config));
        Self {
            config: Arc::new(config),
            ctx,
            tracker: ConnectionTracker::new(),
        }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheStore {
        &self.ctx.cache
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Serve connections until `shutdown` fires.
    ///
    /// In single-session mode the first connection is served on the current
    /// task and the listener is closed afterwards.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        let addr = listener.local_addr().map_err(ListenerError::Accept)?;
        tracing::info!(
            address = %addr,
            cache_root = %self.config.cache.root,
            single_session = self.config.listener.single_session,
            "Proxy server starting"
        );

        if self.config.listener.single_session {
            return self.run_single(listener, shutdown).await;
        }

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer, permit) = match accepted {
                        Ok(accepted) => accepted,
                        Err(ListenerError::Accept(e)) => {
                            tracing::warn!(error = %e, "Accept failed");
                            tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                            continue;
                        }
                        Err(e) => return Err(e),
                    };

                    let guard = self.tracker.track();
                    let ctx = self.ctx.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, peer, guard.id(), ctx).await;
                        drop(guard);
                        drop(permit);
                    });
                }
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, no longer accepting");
                    break;
                }
            }
        }

        drop(listener);
        if !self.tracker.wait_idle(DRAIN_TIMEOUT).await {
            tracing::warn!(
                active = self.tracker.active_count(),
                "Sessions still running after drain timeout"
            );
        }
        tracing::info!("Proxy server stopped");
        Ok(())
    }

    async fn run_single(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = shutdown.recv() => {
                tracing::info!("Shutdown signal received before any connection");
                return Ok(());
            }
        };
        drop(listener);

        let (stream, peer, _permit) = accepted;
        let guard = self.tracker.track();
        handle_connection(stream, peer, guard.id(), self.ctx.clone()).await;
        tracing::info!("Single session served, listener closed");
        Ok(())
    }
}
