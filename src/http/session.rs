//! Per-connection session controller.
//!
//! # State Machine
//! ```text
//! Accepted → HeaderParsed → CacheHit  → Responding → Closed
//!                         → CacheMiss → Responding → Closed
//! any state ──error──────────────────────────────→ Closed
//! ```
//!
//! Every socket opened during a session is closed before it returns,
//! whichever path it takes. Errors are logged here and never reported to
//! the client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::Instrument;

use crate::cache::{CacheError, CacheKey, CacheStore, CacheWriter};
use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::http::origin::{OriginConnection, ResponseHead};
use crate::http::relay::{relay_from_cache, relay_from_origin, RelayOutcome};
use crate::http::request::Request;
use crate::net::connection::ConnectionId;
use crate::observability::metrics;
use crate::resilience::timeouts;

/// Lifecycle position of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Accepted,
    HeaderParsed,
    CacheHit,
    CacheMiss,
    Responding,
    Closed,
}

/// Per-session knobs derived from [`ProxyConfig`].
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub default_origin_port: u16,
    pub forward_extra_headers: bool,
    pub chunk_size: usize,
    pub max_header_bytes: usize,
    pub connect_timeout: Option<Duration>,
    pub idle_timeout: Option<Duration>,
}

impl SessionSettings {
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self {
            default_origin_port: config.origin.default_port,
            forward_extra_headers: config.origin.forward_extra_headers,
            chunk_size: config.cache.chunk_size,
            max_header_bytes: config.limits.max_header_bytes,
            connect_timeout: timeouts::from_secs(config.timeouts.connect_secs),
            idle_timeout: timeouts::from_secs(config.timeouts.idle_secs),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&ProxyConfig::default())
    }
}

/// Shared state handed to every session.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub cache: CacheStore,
    pub settings: Arc<SessionSettings>,
}

impl SessionContext {
    pub fn new(cache: CacheStore, settings: SessionSettings) -> Self {
        Self {
            cache,
            settings: Arc::new(settings),
        }
    }
}

/// How a successful session was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The full cache entry was written to the client.
    CacheHit { bytes: u64 },
    /// The origin body was relayed (and possibly cached).
    Origin(RelayOutcome),
}

impl SessionOutcome {
    fn label(&self) -> &'static str {
        match self {
            SessionOutcome::CacheHit { .. } => "cache_hit",
            SessionOutcome::Origin(_) => "origin",
        }
    }
}

/// One client connection being served.
pub struct Session<S> {
    id: ConnectionId,
    client: BufReader<S>,
    ctx: SessionContext,
    state: SessionState,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(id: ConnectionId, client: S, ctx: SessionContext) -> Self {
        Self {
            id,
            client: BufReader::new(client),
            ctx,
            state: SessionState::Accepted,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Serve the request and close the client connection.
    pub async fn run(mut self) -> Result<SessionOutcome, ProxyError> {
        let result = self.serve().await;
        self.close().await;
        result
    }

    async fn serve(&mut self) -> Result<SessionOutcome, ProxyError> {
        let settings = Arc::clone(&self.ctx.settings);

        let request = Request::read(&mut self.client, settings.max_header_bytes).await?;
        self.transition(SessionState::HeaderParsed);

        let key = request.cache_key();
        tracing::debug!(key = %key, host = %request.destination_host(), "Request parsed");

        let cached = self
            .ctx
            .cache
            .lookup(&key)
            .await
            .map_err(ProxyError::CacheRead)?;
        metrics::record_cache_lookup(cached.is_some());

        if let Some(entry) = cached {
            self.transition(SessionState::CacheHit);
            tracing::info!(
                key = %key,
                bytes = entry.len(),
                "Cached copy found, serving from local cache"
            );
            self.transition(SessionState::Responding);
            let bytes = relay_from_cache(&mut self.client, &entry).await?;
            return Ok(SessionOutcome::CacheHit { bytes });
        }

        self.transition(SessionState::CacheMiss);
        tracing::info!(key = %key, "No cached copy found, fetching from origin");

        let mut origin = OriginConnection::connect(
            request.destination_host(),
            settings.default_origin_port,
            settings.connect_timeout,
            settings.idle_timeout,
        )
        .await?;
        let result = self.fetch(&mut origin, &request, &key, &settings).await;
        origin.close().await;
        result
    }

    async fn fetch<O>(
        &mut self,
        origin: &mut OriginConnection<O>,
        request: &Request,
        key: &CacheKey,
        settings: &SessionSettings,
    ) -> Result<SessionOutcome, ProxyError>
    where
        O: AsyncRead + AsyncWrite + Unpin,
    {
        origin
            .send(&request.to_origin_bytes(settings.forward_extra_headers))
            .await?;
        tracing::debug!(origin = %origin.host(), "Sent request to origin");

        let ResponseHead { retained_line, .. } = origin.read_head(settings.max_header_bytes).await?;

        let entry = self.begin_entry(key).await;
        self.transition(SessionState::Responding);
        let outcome = relay_from_origin(
            origin,
            &mut self.client,
            entry,
            &retained_line,
            settings.chunk_size,
        )
        .await?;

        tracing::info!(
            key = %key,
            bytes = outcome.bytes_relayed,
            cache = ?outcome.cache,
            "Sent response back to client"
        );
        Ok(SessionOutcome::Origin(outcome))
    }

    /// Open a cache entry for `key`; failures only cost the entry.
    async fn begin_entry(&self, key: &CacheKey) -> Option<CacheWriter> {
        match self.ctx.cache.begin_write(key).await {
            Ok(writer) => Some(writer),
            Err(e @ CacheError::Busy { .. }) => {
                tracing::debug!(error = %e, "Relaying without caching");
                None
            }
            Err(e) => {
                let err = ProxyError::CacheWrite(e);
                tracing::warn!(error = %err, "Relaying without caching");
                None
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.client.get_mut().shutdown().await {
            tracing::trace!(error = %e, "Client shutdown failed");
        }
        self.transition(SessionState::Closed);
    }

    fn transition(&mut self, next: SessionState) {
        tracing::trace!(session_id = %self.id, from = ?self.state, to = ?next, "Session state");
        self.state = next;
    }
}

/// Serve one accepted connection inside its own tracing span.
///
/// Errors are logged and absorbed; the connection is always closed.
pub async fn handle_connection<S>(
    client: S,
    peer: SocketAddr,
    id: ConnectionId,
    ctx: SessionContext,
) -> Option<SessionOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let span = tracing::info_span!("session", session_id = %id, peer_addr = %peer);
    async move {
        let started = Instant::now();
        let result = Session::new(id, client, ctx).run().await;
        match result {
            Ok(outcome) => {
                metrics::record_session(outcome.label(), started);
                tracing::info!("Request completed, connection closed");
                Some(outcome)
            }
            Err(e) => {
                metrics::record_session(e.kind(), started);
                if e.is_bad_request() {
                    tracing::warn!(error = %e, kind = e.kind(), "400 BAD REQUEST");
                } else {
                    tracing::error!(error = %e, kind = e.kind(), "Session failed");
                }
                None
            }
        }
    }
    .instrument(span)
    .await
}
