//! Session error definitions.

use std::io;

use thiserror::Error;

use crate::cache::CacheError;

/// Errors that terminate a proxy session.
///
/// Every variant is caught at the session boundary, logged, and resolved by
/// closing the session's sockets. None of them is reported to the client.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Non-GET method or unparsable request header block.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// The destination host could not be reached.
    #[error("failed to connect to origin {host}: {source}")]
    OriginConnect {
        host: String,
        #[source]
        source: io::Error,
    },

    /// The origin answered with something other than "200 OK".
    #[error("origin rejected request: {0}")]
    OriginRejected(String),

    /// Reading from or writing to the origin stream failed.
    #[error("origin i/o error: {0}")]
    OriginIo(#[source] io::Error),

    /// Reading from or writing to the client stream failed.
    #[error("client i/o error: {0}")]
    ClientIo(#[source] io::Error),

    /// Persisting a cache entry failed.
    #[error("cache write failed: {0}")]
    CacheWrite(#[source] CacheError),

    /// Looking up or reading a cache entry failed.
    #[error("cache read failed: {0}")]
    CacheRead(#[source] CacheError),
}

impl ProxyError {
    /// Short, stable label used for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::MalformedRequest(_) => "malformed_request",
            ProxyError::OriginConnect { .. } => "origin_connect",
            ProxyError::OriginRejected(_) => "origin_rejected",
            ProxyError::OriginIo(_) => "origin_io",
            ProxyError::ClientIo(_) => "client_io",
            ProxyError::CacheWrite(_) => "cache_write",
            ProxyError::CacheRead(_) => "cache_read",
        }
    }

    /// Whether the operator console should see the "400 BAD REQUEST" line.
    pub fn is_bad_request(&self) -> bool {
        matches!(
            self,
            ProxyError::MalformedRequest(_) | ProxyError::OriginRejected(_)
        )
    }
}
