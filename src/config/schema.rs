//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the caching proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, session limits).
    pub listener: ListenerConfig,

    /// Outbound origin connection settings.
    pub origin: OriginConfig,

    /// Content store settings.
    pub cache: CacheConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Header size limits.
    pub limits: LimitsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent sessions (backpressure).
    pub max_connections: usize,

    /// Serve exactly one connection, then close the listener.
    pub single_session: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 1024,
            single_session: false,
        }
    }
}

/// Origin forwarding configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OriginConfig {
    /// Port used when the Host header carries none.
    pub default_port: u16,

    /// Re-emit header lines after `Host` when forwarding.
    ///
    /// Off by default: the forwarded request carries only the request line
    /// and the Host line.
    pub forward_extra_headers: bool,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            default_port: 80,
            forward_extra_headers: false,
        }
    }
}

/// Content store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding cached entries.
    pub root: String,

    /// Size of each body chunk read from the origin, in bytes.
    pub chunk_size: usize,

    /// Largest entry kept, in bytes. Larger responses are still relayed but
    /// not cached. Unset means unbounded.
    pub max_entry_bytes: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: "cache".to_string(),
            chunk_size: 1024,
            max_entry_bytes: None,
        }
    }
}

/// Timeout configuration. Unset values mean "wait indefinitely".
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Origin connection establishment timeout in seconds.
    pub connect_secs: Option<u64>,

    /// Maximum wait for a single origin read in seconds.
    pub idle_secs: Option<u64>,
}

/// Request and response header limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum size of a header block (client request or origin response).
    pub max_header_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_header_bytes: 8 * 1024,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
