//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (chunk size > 0, ports valid, timeouts > 0)
//! - Check addresses parse before anything binds
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::ProxyConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    /// Human-readable description.
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Check a loaded configuration for semantic errors.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new(
            "listener.max_connections",
            "must be at least 1",
        ));
    }
    if config.origin.default_port == 0 {
        errors.push(ValidationError::new("origin.default_port", "must be non-zero"));
    }
    if config.cache.root.trim().is_empty() {
        errors.push(ValidationError::new("cache.root", "must not be empty"));
    }
    if config.cache.chunk_size == 0 {
        errors.push(ValidationError::new("cache.chunk_size", "must be at least 1"));
    }
    if config.cache.max_entry_bytes == Some(0) {
        errors.push(ValidationError::new(
            "cache.max_entry_bytes",
            "must be positive when set",
        ));
    }
    if config.timeouts.connect_secs == Some(0) {
        errors.push(ValidationError::new(
            "timeouts.connect_secs",
            "must be positive when set",
        ));
    }
    if config.timeouts.idle_secs == Some(0) {
        errors.push(ValidationError::new(
            "timeouts.idle_secs",
            "must be positive when set",
        ));
    }
    if config.limits.max_header_bytes < 64 {
        errors.push(ValidationError::new(
            "limits.max_header_bytes",
            "must be at least 64",
        ));
    }
    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!(
                "'{}' is not a socket address",
                config.observability.metrics_address
            ),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
