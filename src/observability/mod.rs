//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, one span per session)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Operator console (stdout)
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```

pub mod logging;
pub mod metrics;
