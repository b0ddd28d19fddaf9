//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to origin:
//!     → timeouts.rs (optional connect / idle deadline)
//!     → on failure: session ends, nothing is retried
//! ```

pub mod timeouts;
