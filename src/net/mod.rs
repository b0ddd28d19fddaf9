//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept, session limits)
//!     → connection.rs (session id, active tracking)
//!     → Hand off to http::session
//! ```
//!
//! # Design Decisions
//! - Bounded sessions prevent resource exhaustion
//! - Each session tracked for graceful shutdown

pub mod connection;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{ConnectionPermit, Listener, ListenerError};
