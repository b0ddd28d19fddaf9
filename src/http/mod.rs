//! HTTP request pipeline.
//!
//! # Data Flow
//! ```text
//! Accepted client stream
//!     → request.rs (read header block, GET only, extract host/path)
//!     → cache lookup
//!         hit  → relay.rs (single write of the stored entry)
//!         miss → origin.rs (connect, forward, vet status, read headers)
//!              → relay.rs (stream body to client + cache entry)
//!     → session.rs closes every socket
//! ```
//!
//! server.rs owns the listener and dispatches one task per session.

pub mod lines;
pub mod origin;
pub mod relay;
pub mod request;
pub mod server;
pub mod session;

pub use request::Request;
pub use server::ProxyServer;
pub use session::{handle_connection, Session, SessionContext, SessionOutcome, SessionSettings};
