//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Resolve config → Init logging/metrics → Bind listener → Run server
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain sessions → Exit
//!
//! Signals (signals.rs):
//!     SIGINT (Ctrl+C) → Trigger graceful shutdown
//! ```

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{StartupError, StartupOptions};
