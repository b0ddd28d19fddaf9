//! Response content store.
//!
//! # Data Flow
//! ```text
//! Request (host, path)
//!     → key.rs (CacheKey, on-disk location)
//!     → store.rs lookup → hit: full entry bytes
//!                       → miss: begin_write → append per chunk → commit
//! ```
//!
//! # Design Decisions
//! - One file per entry, laid out as `<root>/<host>/<path...>`; the mapping
//!   is one-to-one
//! - Staged writes with atomic rename; partial entries are never served
//! - Single writer per key, unlimited readers
//! - Optional per-entry size cap; no expiry and no eviction

pub mod key;
pub mod store;

pub use key::CacheKey;
pub use store::{CacheError, CacheStore, CacheWriter};
