//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap origin connect and origin reads with an optional deadline
//! - Surface an elapsed deadline as `io::ErrorKind::TimedOut`
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - `None` waits indefinitely, which is the default for every origin call

use std::future::Future;
use std::io;
use std::time::Duration;

/// Convert an optional number of seconds from config into a deadline.
pub fn from_secs(secs: Option<u64>) -> Option<Duration> {
    secs.map(Duration::from_secs)
}

/// Run `fut`, failing with `TimedOut` if `limit` elapses first.
pub async fn with_timeout<T, F>(limit: Option<Duration>, fut: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match limit {
        None => fut.await,
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no progress within {:?}", limit),
            )),
        },
    }
}
