//! Response relay to the client.
//!
//! # Responsibilities
//! - Stream origin body chunks to the client, flushing after each one
//! - Tee the same chunks into a new cache entry, prefixed by the retained
//!   header line
//! - Serve a cached entry in a single write
//!
//! # Design Decisions
//! - Cache failures never interrupt the client stream; the entry is dropped
//!   and the relay carries on
//! - A client failure aborts the relay and discards the unfinished entry

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::cache::{CacheError, CacheWriter};
use crate::error::ProxyError;
use crate::http::origin::OriginConnection;
use crate::observability::metrics;

/// What happened to the cache entry during a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// The entry was published.
    Committed,
    /// Another session published the key first; this copy was discarded.
    AlreadyPresent,
    /// A storage error occurred and the entry was discarded.
    Abandoned,
    /// No entry was being written.
    Skipped,
}

impl CacheOutcome {
    fn as_str(self) -> &'static str {
        match self {
            CacheOutcome::Committed => "committed",
            CacheOutcome::AlreadyPresent => "already_present",
            CacheOutcome::Abandoned => "abandoned",
            CacheOutcome::Skipped => "skipped",
        }
    }
}

/// Result of a completed origin relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOutcome {
    pub bytes_relayed: u64,
    pub cache: CacheOutcome,
}

/// Stream the origin body to `client`, teeing it into `entry`.
///
/// For every chunk: the retained `prefix` (first chunk only), then the chunk,
/// go to the cache entry; then the chunk goes to the client and the client
/// is flushed. An empty body still commits the prefix.
pub async fn relay_from_origin<S, W>(
    origin: &mut OriginConnection<S>,
    client: &mut W,
    mut entry: Option<CacheWriter>,
    prefix: &[u8],
    chunk_size: usize,
) -> Result<RelayOutcome, ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut cache = if entry.is_some() {
        CacheOutcome::Committed
    } else {
        CacheOutcome::Skipped
    };
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut prefix_written = false;
    let mut relayed = 0u64;

    loop {
        let n = origin.read_chunk(&mut buf).await?;
        if n == 0 {
            break;
        }
        let chunk = &buf[..n];

        let failed = match entry.as_mut() {
            Some(writer) => append_chunk(writer, &mut prefix_written, prefix, chunk)
                .await
                .err(),
            None => None,
        };
        if let Some(e) = failed {
            abandon(&mut entry, e);
            cache = CacheOutcome::Abandoned;
        }

        client.write_all(chunk).await.map_err(ProxyError::ClientIo)?;
        client.flush().await.map_err(ProxyError::ClientIo)?;
        relayed += n as u64;
    }

    if let Some(writer) = entry.take() {
        cache = match finish_entry(writer, prefix, prefix_written).await {
            Ok(true) => CacheOutcome::Committed,
            Ok(false) => CacheOutcome::AlreadyPresent,
            Err(e) => {
                log_cache_failure(e);
                CacheOutcome::Abandoned
            }
        };
    }

    if cache != CacheOutcome::Skipped {
        metrics::record_cache_write(cache.as_str());
    }
    metrics::record_bytes_relayed("origin", relayed);

    Ok(RelayOutcome {
        bytes_relayed: relayed,
        cache,
    })
}

/// Write a cached entry to `client` in one piece.
pub async fn relay_from_cache<W>(client: &mut W, entry: &[u8]) -> Result<u64, ProxyError>
where
    W: AsyncWrite + Unpin,
{
    client.write_all(entry).await.map_err(ProxyError::ClientIo)?;
    client.flush().await.map_err(ProxyError::ClientIo)?;

    let bytes = entry.len() as u64;
    metrics::record_bytes_relayed("cache", bytes);
    Ok(bytes)
}

async fn append_chunk(
    writer: &mut CacheWriter,
    prefix_written: &mut bool,
    prefix: &[u8],
    chunk: &[u8],
) -> Result<(), CacheError> {
    if !*prefix_written {
        writer.append(prefix).await?;
        *prefix_written = true;
    }
    writer.append(chunk).await
}

async fn finish_entry(
    mut writer: CacheWriter,
    prefix: &[u8],
    prefix_written: bool,
) -> Result<bool, CacheError> {
    if !prefix_written {
        writer.append(prefix).await?;
    }
    writer.commit().await
}

fn abandon(entry: &mut Option<CacheWriter>, e: CacheError) {
    log_cache_failure(e);
    // Dropping the writer removes the staged file.
    entry.take();
}

fn log_cache_failure(e: CacheError) {
    let err = ProxyError::CacheWrite(e);
    tracing::warn!(error = %err, "Cache entry discarded, relay continues");
}
