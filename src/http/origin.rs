//! Outbound connection to the origin server.
//!
//! # Responsibilities
//! - Resolve and connect to the destination host (port 80 unless the Host
//!   header names one)
//! - Write the reconstructed request
//! - Read and vet the response head; only "200 OK" proceeds
//! - Hand out body bytes chunk by chunk until the origin closes

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::error::ProxyError;
use crate::http::lines::{read_line, Line};
use crate::resilience::timeouts::with_timeout;

/// Status text required for a response to be relayed and cached.
pub const ACCEPTED_STATUS: &str = "200 OK";

/// The response head as far as the proxy cares about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    /// First line if it looked like a status line.
    pub status_line: Option<String>,
    /// Last non-empty line before the body, without its terminator. This is
    /// the prefix stored in front of the body in the cache entry.
    pub retained_line: Vec<u8>,
}

/// An open connection to an origin server.
pub struct OriginConnection<S = TcpStream> {
    host: String,
    stream: BufReader<S>,
    idle_timeout: Option<Duration>,
}

impl OriginConnection<TcpStream> {
    /// Connect to `host`, which may carry an explicit `:port`.
    pub async fn connect(
        host: &str,
        default_port: u16,
        connect_timeout: Option<Duration>,
        idle_timeout: Option<Duration>,
    ) -> Result<Self, ProxyError> {
        let connect_error = |source| ProxyError::OriginConnect {
            host: host.to_string(),
            source,
        };

        let (name, port) = split_host_port(host, default_port).ok_or_else(|| {
            connect_error(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid host or port",
            ))
        })?;

        let stream = with_timeout(connect_timeout, TcpStream::connect((name, port)))
            .await
            .map_err(connect_error)?;

        tracing::debug!(
            origin = %host,
            peer_addr = ?stream.peer_addr().ok(),
            "Connected to origin"
        );

        Ok(Self::from_stream(host, stream, idle_timeout))
    }
}

impl<S> OriginConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an already established stream.
    pub fn from_stream(host: &str, stream: S, idle_timeout: Option<Duration>) -> Self {
        Self {
            host: host.to_string(),
            stream: BufReader::new(stream),
            idle_timeout,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Write the full request and flush it.
    pub async fn send(&mut self, request: &[u8]) -> Result<(), ProxyError> {
        let writer = self.stream.get_mut();
        writer.write_all(request).await.map_err(ProxyError::OriginIo)?;
        writer.flush().await.map_err(ProxyError::OriginIo)?;
        Ok(())
    }

    /// Read the status line and headers up to the blank line.
    ///
    /// A first line starting with `HTTP` must carry exactly "200 OK";
    /// anything else is [`ProxyError::OriginRejected`]. A first line that is
    /// not a status line is read as an ordinary header.
    pub async fn read_head(&mut self, max_header_bytes: usize) -> Result<ResponseHead, ProxyError> {
        let mut budget = max_header_bytes;
        let mut head = ResponseHead {
            status_line: None,
            retained_line: Vec::new(),
        };
        let mut first = true;

        loop {
            let read =
                with_timeout(self.idle_timeout, read_line(&mut self.stream, &mut budget)).await;
            let line = match read {
                Ok(Line::Complete(line)) => line,
                Ok(Line::Eof) => {
                    return Err(ProxyError::OriginRejected(
                        "connection closed before end of response headers".into(),
                    ));
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof
                    ) =>
                {
                    return Err(ProxyError::OriginRejected(e.to_string()));
                }
                Err(e) => return Err(ProxyError::OriginIo(e)),
            };
            if line.is_empty() {
                return Ok(head);
            }

            if first {
                first = false;
                let text = String::from_utf8_lossy(&line);
                if text.starts_with("HTTP") {
                    check_status(&text)?;
                    head.status_line = Some(text.into_owned());
                }
            }
            head.retained_line = line;
        }
    }

    /// Read the next body chunk into `buf`. Returns 0 once the origin closes.
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, ProxyError> {
        with_timeout(self.idle_timeout, self.stream.read(buf))
            .await
            .map_err(ProxyError::OriginIo)
    }

    /// Close the write side; the connection is dropped afterwards.
    pub async fn close(mut self) {
        if let Err(e) = self.stream.get_mut().shutdown().await {
            tracing::trace!(origin = %self.host, error = %e, "Origin shutdown failed");
        }
    }
}

fn check_status(line: &str) -> Result<(), ProxyError> {
    let status = line
        .split_once(' ')
        .map(|(_, rest)| rest.trim_end())
        .unwrap_or("");
    if status == ACCEPTED_STATUS {
        Ok(())
    } else {
        Err(ProxyError::OriginRejected(format!("status '{}'", line.trim_end())))
    }
}

/// Split a Host header value into name and port.
///
/// Handles `name`, `name:port`, `[v6]`, `[v6]:port` and bare IPv6 literals.
pub fn split_host_port(host: &str, default_port: u16) -> Option<(&str, u16)> {
    if let Some(rest) = host.strip_prefix('[') {
        let (name, after) = rest.split_once(']')?;
        if name.is_empty() {
            return None;
        }
        return match after {
            "" => Some((name, default_port)),
            _ => Some((name, after.strip_prefix(':')?.parse().ok()?)),
        };
    }

    match host.split_once(':') {
        None if host.is_empty() => None,
        None => Some((host, default_port)),
        // More than one colon: an unbracketed IPv6 literal.
        Some((_, rest)) if rest.contains(':') => Some((host, default_port)),
        Some((name, port)) if !name.is_empty() => Some((name, port.parse().ok()?)),
        Some(_) => None,
    }
}
