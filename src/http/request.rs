//! Inbound request parsing.
//!
//! # Responsibilities
//! - Read the client's header block up to the terminating blank line
//! - Accept GET only; reject everything else before any origin is contacted
//! - Extract target path and destination host
//! - Rebuild the origin-form request that is sent upstream
//!
//! # Design Decisions
//! - Header block size is bounded; oversized or truncated blocks are malformed
//! - Line 1 must be the Host header
//! - Only the request line and the Host line are forwarded unless
//!   `forward_extra_headers` is enabled

use std::io;

use tokio::io::AsyncBufRead;

use crate::cache::CacheKey;
use crate::error::ProxyError;
use crate::http::lines::{read_line, Line};

/// The only method this proxy serves.
pub const METHOD_GET: &str = "GET";

/// A parsed client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    method: String,
    target_path: String,
    version: String,
    destination_host: String,
    host_line: String,
    extra_headers: Vec<String>,
}

impl Request {
    /// Read and parse a request header block from `reader`.
    ///
    /// Consumes the stream up to and including the blank line. Fails fast on
    /// a non-GET request line without waiting for the rest of the block.
    pub async fn read<R>(reader: &mut R, max_header_bytes: usize) -> Result<Self, ProxyError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut budget = max_header_bytes;
        let mut lines: Vec<String> = Vec::new();

        loop {
            let line = match read_line(reader, &mut budget).await {
                Ok(Line::Complete(line)) => line,
                Ok(Line::Eof) => {
                    return Err(ProxyError::MalformedRequest(if lines.is_empty() {
                        "connection closed before request line".into()
                    } else {
                        "connection closed before end of headers".into()
                    }));
                }
                Err(e) => return Err(map_read_error(e)),
            };
            if line.is_empty() {
                break;
            }

            let line = String::from_utf8(line).map_err(|_| {
                ProxyError::MalformedRequest("header line is not valid UTF-8".into())
            })?;
            if lines.is_empty() && !line.starts_with("GET ") {
                return Err(ProxyError::MalformedRequest(format!(
                    "unsupported request line '{}'",
                    truncate(&line)
                )));
            }
            lines.push(line);
        }

        Self::from_lines(&lines)
    }

    /// Build a request from header lines (terminators removed, blank line
    /// excluded).
    pub fn from_lines(lines: &[String]) -> Result<Self, ProxyError> {
        let request_line = lines
            .first()
            .ok_or_else(|| ProxyError::MalformedRequest("empty header block".into()))?;
        let (target_path, version) = parse_request_line(request_line)?;

        let host_line = lines
            .get(1)
            .ok_or_else(|| ProxyError::MalformedRequest("missing Host header".into()))?;
        let destination_host = parse_host_line(host_line)?;

        Ok(Self {
            method: METHOD_GET.to_string(),
            target_path,
            version,
            destination_host,
            host_line: host_line.clone(),
            extra_headers: lines[2..].to_vec(),
        })
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn target_path(&self) -> &str {
        &self.target_path
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn destination_host(&self) -> &str {
        &self.destination_host
    }

    /// Header lines after `Host`, in their original order.
    pub fn extra_headers(&self) -> &[String] {
        &self.extra_headers
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(&self.destination_host, &self.target_path)
    }

    /// Serialize the request sent to the origin.
    ///
    /// Always the origin-form request line and the verbatim Host line,
    /// optionally followed by the remaining headers, then one blank line.
    pub fn to_origin_bytes(&self, include_extra_headers: bool) -> Vec<u8> {
        let mut out = format!(
            "{} {} {}\r\n{}\r\n",
            self.method, self.target_path, self.version, self.host_line
        );
        if include_extra_headers {
            for header in &self.extra_headers {
                out.push_str(header);
                out.push_str("\r\n");
            }
        }
        out.push_str("\r\n");
        out.into_bytes()
    }
}

fn map_read_error(e: io::Error) -> ProxyError {
    match e.kind() {
        io::ErrorKind::InvalidData => ProxyError::MalformedRequest(e.to_string()),
        io::ErrorKind::UnexpectedEof => ProxyError::MalformedRequest(e.to_string()),
        _ => ProxyError::ClientIo(e),
    }
}

/// Split `GET <target> <version>` into origin-form path and version.
fn parse_request_line(line: &str) -> Result<(String, String), ProxyError> {
    let malformed =
        |why: &str| ProxyError::MalformedRequest(format!("{}: '{}'", why, truncate(line)));

    let rest = line
        .strip_prefix("GET ")
        .ok_or_else(|| malformed("not a GET request"))?;
    let mut tokens = rest.split_whitespace();
    let target = tokens.next().ok_or_else(|| malformed("missing request target"))?;
    let version = tokens.next().ok_or_else(|| malformed("missing protocol version"))?;
    if tokens.next().is_some() {
        return Err(malformed("unexpected token after protocol version"));
    }
    if !version.starts_with("HTTP/") {
        return Err(malformed("invalid protocol version"));
    }

    let path = origin_form_path(target).ok_or_else(|| malformed("unsupported request target"))?;
    Ok((path.to_string(), version.to_string()))
}

/// Path component of an origin-form or `http://` absolute-form target.
fn origin_form_path(target: &str) -> Option<String> {
    if target.starts_with('/') {
        return Some(target.to_string());
    }

    let scheme = target.get(..7)?;
    if !scheme.eq_ignore_ascii_case("http://") {
        return None;
    }
    let rest = &target[7..];
    match rest.find(['/', '?']) {
        Some(0) => None,
        None if rest.is_empty() => None,
        None => Some("/".to_string()),
        Some(i) if rest[i..].starts_with('?') => Some(format!("/{}", &rest[i..])),
        Some(i) => Some(rest[i..].to_string()),
    }
}

fn parse_host_line(line: &str) -> Result<String, ProxyError> {
    let mut tokens = line.split_whitespace();
    match (tokens.next(), tokens.next()) {
        (Some(name), Some(host)) if name.eq_ignore_ascii_case("host:") => Ok(host.to_string()),
        (Some(name), None) if name.eq_ignore_ascii_case("host:") => Err(
            ProxyError::MalformedRequest("Host header has no value".into()),
        ),
        _ => Err(ProxyError::MalformedRequest(format!(
            "expected Host header on second line, got '{}'",
            truncate(line)
        ))),
    }
}

fn truncate(line: &str) -> &str {
    match line.char_indices().nth(80) {
        Some((i, _)) => &line[..i],
        None => line,
    }
}
