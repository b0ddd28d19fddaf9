//! Cache keys and their on-disk location.

use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};

/// File name used for keys whose path ends in `/`.
pub const DIRECTORY_ENTRY_NAME: &str = "_index";

/// Prefix reserved for names the store generates. Literal path segments
/// starting with it are escaped by doubling it.
const RESERVED_PREFIX: char = '_';

/// Identifies a cached resource: destination host followed by target path.
///
/// The two parts are concatenated verbatim. No case folding, trailing-slash
/// or query-string normalization is applied.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    host: String,
    path: String,
}

impl CacheKey {
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            path: path.into(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Resolve the entry file for this key under `root`.
    ///
    /// Layout is `<root>/<host>/<dirs...>/<final-segment>`. Distinct keys
    /// always map to distinct paths: a trailing `/` becomes
    /// [`DIRECTORY_ENTRY_NAME`] and literal segments starting with `_` gain
    /// another `_`. Returns `None` when the key cannot be mapped onto the
    /// filesystem without escaping `root`.
    pub fn entry_path(&self, root: &Path) -> Option<PathBuf> {
        if !is_safe_host(&self.host) {
            return None;
        }
        let rest = self.path.strip_prefix('/')?;

        let mut path = root.join(&self.host);
        let mut segments = rest.split('/').peekable();
        while let Some(segment) = segments.next() {
            let last = segments.peek().is_none();
            if last && segment.is_empty() {
                path.push(DIRECTORY_ENTRY_NAME);
            } else if is_safe_segment(segment) {
                path.push(&*escape_segment(segment));
            } else {
                return None;
            }
        }
        Some(path)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.host, self.path)
    }
}

fn is_safe_host(host: &str) -> bool {
    !host.is_empty() && !host.starts_with('.') && !host.contains(['/', '\\', '\0'])
}

fn escape_segment(segment: &str) -> Cow<'_, str> {
    if segment.starts_with(RESERVED_PREFIX) {
        Cow::Owned(format!("{RESERVED_PREFIX}{segment}"))
    } else {
        Cow::Borrowed(segment)
    }
}

fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty() && segment != "." && segment != ".." && !segment.contains(['\\', '\0'])
}
