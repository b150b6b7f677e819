//! Route keys and request URIs.
//!
//! # Responsibilities
//! - Normalize registered routes (`host[/context/path]`)
//! - Normalize request-side host headers (strip port, lowercase)
//! - Produce lookup candidates in priority order
//!
//! # Design Decisions
//! - Host matching is case-insensitive, context paths are case-sensitive
//! - Longest context path wins; exact host beats wildcard host
//! - Paths match on whole segments (`/api` never matches `/apix`)

use std::fmt;

/// Error returned for a route string that cannot be used as a key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteKeyError {
    #[error("route is empty")]
    Empty,
    #[error("route '{0}' has an empty host")]
    EmptyHost(String),
    #[error("route '{0}' has an invalid wildcard host")]
    InvalidWildcard(String),
}

/// A normalized registry key: lowercase host plus optional context path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey {
    host: String,
    context_path: Option<String>,
}

impl RouteKey {
    /// Parse a route as announced by a backend, e.g. `App.Example.com/api`.
    pub fn parse(route: &str) -> Result<Self, RouteKeyError> {
        let route = route.trim();
        if route.is_empty() {
            return Err(RouteKeyError::Empty);
        }

        let (host, path) = match route.find('/') {
            Some(idx) => route.split_at(idx),
            None => (route, ""),
        };

        let host = strip_port(host).to_ascii_lowercase();
        if host.is_empty() {
            return Err(RouteKeyError::EmptyHost(route.to_string()));
        }

        let valid_wildcard = match host.strip_prefix("*.") {
            Some(rest) => !rest.is_empty() && !rest.contains('*'),
            None => !host.contains('*'),
        };
        if !valid_wildcard {
            return Err(RouteKeyError::InvalidWildcard(route.to_string()));
        }

        Ok(Self {
            host,
            context_path: normalize_path(path),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn context_path(&self) -> Option<&str> {
        self.context_path.as_deref()
    }

    /// Number of segments in the context path; 0 for a bare host.
    pub fn depth(&self) -> usize {
        self.context_path
            .as_deref()
            .map_or(0, |path| path.matches('/').count())
    }

    pub fn is_wildcard(&self) -> bool {
        self.host.starts_with("*.")
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context_path {
            Some(path) => write!(f, "{}{}", self.host, path),
            None => f.write_str(&self.host),
        }
    }
}

/// The request side of a lookup: the Host header and the request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteUri {
    host: String,
    path: Option<String>,
}

impl RouteUri {
    /// Build from a raw `Host` header value and a request path.
    pub fn new(host_header: &str, path: &str) -> Self {
        Self {
            host: strip_port(host_header.trim()).to_ascii_lowercase(),
            path: normalize_path(path),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Offer registry keys to `visit`, most specific first, and return the
    /// first hit.
    ///
    /// For `a.example.com/x/y` the order is `a.example.com/x/y`,
    /// `a.example.com/x`, `a.example.com`, then the same descent for
    /// `*.example.com`. At most `max_depth` path segments are considered, so
    /// the walk is bounded by the deepest registered context path rather than
    /// by the request.
    pub fn find_candidate<T>(&self, max_depth: usize, mut visit: impl FnMut(&str) -> Option<T>) -> Option<T> {
        let segments: Vec<&str> = match &self.path {
            Some(path) => path.trim_start_matches('/').split('/').take(max_depth).collect(),
            None => Vec::new(),
        };
        let path_len: usize = segments.iter().map(|s| s.len() + 1).sum();

        let wildcard = wildcard_parent(&self.host);
        for host in std::iter::once(self.host.as_str()).chain(wildcard.as_deref()) {
            let mut buf = String::with_capacity(host.len() + path_len);
            buf.push_str(host);
            let mut ends = Vec::with_capacity(segments.len() + 1);
            ends.push(buf.len());
            for segment in &segments {
                buf.push('/');
                buf.push_str(segment);
                ends.push(buf.len());
            }

            for &end in ends.iter().rev() {
                buf.truncate(end);
                if let Some(hit) = visit(&buf) {
                    return Some(hit);
                }
            }
        }
        None
    }
}

impl fmt::Display for RouteUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}{}", self.host, path),
            None => f.write_str(&self.host),
        }
    }
}

/// `a.b.example.com` → `*.b.example.com`. Only the immediate parent is
/// tried, and a bare top-level domain is never turned into a wildcard.
fn wildcard_parent(host: &str) -> Option<String> {
    let (_, rest) = host.split_once('.')?;
    rest.contains('.').then(|| format!("*.{}", rest))
}

/// Remove a trailing `:port`, keeping bracketed IPv6 literals intact.
pub fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rfind(':') {
        // Unbracketed IPv6 has several colons and no port to strip.
        Some(idx) if host[..idx].contains(':') => host,
        Some(idx) => &host[..idx],
        None => host,
    }
}

/// Collapse empty segments and trailing slashes; `/` and `` become `None`.
fn normalize_path(path: &str) -> Option<String> {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        None
    } else {
        Some(format!("/{}", segments.join("/")))
    }
}
