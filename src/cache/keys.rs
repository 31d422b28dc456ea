//! Cache key derivation.
//!
//! A key is a fixed namespace prefix followed by the absolute request URI in
//! its canonical string form. No further normalization happens: two URIs that
//! differ only in query parameter order map to two different entries.

use std::fmt;

use axum::http::{HeaderMap, Uri, header};
use url::Url;

/// Namespace prefix applied when none is configured.
pub const DEFAULT_NAMESPACE: &str = "vercache:output#";

const FORWARDED_PROTO_HEADER: &str = "x-forwarded-proto";

/// Key of a cached response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn for_uri(namespace: &str, absolute_uri: &Url) -> Self {
        Self(format!("{namespace}{}", absolute_uri.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reconstruct the absolute URI of an inbound request.
///
/// Requests carrying an absolute-form target use it as is. Origin-form
/// targets are combined with the scheme from `X-Forwarded-Proto` (or
/// `default_scheme`) and the `Host` header. Returns `None` when no authority
/// can be determined, in which case the request must not be cached.
pub fn absolute_uri(uri: &Uri, headers: &HeaderMap, default_scheme: &str) -> Option<Url> {
    if uri.scheme().is_some() && uri.authority().is_some() {
        return Url::parse(&uri.to_string()).ok();
    }

    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|host| !host.is_empty())?;

    let scheme = headers
        .get(FORWARDED_PROTO_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|scheme| !scheme.is_empty())
        .unwrap_or(default_scheme);

    let path_and_query = uri
        .path_and_query()
        .map(|value| value.as_str())
        .unwrap_or("/");

    Url::parse(&format!("{scheme}://{host}{path_and_query}")).ok()
}
