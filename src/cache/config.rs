//! Cache configuration.
//!
//! [`CacheConfig`] sizes the shared store; [`OutputCacheOptions`] is what a
//! route configures for the output cache interceptor.

use std::{num::NonZeroUsize, time::Duration};

use serde::Deserialize;

use super::keys::DEFAULT_NAMESPACE;
use super::policy::VERSION_KEY_PLACEHOLDER;
use super::version::DEFAULT_VERSION_KEY;

const DEFAULT_CAPACITY: usize = 1024;
const DEFAULT_SWEEP_INTERVAL_MS: u64 = 30_000;
const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;
const DEFAULT_PUBLIC_SCHEME: &str = "http";

/// Store-wide settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached responses.
    pub capacity: usize,
    /// Interval (ms) between expired-entry sweeps.
    pub sweep_interval_ms: u64,
    /// Store key of the content version marker.
    pub version_key: String,
    /// Prefix of every response cache key.
    pub namespace: String,
    /// Responses with larger bodies are served but not cached.
    pub max_body_bytes: usize,
    /// Scheme assumed when building absolute URIs for origin-form requests.
    pub default_scheme: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            version_key: DEFAULT_VERSION_KEY.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            default_scheme: DEFAULT_PUBLIC_SCHEME.to_string(),
        }
    }
}

impl CacheConfig {
    /// Returns the capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.capacity).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}

/// Per-route output cache options.
///
/// `duration_seconds` must be positive for caching to happen at all; zero or
/// negative values disable the cache for the route without an error.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OutputCacheOptions {
    pub duration_seconds: i64,
    /// Bypass the cache for authenticated requests.
    pub disable_for_authenticated: bool,
    /// Cache even when the host runs in debug mode.
    pub enable_in_debug: bool,
    /// Keys whose invalidation evicts the cached response. The reserved
    /// `"default"` entry stands for the content version key. An empty list
    /// leaves only the absolute duration.
    pub dependency_keys: Vec<String>,
}

impl Default for OutputCacheOptions {
    fn default() -> Self {
        Self::with_duration(0)
    }
}

impl OutputCacheOptions {
    pub fn with_duration(duration_seconds: i64) -> Self {
        Self {
            duration_seconds,
            disable_for_authenticated: false,
            enable_in_debug: false,
            dependency_keys: vec![VERSION_KEY_PLACEHOLDER.to_string()],
        }
    }

    pub fn disable_for_authenticated(mut self, value: bool) -> Self {
        self.disable_for_authenticated = value;
        self
    }

    pub fn enable_in_debug(mut self, value: bool) -> Self {
        self.enable_in_debug = value;
        self
    }

    pub fn dependency_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependency_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Drop dependency invalidation; only the absolute duration applies.
    pub fn without_dependencies(mut self) -> Self {
        self.dependency_keys.clear();
        self
    }
}
