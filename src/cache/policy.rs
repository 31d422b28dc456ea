//! Cacheability decision and eviction policy building.
//!
//! [`OutputCachePolicy`] is resolved once from [`OutputCacheOptions`] when
//! the interceptor is built. The version-key placeholder is substituted at
//! that point, so the policy shared by concurrent requests never changes.

use std::time::Duration;

use axum::http::Method;

use super::config::OutputCacheOptions;
use super::store::{EvictionPolicy, StoreError};
use super::version::{ContentKeyCreator, VersionProvider, VersionToken};

/// Dependency key name standing for the live content version key.
pub const VERSION_KEY_PLACEHOLDER: &str = "default";

/// Ambient facts about the request being decided on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestFacts {
    /// The host runs in a debug/development mode.
    pub debug: bool,
    /// The request carries an authenticated principal.
    pub authenticated: bool,
}

/// Immutable, resolved output cache policy for one route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputCachePolicy {
    duration: Option<Duration>,
    disable_for_authenticated: bool,
    enable_in_debug: bool,
    dependency_keys: Vec<String>,
    version_key: Option<String>,
}

impl OutputCachePolicy {
    pub fn resolve(options: &OutputCacheOptions, keys: &dyn ContentKeyCreator) -> Self {
        let version_key = keys.version_key_name();
        let dependency_keys = resolve_dependency_keys(&options.dependency_keys, version_key);
        let depends_on_version = dependency_keys.iter().any(|key| key == version_key);

        Self {
            duration: u64::try_from(options.duration_seconds)
                .ok()
                .filter(|seconds| *seconds > 0)
                .map(Duration::from_secs),
            disable_for_authenticated: options.disable_for_authenticated,
            enable_in_debug: options.enable_in_debug,
            dependency_keys,
            version_key: depends_on_version.then(|| version_key.to_string()),
        }
    }

    /// Configured absolute duration; `None` when caching is disabled.
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn dependency_keys(&self) -> &[String] {
        &self.dependency_keys
    }

    pub fn depends_on_version(&self) -> bool {
        self.version_key.is_some()
    }

    /// Whether the read-then-populate cycle applies to a request.
    pub fn is_cacheable(&self, method: &Method, facts: RequestFacts) -> bool {
        if self.duration.is_none() || method != Method::GET {
            return false;
        }
        if facts.debug && !self.enable_in_debug {
            return false;
        }
        !(facts.authenticated && self.disable_for_authenticated)
    }

    /// Content version a render is about to be produced against.
    ///
    /// Read before the handler runs; `None` when the version key is not a
    /// dependency. Reading installs the key if it is absent.
    pub fn pin_version(
        &self,
        versions: &dyn VersionProvider,
    ) -> Result<Option<VersionToken>, StoreError> {
        if self.duration.is_none() || !self.depends_on_version() {
            return Ok(None);
        }
        versions.current_version().map(Some)
    }

    /// Build the eviction policy for a new entry.
    ///
    /// Returns `None` when no dependency keys are configured (or caching is
    /// disabled); callers fall back to duration-only expiry. A `pinned`
    /// version becomes an expected marker, so the store refuses the entry if
    /// content changed while it was being rendered.
    pub fn eviction_policy(&self, pinned: Option<&VersionToken>) -> Option<EvictionPolicy> {
        let duration = self.duration?;
        if self.dependency_keys.is_empty() {
            return None;
        }

        let policy = EvictionPolicy::with_dependencies(duration, self.dependency_keys.clone());
        Some(match (self.version_key.as_deref(), pinned) {
            (Some(key), Some(token)) => policy.expecting(key, token.as_str()),
            _ => policy,
        })
    }
}

/// Replace the placeholder with `version_key` and drop duplicates, keeping
/// the original order. Names are compared whole, never as substrings, so
/// resolving an already-resolved list is a no-op.
pub fn resolve_dependency_keys(keys: &[String], version_key: &str) -> Vec<String> {
    let mut resolved: Vec<String> = Vec::with_capacity(keys.len());
    for key in keys {
        let key = if key == VERSION_KEY_PLACEHOLDER {
            version_key
        } else {
            key.as_str()
        };
        if !resolved.iter().any(|existing| existing == key) {
            resolved.push(key.to_string());
        }
    }
    resolved
}
