//! Content version authority.
//!
//! The version key is a marker in the cache store. Entries that declare it as
//! a dependency live only as long as the marker does, so removing the marker
//! is how the content side says "everything you rendered is stale".

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use tracing::{debug, info};
use uuid::Uuid;

use super::store::{CacheStore, StoreError, StoredValue};

/// Version key name used when none is configured.
pub const DEFAULT_VERSION_KEY: &str = "vercache:content-version";

/// Opaque token identifying the current content generation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionToken(String);

impl VersionToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Naming authority for the content version key.
pub trait ContentKeyCreator: Send + Sync {
    fn version_key_name(&self) -> &str;
}

/// Supplies the current content version.
///
/// Calling [`current_version`](Self::current_version) guarantees the version
/// key is present in the store when it returns `Ok`.
pub trait VersionProvider: Send + Sync {
    fn current_version(&self) -> Result<VersionToken, StoreError>;
}

/// Store-backed content version that repopulates its key on demand.
pub struct ContentVersion {
    store: Arc<dyn CacheStore>,
    key: String,
    generation: AtomicU64,
}

impl ContentVersion {
    /// Create a provider without touching the store.
    pub fn new(store: Arc<dyn CacheStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            generation: AtomicU64::new(0),
        }
    }

    /// Create a provider and install the version key right away, so
    /// invalidation works before the first cacheable request arrives.
    pub fn initialize(
        store: Arc<dyn CacheStore>,
        key: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let provider = Self::new(store, key);
        let token = provider.current_version()?;
        info!(key = %provider.key, version = %token, "content version initialized");
        Ok(provider)
    }

    /// Signal that content changed: drop the version key, which evicts every
    /// dependent entry, then install the next generation.
    ///
    /// Returns the number of dependent entries evicted.
    pub fn content_changed(&self) -> Result<usize, StoreError> {
        let removed = self.store.remove(&self.key)?;
        let token = self.next_token();
        self.store
            .insert(&self.key, StoredValue::Marker(token.0.clone()), None)?;

        let evicted = removed.saturating_sub(1);
        info!(key = %self.key, version = %token, evicted, "content version advanced");
        Ok(evicted)
    }

    fn next_token(&self) -> VersionToken {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        VersionToken(format!("{generation}-{}", Uuid::new_v4().simple()))
    }

    fn read(&self) -> Result<Option<VersionToken>, StoreError> {
        match self.store.get(&self.key)? {
            Some(StoredValue::Marker(token)) => Ok(Some(VersionToken(token))),
            Some(StoredValue::Response(_)) => Err(StoreError::WrongKind {
                key: self.key.clone(),
            }),
            None => Ok(None),
        }
    }
}

impl ContentKeyCreator for ContentVersion {
    fn version_key_name(&self) -> &str {
        &self.key
    }
}

impl VersionProvider for ContentVersion {
    fn current_version(&self) -> Result<VersionToken, StoreError> {
        if let Some(token) = self.read()? {
            return Ok(token);
        }

        let token = self.next_token();
        if self
            .store
            .add(&self.key, StoredValue::Marker(token.0.clone()), None)?
        {
            debug!(key = %self.key, version = %token, "content version key installed");
            return Ok(token);
        }

        // Another caller installed a token between our read and add.
        self.read()?.ok_or_else(|| {
            StoreError::Unavailable(format!(
                "version key `{}` vanished while being installed",
                self.key
            ))
        })
    }
}
