//! Version-coherent output cache.
//!
//! Read-only GET endpoints can be wrapped by [`OutputCache`], which serves a
//! stored copy of the response while it is fresh and captures the response
//! on a miss. Freshness has two bounds:
//!
//! - **Absolute duration**: fixed when the entry is stored, never extended.
//! - **Dependency keys**: removing any key the entry depends on evicts it.
//!
//! The usual dependency is the content version key owned by
//! [`ContentVersion`]. Publishing content calls
//! [`ContentVersion::content_changed`], which drops every dependent entry at
//! once.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! capacity = 1024
//! sweep_interval_ms = 30000
//!
//! [output_cache]
//! duration_seconds = 60
//! dependency_keys = ["default"]
//! ```

mod config;
mod keys;
mod lock;
mod middleware;
mod policy;
mod registry;
mod store;
mod version;

pub use config::{CacheConfig, OutputCacheOptions};
pub use keys::{CacheKey, DEFAULT_NAMESPACE, absolute_uri};
pub use middleware::{
    AuthenticationProbe, DebugMode, EnvironmentProbe, Interceptor, OutputCache,
    PrincipalAuthentication, intercept,
};
pub use policy::{
    OutputCachePolicy, RequestFacts, VERSION_KEY_PLACEHOLDER, resolve_dependency_keys,
};
pub use store::{
    CacheEntry, CacheStore, EvictionPolicy, MemoryStore, StoreError, StoredValue, TimeoutKind,
};
pub use version::{
    ContentKeyCreator, ContentVersion, DEFAULT_VERSION_KEY, VersionProvider, VersionToken,
};
