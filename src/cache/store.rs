//! Cache store contract and its in-memory implementation.
//!
//! The store owns expiry and dependency invalidation: entries carry an
//! absolute deadline and a list of dependency keys, and removing any key
//! removes every entry that depends on it, transitively.

use std::{
    collections::{HashMap, HashSet},
    num::NonZeroUsize,
    sync::{Arc, RwLock},
    time::Duration,
};

use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use bytes::Bytes;
use lru::LruCache;
use metrics::counter;
use thiserror::Error;
use tokio::{task::JoinHandle, time::Instant};
use tracing::debug;

use super::lock::{rw_read, rw_write};
use super::registry::DependencyIndex;

const SOURCE: &str = "cache::store";

/// A captured response: media type, charset and body, stored verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub content_type: String,
    pub charset: String,
    pub body: Bytes,
}

impl CacheEntry {
    pub fn new(content_type: impl Into<String>, charset: impl Into<String>, body: Bytes) -> Self {
        Self {
            content_type: content_type.into(),
            charset: charset.into(),
            body,
        }
    }

    /// Capture an entry from response headers and a fully read body.
    pub fn from_headers(headers: &HeaderMap, body: Bytes) -> Self {
        let raw = headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");

        let mut segments = raw.split(';');
        let content_type = segments.next().unwrap_or("").trim().to_string();
        let charset = segments
            .filter_map(|param| param.split_once('='))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("charset"))
            .map(|(_, value)| value.trim().trim_matches('"').to_string())
            .unwrap_or_default();

        Self {
            content_type,
            charset,
            body,
        }
    }

    /// The `Content-Type` header value this entry was captured with.
    pub fn content_type_header(&self) -> Option<String> {
        match (self.content_type.is_empty(), self.charset.is_empty()) {
            (true, _) => None,
            (false, true) => Some(self.content_type.clone()),
            (false, false) => Some(format!("{}; charset={}", self.content_type, self.charset)),
        }
    }

    /// Synthesize a `200 OK` response from the entry.
    pub fn into_response(self) -> Response {
        let content_type = self.content_type_header();
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = StatusCode::OK;

        if let Some(value) = content_type.and_then(|value| HeaderValue::from_str(&value).ok()) {
            response.headers_mut().insert(header::CONTENT_TYPE, value);
        }

        response
    }
}

/// How an entry's duration is measured. Only absolute timeouts exist: the
/// deadline is fixed at insertion and reads never extend it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeoutKind {
    #[default]
    Absolute,
}

/// Expiration and invalidation rules for one stored value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionPolicy {
    pub duration: Duration,
    pub timeout: TimeoutKind,
    pub dependency_keys: Vec<String>,
    /// Markers that must still hold the given token when the value is
    /// written, checked under the same lock as the write.
    pub expected_markers: Vec<(String, String)>,
}

impl EvictionPolicy {
    /// Duration-only expiry, no dependency invalidation.
    pub fn absolute(duration: Duration) -> Self {
        Self::with_dependencies(duration, Vec::new())
    }

    pub fn with_dependencies(duration: Duration, dependency_keys: Vec<String>) -> Self {
        Self {
            duration,
            timeout: TimeoutKind::Absolute,
            dependency_keys,
            expected_markers: Vec::new(),
        }
    }

    /// Reject the write unless marker `key` still holds `token`.
    pub fn expecting(mut self, key: impl Into<String>, token: impl Into<String>) -> Self {
        self.expected_markers.push((key.into(), token.into()));
        self
    }
}

/// Values the store can hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredValue {
    /// A cached response, subject to capacity eviction.
    Response(CacheEntry),
    /// An opaque marker such as a content version token. Markers are never
    /// evicted for capacity; their presence is what dependents rely on.
    Marker(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("dependency `{dependency}` of `{key}` is not present in the store")]
    MissingDependency { key: String, dependency: String },
    #[error("dependency `{dependency}` of `{key}` changed after the value was produced")]
    StaleDependency { key: String, dependency: String },
    #[error("key `{key}` holds a value of an unexpected kind")]
    WrongKind { key: String },
    #[error("cache store unavailable: {0}")]
    Unavailable(String),
}

/// Process-wide key/value cache shared by concurrent requests.
///
/// Implementations must be safe for concurrent use and must enforce both the
/// absolute deadline and dependency invalidation of every stored value.
pub trait CacheStore: Send + Sync {
    /// Return the live value for `key`, if any.
    fn get(&self, key: &str) -> Result<Option<StoredValue>, StoreError>;

    /// Store `value`, replacing any previous value. Replacing a key counts as
    /// a change: entries depending on it are invalidated.
    fn insert(
        &self,
        key: &str,
        value: StoredValue,
        policy: Option<&EvictionPolicy>,
    ) -> Result<(), StoreError>;

    /// Store `value` only if no live value exists for `key`.
    ///
    /// Returns `false` when another writer got there first.
    fn add(
        &self,
        key: &str,
        value: StoredValue,
        policy: Option<&EvictionPolicy>,
    ) -> Result<bool, StoreError>;

    /// Remove `key` and everything depending on it. Returns the number of
    /// stored values removed.
    fn remove(&self, key: &str) -> Result<usize, StoreError>;
}

#[derive(Debug)]
struct StoredItem {
    value: StoredValue,
    expires_at: Option<Instant>,
    dependencies: Vec<String>,
}

impl StoredItem {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

struct StoreState {
    responses: LruCache<String, StoredItem>,
    markers: HashMap<String, StoredItem>,
    index: DependencyIndex,
}

impl StoreState {
    fn peek(&self, key: &str) -> Option<&StoredItem> {
        self.responses.peek(key).or_else(|| self.markers.get(key))
    }

    fn is_live(&self, key: &str, now: Instant) -> bool {
        self.peek(key).is_some_and(|item| !item.is_expired(now))
    }

    fn holds_marker(&self, key: &str, token: &str, now: Instant) -> bool {
        self.peek(key).is_some_and(|item| {
            !item.is_expired(now)
                && matches!(&item.value, StoredValue::Marker(current) if current == token)
        })
    }

    fn take(&mut self, key: &str) -> Option<StoredItem> {
        let item = self.responses.pop(key).or_else(|| self.markers.remove(key))?;
        self.index.unregister(key, &item.dependencies);
        Some(item)
    }

    /// Remove `key` and cascade through its dependents.
    fn invalidate(&mut self, key: &str) -> usize {
        let mut pending = vec![key.to_string()];
        let mut visited = HashSet::new();
        let mut removed = 0;

        while let Some(current) = pending.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            if self.take(&current).is_some() {
                removed += 1;
            }
            pending.extend(self.index.take_dependents(&current));
        }

        removed
    }

    fn place(
        &mut self,
        key: &str,
        value: StoredValue,
        policy: Option<&EvictionPolicy>,
        now: Instant,
    ) -> Result<(), StoreError> {
        let dependencies = policy
            .map(|policy| policy.dependency_keys.clone())
            .unwrap_or_default();

        if let Some((stale, _)) = policy
            .map(|policy| policy.expected_markers.as_slice())
            .unwrap_or_default()
            .iter()
            .find(|(marker, token)| !self.holds_marker(marker, token, now))
        {
            return Err(StoreError::StaleDependency {
                key: key.to_string(),
                dependency: stale.clone(),
            });
        }

        if let Some(missing) = dependencies
            .iter()
            .find(|dependency| dependency.as_str() == key || !self.is_live(dependency, now))
        {
            return Err(StoreError::MissingDependency {
                key: key.to_string(),
                dependency: missing.clone(),
            });
        }

        if self.peek(key).is_some() {
            let removed = self.invalidate(key);
            if removed > 1 {
                counter!("vercache_store_evict_total", "cause" => "dependency")
                    .increment((removed - 1) as u64);
            }
        }

        self.index.register(key, &dependencies);
        let item = StoredItem {
            value,
            // A deadline past the clock's range never expires.
            expires_at: policy.and_then(|policy| now.checked_add(policy.duration)),
            dependencies,
        };

        if matches!(item.value, StoredValue::Marker(_)) {
            self.markers.insert(key.to_string(), item);
        } else if let Some((evicted_key, evicted)) = self.responses.push(key.to_string(), item) {
            self.index.unregister(&evicted_key, &evicted.dependencies);
            let cascaded = self.invalidate(&evicted_key);
            counter!("vercache_store_evict_total", "cause" => "capacity")
                .increment(1 + cascaded as u64);
            debug!(key = %evicted_key, cascaded, "evicted entry over capacity");
        }

        Ok(())
    }

    fn expired_keys(&self, now: Instant) -> Vec<String> {
        self.responses
            .iter()
            .chain(self.markers.iter())
            .filter(|(_, item)| item.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect()
    }
}

/// In-memory [`CacheStore`] with LRU capacity for responses.
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    /// Create a store holding at most `capacity` responses.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            state: RwLock::new(StoreState {
                responses: LruCache::new(capacity),
                markers: HashMap::new(),
                index: DependencyIndex::new(),
            }),
        }
    }

    /// Number of stored values, responses and markers alike, including
    /// expired values not yet purged.
    pub fn len(&self) -> usize {
        let state = rw_read(&self.state, SOURCE, "len");
        state.responses.len() + state.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of stored values depending on `key`.
    pub fn dependents_of(&self, key: &str) -> usize {
        rw_read(&self.state, SOURCE, "dependents_of")
            .index
            .dependents_of(key)
            .len()
    }

    /// Remove every expired value and its dependents.
    pub fn purge_expired(&self) -> usize {
        let mut state = rw_write(&self.state, SOURCE, "purge_expired");
        let expired = state.expired_keys(Instant::now());
        let removed: usize = expired.iter().map(|key| state.invalidate(key)).sum();

        if removed > 0 {
            counter!("vercache_store_evict_total", "cause" => "expired").increment(removed as u64);
            debug!(removed, "purged expired cache values");
        }
        removed
    }

    /// Purge expired values every `every` until the returned task is aborted.
    pub fn spawn_sweeper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await; // Skip the first immediate tick
            loop {
                interval.tick().await;
                self.purge_expired();
            }
        })
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<StoredValue>, StoreError> {
        let mut guard = rw_write(&self.state, SOURCE, "get");
        let state = &mut *guard;
        let now = Instant::now();

        let expired = match state.responses.get(key).or_else(|| state.markers.get(key)) {
            None => return Ok(None),
            Some(item) if !item.is_expired(now) => return Ok(Some(item.value.clone())),
            Some(_) => true,
        };

        if expired {
            let removed = state.invalidate(key);
            counter!("vercache_store_evict_total", "cause" => "expired").increment(removed as u64);
        }
        Ok(None)
    }

    fn insert(
        &self,
        key: &str,
        value: StoredValue,
        policy: Option<&EvictionPolicy>,
    ) -> Result<(), StoreError> {
        let mut state = rw_write(&self.state, SOURCE, "insert");
        state.place(key, value, policy, Instant::now())
    }

    fn add(
        &self,
        key: &str,
        value: StoredValue,
        policy: Option<&EvictionPolicy>,
    ) -> Result<bool, StoreError> {
        let mut state = rw_write(&self.state, SOURCE, "add");
        let now = Instant::now();

        if state.is_live(key, now) {
            return Ok(false);
        }
        state.place(key, value, policy, now)?;
        Ok(true)
    }

    fn remove(&self, key: &str) -> Result<usize, StoreError> {
        let mut state = rw_write(&self.state, SOURCE, "remove");
        let removed = state.invalidate(key);
        if removed > 1 {
            counter!("vercache_store_evict_total", "cause" => "dependency")
                .increment((removed - 1) as u64);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(capacity: usize) -> MemoryStore {
        MemoryStore::new(NonZeroUsize::new(capacity).expect("non-zero capacity"))
    }

    fn json_entry() -> CacheEntry {
        CacheEntry::new("application/json", "utf-8", Bytes::from_static(b"{\"a\":1}"))
    }

    fn response(entry: CacheEntry) -> StoredValue {
        StoredValue::Response(entry)
    }

    fn marker(token: &str) -> StoredValue {
        StoredValue::Marker(token.to_string())
    }

    #[test]
    fn entry_round_trips_all_three_fields() {
        let store = store(8);
        store
            .insert("k", response(json_entry()), None)
            .expect("insert");

        match store.get("k").expect("get") {
            Some(StoredValue::Response(entry)) => {
                assert_eq!(entry.content_type, "application/json");
                assert_eq!(entry.charset, "utf-8");
                assert_eq!(entry.body, Bytes::from_static(b"{\"a\":1}"));
            }
            other => panic!("unexpected value: {other:?}"),
        }
    }

    #[test]
    fn entry_parses_content_type_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=\"ISO-8859-1\""),
        );
        let entry = CacheEntry::from_headers(&headers, Bytes::new());
        assert_eq!(entry.content_type, "text/html");
        assert_eq!(entry.charset, "ISO-8859-1");
        assert_eq!(
            entry.content_type_header().as_deref(),
            Some("text/html; charset=ISO-8859-1")
        );
    }

    #[test]
    fn entry_without_content_type_synthesizes_no_header() {
        let entry = CacheEntry::from_headers(&HeaderMap::new(), Bytes::from_static(b"x"));
        let response = entry.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(header::CONTENT_TYPE).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn entry_expires_after_absolute_duration() {
        let store = store(8);
        let policy = EvictionPolicy::absolute(Duration::from_secs(1));
        store
            .insert("k", response(json_entry()), Some(&policy))
            .expect("insert");

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(store.get("k").expect("get").is_some());

        tokio::time::advance(Duration::from_millis(1500)).await;
        assert!(store.get("k").expect("get").is_none());
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reads_do_not_extend_the_deadline() {
        let store = store(8);
        let policy = EvictionPolicy::absolute(Duration::from_secs(2));
        store
            .insert("k", response(json_entry()), Some(&policy))
            .expect("insert");

        for _ in 0..3 {
            tokio::time::advance(Duration::from_millis(600)).await;
            let _ = store.get("k").expect("get");
        }
        tokio::time::advance(Duration::from_millis(300)).await;
        assert!(store.get("k").expect("get").is_none());
    }

    #[test]
    fn removing_a_dependency_invalidates_dependents_immediately() {
        let store = store(8);
        store
            .insert("contentVersion", marker("v1"), None)
            .expect("marker");
        let policy = EvictionPolicy::with_dependencies(
            Duration::from_secs(3600),
            vec!["contentVersion".to_string()],
        );
        store
            .insert("page", response(json_entry()), Some(&policy))
            .expect("insert");
        assert_eq!(store.dependents_of("contentVersion"), 1);

        let removed = store.remove("contentVersion").expect("remove");
        assert_eq!(removed, 2);
        assert!(store.get("page").expect("get").is_none());
        assert_eq!(store.dependents_of("contentVersion"), 0);
    }

    #[test]
    fn invalidation_cascades_transitively() {
        let store = store(8);
        let long = Duration::from_secs(3600);
        store.insert("root", marker("r"), None).expect("root");
        store
            .insert(
                "middle",
                marker("m"),
                Some(&EvictionPolicy::with_dependencies(long, vec!["root".into()])),
            )
            .expect("middle");
        store
            .insert(
                "leaf",
                response(json_entry()),
                Some(&EvictionPolicy::with_dependencies(long, vec!["middle".into()])),
            )
            .expect("leaf");

        assert_eq!(store.remove("root").expect("remove"), 3);
        assert!(store.is_empty());
    }

    #[test]
    fn missing_dependency_rejects_insert() {
        let store = store(8);
        let policy = EvictionPolicy::with_dependencies(
            Duration::from_secs(60),
            vec!["contentVersion".to_string()],
        );

        let err = store
            .insert("page", response(json_entry()), Some(&policy))
            .expect_err("dependency is absent");
        assert!(matches!(err, StoreError::MissingDependency { .. }));
        assert!(store.get("page").expect("get").is_none());
    }

    #[test]
    fn replacing_a_key_invalidates_its_dependents() {
        let store = store(8);
        store.insert("version", marker("v1"), None).expect("marker");
        let policy = EvictionPolicy::with_dependencies(
            Duration::from_secs(60),
            vec!["version".to_string()],
        );
        store
            .insert("page", response(json_entry()), Some(&policy))
            .expect("insert");

        store.insert("version", marker("v2"), None).expect("replace");
        assert!(store.get("page").expect("get").is_none());
        assert_eq!(store.get("version").expect("get"), Some(marker("v2")));
    }

    #[test]
    fn expected_marker_guards_the_write() {
        let store = store(8);
        store.insert("version", marker("v1"), None).expect("marker");
        let rendered_at_v1 = EvictionPolicy::with_dependencies(
            Duration::from_secs(60),
            vec!["version".to_string()],
        )
        .expecting("version", "v1");

        store.insert("version", marker("v2"), None).expect("advance");
        let err = store
            .add("page", response(json_entry()), Some(&rendered_at_v1))
            .expect_err("marker moved on");
        assert!(matches!(err, StoreError::StaleDependency { .. }));
        assert!(store.get("page").expect("get").is_none());

        let rendered_at_v2 = EvictionPolicy::with_dependencies(
            Duration::from_secs(60),
            vec!["version".to_string()],
        )
        .expecting("version", "v2");
        assert!(
            store
                .add("page", response(json_entry()), Some(&rendered_at_v2))
                .expect("add")
        );
    }

    #[test]
    fn removed_expected_marker_is_stale() {
        let store = store(8);
        let policy = EvictionPolicy::absolute(Duration::from_secs(60)).expecting("version", "v1");

        let err = store
            .add("page", response(json_entry()), Some(&policy))
            .expect_err("marker absent");
        assert!(matches!(err, StoreError::StaleDependency { .. }));
    }

    #[test]
    fn unrepresentable_deadline_never_expires() {
        let store = store(8);
        let policy = EvictionPolicy::absolute(Duration::from_secs(i64::MAX as u64));

        store
            .insert("k", response(json_entry()), Some(&policy))
            .expect("insert");
        assert!(store.get("k").expect("get").is_some());
        assert_eq!(store.purge_expired(), 0);
    }

    #[test]
    fn add_keeps_the_first_write() {
        let store = store(8);
        let first = CacheEntry::new("text/plain", "", Bytes::from_static(b"first"));
        let second = CacheEntry::new("text/plain", "", Bytes::from_static(b"second"));

        assert!(store.add("k", response(first.clone()), None).expect("add"));
        assert!(!store.add("k", response(second), None).expect("add"));
        assert_eq!(store.get("k").expect("get"), Some(response(first)));
    }

    #[tokio::test(start_paused = true)]
    async fn add_replaces_an_expired_value() {
        let store = store(8);
        let policy = EvictionPolicy::absolute(Duration::from_secs(1));
        store
            .insert("k", response(json_entry()), Some(&policy))
            .expect("insert");

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.add("k", response(json_entry()), None).expect("add"));
    }

    #[test]
    fn capacity_evicts_least_recently_used_response_but_not_markers() {
        let store = store(2);
        store.insert("version", marker("v1"), None).expect("marker");
        store.insert("a", response(json_entry()), None).expect("a");
        store.insert("b", response(json_entry()), None).expect("b");

        // Touch "a" so "b" becomes least recently used.
        assert!(store.get("a").expect("get").is_some());
        store.insert("c", response(json_entry()), None).expect("c");

        assert!(store.get("b").expect("get").is_none());
        assert!(store.get("a").expect("get").is_some());
        assert!(store.get("c").expect("get").is_some());
        assert!(store.get("version").expect("get").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn purge_expired_removes_only_expired_values() {
        let store = store(8);
        let short = EvictionPolicy::absolute(Duration::from_secs(1));
        let long = EvictionPolicy::absolute(Duration::from_secs(60));
        store
            .insert("short", response(json_entry()), Some(&short))
            .expect("short");
        store
            .insert("long", response(json_entry()), Some(&long))
            .expect("long");

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_purges_in_the_background() {
        let store = Arc::new(store(8));
        let policy = EvictionPolicy::absolute(Duration::from_secs(1));
        store
            .insert("k", response(json_entry()), Some(&policy))
            .expect("insert");

        let handle = Arc::clone(&store).spawn_sweeper(Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(store.is_empty());

        handle.abort();
    }
}
