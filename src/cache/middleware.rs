//! Output cache interceptor.
//!
//! Serves cached responses for cacheable GET requests and populates the
//! store after a successful miss. Any failure inside the cache layer degrades
//! to "behave as if uncached"; handler failures pass through untouched.
//!
//! The content version is pinned before the handler runs. The store only
//! accepts the rendered entry if the version marker still holds that token,
//! so a render that raced a content change is served once and dropped.
//!
//! Bodies are buffered to be captured. If the handler's body stream fails
//! part way, the response keeps its status and headers and its body yields
//! the same error, as it would have without the cache.

use std::{future::Future, sync::Arc};

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::Response,
};
use bytes::Bytes;
use futures::stream;
use http_body_util::BodyExt;
use metrics::counter;
use tracing::{debug, instrument, warn};

use super::{
    CacheConfig,
    keys::{CacheKey, absolute_uri},
    policy::{OutputCachePolicy, RequestFacts},
    store::{CacheEntry, CacheStore, EvictionPolicy, StoreError, StoredValue},
    version::{VersionProvider, VersionToken},
};
use crate::application::{error::ErrorReport, principal::Principal};

/// A request pipeline stage wrapping the rest of the pipeline.
///
/// Implementations receive the request and the continuation, and decide
/// whether to short-circuit, pass through, or post-process the response.
/// Compose one into an axum router with
/// `axum::middleware::from_fn_with_state(interceptor, intercept::<I>)`.
pub trait Interceptor: Clone + Send + Sync + 'static {
    fn intercept(
        &self,
        request: Request<Body>,
        next: Next,
    ) -> impl Future<Output = Response> + Send;
}

/// axum adapter running an [`Interceptor`] held in middleware state.
pub async fn intercept<I: Interceptor>(
    State(interceptor): State<I>,
    request: Request<Body>,
    next: Next,
) -> Response {
    interceptor.intercept(request, next).await
}

/// Reports whether the host runs in a debug/development mode.
pub trait EnvironmentProbe: Send + Sync {
    fn is_debug(&self) -> bool;
}

/// Fixed debug flag, usually taken from configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct DebugMode(pub bool);

impl EnvironmentProbe for DebugMode {
    fn is_debug(&self) -> bool {
        self.0
    }
}

/// Reports whether a request is authenticated.
pub trait AuthenticationProbe: Send + Sync {
    fn is_authenticated(&self, request: &Request<Body>) -> bool;
}

impl<F> AuthenticationProbe for F
where
    F: Fn(&Request<Body>) -> bool + Send + Sync,
{
    fn is_authenticated(&self, request: &Request<Body>) -> bool {
        self(request)
    }
}

/// Treats a request as authenticated when a [`Principal`] extension is present.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrincipalAuthentication;

impl AuthenticationProbe for PrincipalAuthentication {
    fn is_authenticated(&self, request: &Request<Body>) -> bool {
        request.extensions().get::<Principal>().is_some()
    }
}

/// Output cache interceptor for one route policy.
///
/// All collaborators are injected at construction; the resolved policy is
/// immutable and shared by every request the interceptor sees.
#[derive(Clone)]
pub struct OutputCache {
    policy: Arc<OutputCachePolicy>,
    store: Arc<dyn CacheStore>,
    versions: Arc<dyn VersionProvider>,
    environment: Arc<dyn EnvironmentProbe>,
    authentication: Arc<dyn AuthenticationProbe>,
    namespace: Arc<str>,
    default_scheme: Arc<str>,
    max_body_bytes: usize,
}

impl OutputCache {
    pub fn new(
        policy: OutputCachePolicy,
        store: Arc<dyn CacheStore>,
        versions: Arc<dyn VersionProvider>,
    ) -> Self {
        Self {
            policy: Arc::new(policy),
            store,
            versions,
            environment: Arc::new(DebugMode(false)),
            authentication: Arc::new(PrincipalAuthentication),
            namespace: Arc::from(""),
            default_scheme: Arc::from(""),
            max_body_bytes: 0,
        }
        .with_config(&CacheConfig::default())
    }

    pub fn with_environment(mut self, probe: impl EnvironmentProbe + 'static) -> Self {
        self.environment = Arc::new(probe);
        self
    }

    pub fn with_authentication(mut self, probe: impl AuthenticationProbe + 'static) -> Self {
        self.authentication = Arc::new(probe);
        self
    }

    /// Apply namespace, scheme and body limit from store-wide settings.
    pub fn with_config(mut self, config: &CacheConfig) -> Self {
        self.namespace = Arc::from(config.namespace.as_str());
        self.default_scheme = Arc::from(config.default_scheme.as_str());
        self.max_body_bytes = config.max_body_bytes;
        self
    }

    #[instrument(
        skip_all,
        fields(method = %request.method(), path = %request.uri().path())
    )]
    async fn handle(&self, request: Request<Body>, next: Next) -> Response {
        let facts = RequestFacts {
            debug: self.environment.is_debug(),
            authenticated: self.authentication.is_authenticated(&request),
        };

        if !self.policy.is_cacheable(request.method(), facts) {
            return next.run(request).await;
        }

        let Some(uri) = absolute_uri(
            request.uri(),
            request.headers(),
            &self.default_scheme,
        ) else {
            debug!(cache = "output", outcome = "bypass", "request has no resolvable authority");
            return next.run(request).await;
        };
        let key = CacheKey::for_uri(&self.namespace, &uri);

        match self.store.get(key.as_str()) {
            Ok(Some(StoredValue::Response(entry))) => {
                counter!("vercache_output_hit_total").increment(1);
                debug!(cache = "output", outcome = "hit", key = %key, "serving cached response");
                return entry.into_response();
            }
            Ok(_) => {}
            Err(err) => {
                warn!(
                    cache = "output",
                    key = %key,
                    error = %err,
                    "cache lookup failed; treating as miss"
                );
            }
        }

        counter!("vercache_output_miss_total").increment(1);
        debug!(cache = "output", outcome = "miss", key = %key, "cache miss, executing handler");

        let pinned = self.policy.pin_version(self.versions.as_ref());
        let response = next.run(request).await;
        self.populate(&key, response, pinned).await
    }

    /// Capture a handler response into the store when it is eligible.
    async fn populate(
        &self,
        key: &CacheKey,
        response: Response,
        pinned: Result<Option<VersionToken>, StoreError>,
    ) -> Response {
        if let Some(reason) = skip_reason(&response) {
            counter!("vercache_output_skip_total", "reason" => reason).increment(1);
            debug!(cache = "output", outcome = "skip", reason, "response not cached");
            return response;
        }

        let (parts, body) = response.into_parts();
        let bytes: Bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                counter!("vercache_output_skip_total", "reason" => "body_error").increment(1);
                warn!(cache = "output", key = %key, error = %err, "failed to read handler body");
                let failure = stream::once(async move { Err::<Bytes, _>(err) });
                return Response::from_parts(parts, Body::from_stream(failure));
            }
        };

        if bytes.len() > self.max_body_bytes {
            counter!("vercache_output_skip_total", "reason" => "too_large").increment(1);
            debug!(
                cache = "output",
                outcome = "skip",
                body_bytes = bytes.len(),
                "response body exceeds cache limit"
            );
            return Response::from_parts(parts, Body::from(bytes));
        }

        let entry = CacheEntry::from_headers(&parts.headers, bytes.clone());
        self.store_entry(key, entry, pinned);

        Response::from_parts(parts, Body::from(bytes))
    }

    fn store_entry(
        &self,
        key: &CacheKey,
        entry: CacheEntry,
        pinned: Result<Option<VersionToken>, StoreError>,
    ) {
        let Some(duration) = self.policy.duration() else {
            return;
        };

        let pinned = match pinned {
            Ok(pinned) => pinned,
            Err(err) => {
                counter!("vercache_output_skip_total", "reason" => "version_error").increment(1);
                warn!(cache = "output", key = %key, error = %err, "content version unavailable; not caching");
                return;
            }
        };
        let policy = self
            .policy
            .eviction_policy(pinned.as_ref())
            .unwrap_or_else(|| EvictionPolicy::absolute(duration));

        match self
            .store
            .add(key.as_str(), StoredValue::Response(entry), Some(&policy))
        {
            Ok(true) => {
                counter!("vercache_output_store_total").increment(1);
                debug!(
                    cache = "output",
                    outcome = "stored",
                    key = %key,
                    ttl_secs = duration.as_secs(),
                    dependencies = policy.dependency_keys.len(),
                    "caching response"
                );
            }
            Ok(false) => {
                debug!(cache = "output", key = %key, "entry already present, first write kept");
            }
            Err(StoreError::StaleDependency { dependency, .. }) => {
                counter!("vercache_output_skip_total", "reason" => "version_changed").increment(1);
                debug!(
                    cache = "output",
                    outcome = "skip",
                    key = %key,
                    dependency = %dependency,
                    "content changed while rendering; not caching"
                );
            }
            Err(err) => {
                counter!("vercache_output_skip_total", "reason" => "store_error").increment(1);
                warn!(cache = "output", key = %key, error = %err, "failed to store response");
            }
        }
    }
}

impl Interceptor for OutputCache {
    async fn intercept(&self, request: Request<Body>, next: Next) -> Response {
        self.handle(request, next).await
    }
}

/// Why a handler response must not be cached, if it must not.
fn skip_reason(response: &Response) -> Option<&'static str> {
    if ErrorReport::of(response).is_some() {
        return Some("handler_error");
    }
    if response.status() != StatusCode::OK {
        return Some("status");
    }
    if response.headers().contains_key(header::SET_COOKIE) {
        return Some("set_cookie");
    }
    if response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/event-stream"))
    {
        return Some("streaming");
    }
    None
}
