use std::num::NonZeroUsize;
use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
    response::Response,
};
use serde_json::{Value, json};
use tower::ServiceExt;
use vercache::application::content::ArticleService;
use vercache::cache::{
    ContentVersion, DEFAULT_VERSION_KEY, MemoryStore, OutputCache, OutputCacheOptions,
    OutputCachePolicy,
};
use vercache::infra::http::{HttpState, build_router};

const HOST: &str = "blog.test";

struct Demo {
    app: Router,
    store: Arc<MemoryStore>,
}

fn demo(options: OutputCacheOptions) -> Demo {
    let store = Arc::new(MemoryStore::new(NonZeroUsize::new(32).expect("non-zero")));
    let versions = Arc::new(
        ContentVersion::initialize(store.clone(), DEFAULT_VERSION_KEY).expect("version key"),
    );
    let policy = OutputCachePolicy::resolve(&options, &*versions);
    let cache = OutputCache::new(policy, store.clone(), versions.clone());
    let state = HttpState {
        articles: ArticleService::new(versions),
        store: store.clone(),
    };

    Demo {
        app: build_router(state, cache),
        store,
    }
}

fn request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::HOST, HOST);
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("request should build")
}

async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone()
        .oneshot(request)
        .await
        .expect("router should respond")
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should be readable");
    serde_json::from_slice(&bytes).expect("json body")
}

async fn put_article(app: &Router, slug: &str, title: &str) -> Response {
    send(
        app,
        request(
            Method::PUT,
            &format!("/articles/{slug}"),
            Some(json!({ "title": title, "body": "text" })),
        ),
    )
    .await
}

#[tokio::test]
async fn writes_invalidate_cached_reads() {
    let demo = demo(OutputCacheOptions::with_duration(3600));

    let created = put_article(&demo.app, "hello", "First").await;
    assert_eq!(created.status(), StatusCode::OK);

    let first = json_body(send(&demo.app, request(Method::GET, "/articles/hello", None)).await).await;
    assert_eq!(first["title"], "First");
    let cached = demo.store.len();

    let again = json_body(send(&demo.app, request(Method::GET, "/articles/hello", None)).await).await;
    assert_eq!(again, first);
    assert_eq!(demo.store.len(), cached);

    let updated = put_article(&demo.app, "hello", "Second").await;
    assert_eq!(updated.status(), StatusCode::OK);

    let fresh = json_body(send(&demo.app, request(Method::GET, "/articles/hello", None)).await).await;
    assert_eq!(fresh["title"], "Second");
    assert_eq!(fresh["revision"], 2);
}

#[tokio::test]
async fn listing_reflects_deletes() {
    let demo = demo(OutputCacheOptions::with_duration(3600));
    put_article(&demo.app, "a", "A").await;
    put_article(&demo.app, "b", "B").await;

    let listed = json_body(send(&demo.app, request(Method::GET, "/articles", None)).await).await;
    assert_eq!(listed.as_array().map(Vec::len), Some(2));

    let deleted = send(&demo.app, request(Method::DELETE, "/articles/a", None)).await;
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let listed = json_body(send(&demo.app, request(Method::GET, "/articles", None)).await).await;
    assert_eq!(listed.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn missing_article_is_not_cached() {
    let demo = demo(OutputCacheOptions::with_duration(3600));
    let baseline = demo.store.len();

    let response = send(&demo.app, request(Method::GET, "/articles/ghost", None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(demo.store.len(), baseline);

    put_article(&demo.app, "ghost", "Boo").await;
    let response = send(&demo.app, request(Method::GET, "/articles/ghost", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn invalid_input_is_a_client_error() {
    let demo = demo(OutputCacheOptions::with_duration(3600));
    let response = put_article(&demo.app, "Bad_Slug", "x").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_reports_store_size() {
    let demo = demo(OutputCacheOptions::with_duration(3600));
    let health = json_body(send(&demo.app, request(Method::GET, "/_health", None)).await).await;

    assert_eq!(health["status"], "ok");
    assert_eq!(health["cached_values"], 1);
}

#[tokio::test]
async fn malformed_payload_is_rejected_with_a_public_message() {
    let demo = demo(OutputCacheOptions::with_duration(3600));
    let request = Request::builder()
        .method(Method::PUT)
        .uri("/articles/hello")
        .header(header::HOST, HOST)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .expect("request should build");

    let response = send(&demo.app, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should be readable");
    assert_eq!(&bytes[..], b"Invalid article payload");
}
