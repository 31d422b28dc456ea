mod error_handler;
mod middleware;

pub use error_handler::{ErrorHandler, GENERIC_ERROR_MESSAGE};
pub use middleware::{RequestContext, authenticate, set_request_context};

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::get,
};

use crate::{
    application::{
        content::{Article, ArticleInput, ArticleService, ArticleSummary},
        error::{AppError, HttpError},
    },
    cache::{MemoryStore, OutputCache, intercept},
};

#[derive(Clone)]
pub struct HttpState {
    pub articles: ArticleService,
    pub store: Arc<MemoryStore>,
}

/// Build the demo router.
///
/// Article reads go through the output cache; writes pass through it
/// untouched and advance the content version.
pub fn build_router(state: HttpState, cache: OutputCache) -> Router {
    let cached_routes = Router::new()
        .route("/articles", get(list_articles))
        .route(
            "/articles/{slug}",
            get(show_article).put(upsert_article).delete(delete_article),
        )
        .layer(axum_middleware::from_fn_with_state(
            cache,
            intercept::<OutputCache>,
        ));

    let uncached_routes = Router::new().route("/_health", get(health));

    cached_routes
        .merge(uncached_routes)
        .with_state(state)
        .layer(axum_middleware::from_fn_with_state(
            ErrorHandler,
            intercept::<ErrorHandler>,
        ))
        .layer(axum_middleware::from_fn(authenticate))
        .layer(axum_middleware::from_fn(set_request_context))
}

async fn list_articles(State(state): State<HttpState>) -> Json<Vec<ArticleSummary>> {
    Json(state.articles.list().await)
}

async fn show_article(
    State(state): State<HttpState>,
    Path(slug): Path<String>,
) -> Result<Json<Article>, AppError> {
    state.articles.get(&slug).await.map(Json)
}

async fn upsert_article(
    State(state): State<HttpState>,
    Path(slug): Path<String>,
    payload: Result<Json<ArticleInput>, JsonRejection>,
) -> Result<Json<Article>, Response> {
    let Json(input) = payload.map_err(|rejection| {
        HttpError::from_error(
            "infra::http::upsert_article",
            rejection.status(),
            "Invalid article payload",
            &rejection,
        )
        .into_response()
    })?;
    state
        .articles
        .upsert(&slug, input)
        .await
        .map(Json)
        .map_err(IntoResponse::into_response)
}

async fn delete_article(
    State(state): State<HttpState>,
    Path(slug): Path<String>,
) -> Result<StatusCode, AppError> {
    state.articles.delete(&slug).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn health(State(state): State<HttpState>) -> Response {
    let body = serde_json::json!({
        "status": "ok",
        "cached_values": state.store.len(),
    });
    (StatusCode::OK, Json(body)).into_response()
}
