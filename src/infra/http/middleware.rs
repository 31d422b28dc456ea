use axum::{
    body::Body,
    http::{Request, header},
    middleware::Next,
    response::Response,
};
use tracing::debug;
use uuid::Uuid;

use crate::application::principal::Principal;

const BEARER_PREFIX: &str = "Bearer ";

#[derive(Clone)]
pub struct RequestContext {
    pub request_id: String,
}

pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let ctx = RequestContext {
        request_id: request_id.clone(),
    };
    request.extensions_mut().insert(ctx.clone());

    let mut response = next.run(request).await;
    response.extensions_mut().insert(ctx);
    response
}

/// Demo authentication: `Authorization: Bearer <name>[:<role>,<role>...]`
/// attaches a [`Principal`]. Missing or malformed headers leave the request
/// anonymous.
pub async fn authenticate(mut request: Request<Body>, next: Next) -> Response {
    let principal = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_bearer);

    if let Some(principal) = principal {
        debug!(
            target = "vercache::http::auth",
            principal = %principal.name,
            roles = ?principal.roles,
            "request authenticated"
        );
        request.extensions_mut().insert(principal);
    }

    next.run(request).await
}

fn parse_bearer(value: &str) -> Option<Principal> {
    let token = value.strip_prefix(BEARER_PREFIX)?.trim();
    let (name, roles) = token.split_once(':').unwrap_or((token, ""));
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let roles = roles
        .split(',')
        .map(str::trim)
        .filter(|role| !role.is_empty());
    Some(Principal::new(name, roles))
}
