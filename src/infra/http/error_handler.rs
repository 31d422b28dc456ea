//! Failure logging and error body redaction.
//!
//! Every 4xx/5xx response is logged with its [`ErrorReport`]. Server errors
//! have their body replaced: callers on the loopback interface and editors
//! see the diagnostic chain, everyone else a generic message.

use std::{net::SocketAddr, time::Instant};

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{HeaderValue, Request, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{error, warn};

use super::middleware::RequestContext;
use crate::{
    application::{error::ErrorReport, principal::Principal},
    cache::Interceptor,
};

pub const GENERIC_ERROR_MESSAGE: &str = "An error has occurred.";

#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorHandler;

impl Interceptor for ErrorHandler {
    async fn intercept(&self, request: Request<Body>, next: Next) -> Response {
        let method = request.method().clone();
        let uri = request.uri().clone();
        let start = Instant::now();
        let detailed = may_see_details(&request);
        let request_id = request
            .extensions()
            .get::<RequestContext>()
            .map(|ctx| ctx.request_id.clone())
            .unwrap_or_default();

        let response = next.run(request).await;
        let status = response.status();
        if !status.is_client_error() && !status.is_server_error() {
            return response;
        }

        let elapsed_ms = start.elapsed().as_millis();
        let report = ErrorReport::of(&response).cloned();
        let source = report.as_ref().map_or("unknown", |report| report.source);
        let detail = report
            .as_ref()
            .map_or("no diagnostic available", ErrorReport::detail)
            .to_string();
        let messages = report
            .as_ref()
            .map(|report| report.messages.clone())
            .unwrap_or_default();

        if !status.is_server_error() {
            warn!(
                target = "vercache::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                query = uri.query().unwrap_or(""),
                elapsed_ms = elapsed_ms,
                source = source,
                detail = %detail,
                request_id = request_id,
                "client request error",
            );
            return response;
        }

        error!(
            target = "vercache::http::response",
            status = status.as_u16(),
            method = %method,
            path = %uri.path(),
            query = uri.query().unwrap_or(""),
            elapsed_ms = elapsed_ms,
            source = source,
            detail = %detail,
            chain = ?messages,
            request_id = request_id,
            "request failed",
        );

        let body = if detailed && !messages.is_empty() {
            messages.join("\n")
        } else {
            GENERIC_ERROR_MESSAGE.to_string()
        };

        let mut replaced = (status, body).into_response();
        replaced.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        if let Some(report) = report {
            report.attach(&mut replaced);
        }
        replaced
    }
}

/// Loopback peers and editor/admin principals get the diagnostic chain.
fn may_see_details(request: &Request<Body>) -> bool {
    let local = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .is_some_and(|ConnectInfo(addr)| addr.ip().is_loopback());
    let editor = request
        .extensions()
        .get::<Principal>()
        .is_some_and(Principal::is_editor_or_admin);
    local || editor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> Request<Body> {
        Request::builder().uri("/").body(Body::empty()).expect("request")
    }

    #[test]
    fn anonymous_remote_caller_sees_no_details() {
        let mut request = request();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([203, 0, 113, 7], 4000))));
        assert!(!may_see_details(&request));
    }

    #[test]
    fn loopback_caller_sees_details() {
        let mut request = request();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))));
        assert!(may_see_details(&request));
    }

    #[test]
    fn editor_principal_sees_details() {
        let mut request = request();
        request
            .extensions_mut()
            .insert(Principal::new("ed", ["WebEditors"]));
        assert!(may_see_details(&request));

        let mut reader = self::request();
        reader
            .extensions_mut()
            .insert(Principal::new("reader", ["Readers"]));
        assert!(!may_see_details(&reader));
    }
}
