//! Per-request context: UUID, deadline and tracing span

use std::time::Duration;

use axum::{
    body::Body,
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, Request as HttpRequest},
    middleware::Next,
    response::Response,
};
use tokio::time::Instant;
use tracing::{info_span, warn, Span};
use uuid::Uuid;

use crate::utils::AppError;

tokio::task_local! {
    static REQUEST_UUID: Uuid;
}

/// UUID of the request being served on this task, if any
pub fn current_request_uuid() -> Option<Uuid> {
    REQUEST_UUID.try_with(|uuid| *uuid).ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestUuid(pub Uuid);

/// Instant by which the request must be answered
#[derive(Debug, Clone, Copy)]
pub struct RequestDeadline(pub Instant);

impl<S> FromRequestParts<S> for RequestDeadline
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestDeadline>()
            .copied()
            .ok_or_else(|| AppError::Internal("no request deadline".to_string()))
    }
}

/// Mint a fresh UUID and run the rest of the stack inside its scope
pub async fn request_uuid_middleware(mut request: Request, next: Next) -> Response {
    let uuid = Uuid::new_v4();
    request.extensions_mut().insert(RequestUuid(uuid));
    REQUEST_UUID.scope(uuid, next.run(request)).await
}

/// Bound the request by the configured timeout
///
/// Dropping the inner future on expiry also drops the request transaction,
/// which rolls it back.
pub async fn timeout_middleware(
    State(timeout): State<Duration>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let deadline = Instant::now() + timeout;
    request.extensions_mut().insert(RequestDeadline(deadline));
    let path = request.uri().path().to_string();

    tokio::time::timeout_at(deadline, next.run(request))
        .await
        .map_err(|_| {
            warn!(path = %path, timeout_ms = timeout.as_millis() as u64, "Request deadline exceeded");
            AppError::Internal(format!("request deadline exceeded after {timeout:?}"))
        })
}

/// Span for `TraceLayer`
///
/// Only the path is recorded; query strings carry link secrets.
pub fn make_request_span(request: &HttpRequest<Body>) -> Span {
    let uuid = request
        .extensions()
        .get::<RequestUuid>()
        .map(|r| r.0)
        .unwrap_or_else(Uuid::nil);

    info_span!(
        "request",
        request_uuid = %uuid,
        method = %request.method(),
        path = %request.uri().path(),
    )
}
