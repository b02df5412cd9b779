//! API key authentication
//!
//! Callers present their API key in the `X-API-KEY` header. The resolved
//! service account is placed in request extensions for later layers and
//! handlers.

use axum::{
    extract::{FromRequestParts, Request},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::ServiceAccountRepository;
use crate::middleware::RequestTx;
use crate::models::ServiceAccount;
use crate::utils::AppError;

pub const API_KEY_HEADER: &str = "X-API-KEY";

/// Parse the API key header
fn api_key_from_parts(request: &Request) -> Result<Uuid, AppError> {
    let raw = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing X-API-KEY header".to_string()))?;

    Uuid::parse_str(raw.trim()).map_err(|_| AppError::Unauthorized("Invalid API key".to_string()))
}

/// Resolve the caller's service account
///
/// The lookup runs on the request transaction's connection, so a request
/// never holds more than one pooled connection.
pub async fn authn_middleware(mut request: Request, next: Next) -> Result<Response, AppError> {
    let api_key = api_key_from_parts(&request)?;
    let tx = request
        .extensions()
        .get::<RequestTx>()
        .cloned()
        .ok_or_else(|| AppError::Internal("no request transaction".to_string()))?;

    let record = {
        let mut conn = tx.conn().await?;
        ServiceAccountRepository::new(&mut conn)
            .read_by_api_key(api_key)
            .await?
    };

    let Some(record) = record else {
        warn!("Rejected unknown API key");
        return Err(AppError::Unauthorized("Invalid API key".to_string()));
    };

    debug!(sa_uuid = %record.account.uuid, admin = record.account.admin, "Authenticated service account");
    request.extensions_mut().insert(record.account);
    Ok(next.run(request).await)
}

/// Only admin service accounts may pass
pub async fn admin_middleware(request: Request, next: Next) -> Result<Response, AppError> {
    let account = request
        .extensions()
        .get::<ServiceAccount>()
        .ok_or_else(|| AppError::Unauthorized("Authentication required".to_string()))?;

    if !account.admin {
        warn!(sa_uuid = %account.uuid, "Non-admin service account denied");
        return Err(AppError::Forbidden(
            "Service account is not an admin".to_string(),
        ));
    }

    Ok(next.run(request).await)
}

/// Extractor for the authenticated service account
impl<S> FromRequestParts<S> for ServiceAccount
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<ServiceAccount>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized("Authentication required".to_string()))
    }
}
