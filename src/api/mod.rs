//! API routes and handlers
//!
//! This module defines all API endpoints and their routing. Paths are
//! relative to the route prefix taken from the configured base URL.

use axum::{routing::get, Router};

use crate::utils::{AppError, AppResult};
use crate::AppState;

mod extract;
mod health;
mod jwks;
mod jwt;
mod magic_link;
mod otp;
mod service_account;

pub use extract::JsonBody;
pub use health::*;

/// Routes outside the request transaction
pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/ready", get(health::readiness))
        .route("/jwks.json", get(jwks::jwks_json))
}

/// Magic-link redemption; transactional but unauthenticated
pub fn redirect_routes(redirect_path: &str) -> Router<AppState> {
    Router::new().route(
        redirect_path,
        get(magic_link::redeem_magic_link).post(magic_link::complete_magic_link),
    )
}

/// Routes for any authenticated service account
pub fn protected_routes() -> Router<AppState> {
    Router::new()
        .nest("/jwt", jwt::routes())
        .nest("/magic-link", magic_link::routes())
        .nest("/magic-link-email", magic_link::email_routes())
        .nest("/otp", otp::routes())
        .nest("/otp-email", otp::email_routes())
}

/// Routes reserved for admin service accounts
pub fn admin_routes() -> Router<AppState> {
    Router::new().nest("/admin/service-account", service_account::routes())
}

/// JSON 404 for unknown paths
pub async fn not_found() -> AppResult<()> {
    Err(AppError::NotFound("Route not found".to_string()))
}
