//! Readiness endpoint

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::models::RequestMetadata;
use crate::{db, AppState};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyResponse {
    pub status: String,
    pub version: String,
    pub request_metadata: RequestMetadata,
}

impl ReadyResponse {
    fn new(status: &str) -> Self {
        Self {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            request_metadata: RequestMetadata::current(),
        }
    }
}

/// Readiness probe
///
/// Returns 200 when the database answers, 503 otherwise.
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    if db::check_health(&state.db).await {
        (StatusCode::OK, Json(ReadyResponse::new("ready")))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse::new("unavailable")),
        )
    }
}
