//! Public JWK set

use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};

use crate::utils::AppResult;
use crate::AppState;

/// `GET jwks.json`: the cached public key set, at most one refresh window old
pub async fn jwks_json(State(state): State<AppState>) -> AppResult<Response> {
    let snapshot = state.jwks.snapshot().await?;
    Ok((
        [(header::CONTENT_TYPE, "application/json")],
        snapshot.public_json().to_string(),
    )
        .into_response())
}
