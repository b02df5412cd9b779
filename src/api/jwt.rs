//! JWT endpoints

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};

use crate::api::JsonBody;
use crate::middleware::RequestTx;
use crate::models::{
    JwtCreateRequest, JwtCreateResponse, JwtCreateResults, JwtValidateRequest,
    JwtValidateResponse, JwtValidateResults, RequestMetadata, ServiceAccount,
};
use crate::utils::AppResult;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/create", post(create_jwt))
        .route("/validate", post(validate_jwt))
}

async fn create_jwt(
    State(state): State<AppState>,
    account: ServiceAccount,
    tx: RequestTx,
    JsonBody(request): JsonBody<JwtCreateRequest>,
) -> AppResult<(StatusCode, Json<JwtCreateResponse>)> {
    let jwt = {
        let mut conn = tx.conn().await?;
        state
            .jwt
            .create(&mut conn, &state.at_rest, &request.jwt_create_params, &account)
            .await?
    };

    Ok((
        StatusCode::CREATED,
        Json(JwtCreateResponse {
            jwt_create_results: JwtCreateResults { jwt },
            request_metadata: RequestMetadata::current(),
        }),
    ))
}

/// Tokens verify against the cached key set; a stale set is reloaded on the
/// request's own connection
async fn validate_jwt(
    State(state): State<AppState>,
    account: ServiceAccount,
    tx: RequestTx,
    JsonBody(request): JsonBody<JwtValidateRequest>,
) -> AppResult<Json<JwtValidateResponse>> {
    let keys = {
        let mut conn = tx.conn().await?;
        state.jwks.snapshot_in(&mut conn).await?
    };
    let jwt_claims = state
        .jwt
        .validate(&request.jwt_validate_params.jwt, &keys, account.aud)?;

    Ok(Json(JwtValidateResponse {
        jwt_validate_results: JwtValidateResults { jwt_claims },
        request_metadata: RequestMetadata::current(),
    }))
}
