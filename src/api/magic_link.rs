//! Magic link endpoints
//!
//! Creation is authenticated. Redemption is public: the link secret is the
//! credential.

use std::collections::HashMap;

use axum::{
    extract::{
        rejection::{FormRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    response::Response,
    routing::post,
    Form, Json, Router,
};
use tracing::warn;
use uuid::Uuid;
use validator::Validate;

use crate::api::JsonBody;
use crate::middleware::{RequestDeadline, RequestTx};
use crate::models::{
    MagicLinkCreateRequest, MagicLinkCreateResponse, MagicLinkEmailCreateRequest,
    MagicLinkEmailCreateResponse, MagicLinkEmailCreateResults, RequestMetadata, ServiceAccount,
};
use crate::services::{email::magic_link_email, InterstitialForm};
use crate::utils::{AppError, AppResult};
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/create", post(create_magic_link))
}

pub fn email_routes() -> Router<AppState> {
    Router::new().route("/create", post(create_magic_link_email))
}

async fn create_magic_link(
    State(state): State<AppState>,
    account: ServiceAccount,
    tx: RequestTx,
    JsonBody(request): JsonBody<MagicLinkCreateRequest>,
) -> AppResult<(StatusCode, Json<MagicLinkCreateResponse>)> {
    let results = {
        let mut conn = tx.conn().await?;
        state
            .magic_links
            .create(&mut conn, &account, &request.magic_link_create_params)
            .await?
    };

    Ok((
        StatusCode::CREATED,
        Json(MagicLinkCreateResponse {
            magic_link_create_results: results,
            request_metadata: RequestMetadata::current(),
        }),
    ))
}

/// Create a link and mail it; a failed send rolls the link back
async fn create_magic_link_email(
    State(state): State<AppState>,
    account: ServiceAccount,
    tx: RequestTx,
    JsonBody(request): JsonBody<MagicLinkEmailCreateRequest>,
) -> AppResult<(StatusCode, Json<MagicLinkEmailCreateResponse>)> {
    let params = request.magic_link_email_create_params;
    params.email_params.validate()?;

    let results = {
        let mut conn = tx.conn().await?;
        state
            .magic_links
            .create(&mut conn, &account, &params.magic_link_create_params)
            .await?
    };

    let email = magic_link_email(&params.email_params, &results.magic_link);
    state.email.send(&email).await.map_err(|e| {
        AppError::Provider(format!("Failed to send magic link email: {e:#}"))
    })?;

    Ok((
        StatusCode::CREATED,
        Json(MagicLinkEmailCreateResponse {
            magic_link_email_create_results: MagicLinkEmailCreateResults {
                magic_link_create_results: results,
            },
            request_metadata: RequestMetadata::current(),
        }),
    ))
}

/// `GET <redirect path>?<secret key>=<uuid>`
pub async fn redeem_magic_link(
    State(state): State<AppState>,
    tx: RequestTx,
    query: Result<Query<HashMap<String, String>>, QueryRejection>,
) -> AppResult<Response> {
    let Query(query) = query.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let key = state.magic_links.secret_query_key();

    let raw = query
        .get(key)
        .ok_or_else(|| AppError::BadRequest(format!("Missing query parameter: {key}")))?;
    let secret = Uuid::parse_str(raw)
        .map_err(|_| AppError::BadRequest(format!("Malformed query parameter: {key}")))?;

    let args = {
        let mut conn = tx.conn().await?;
        state.magic_links.redeem(&mut conn, secret).await?
    };

    state.redirector.redirect(args).await
}

/// `POST <redirect path>`: interstitial form coming back
pub async fn complete_magic_link(
    State(state): State<AppState>,
    deadline: RequestDeadline,
    form: Result<Form<InterstitialForm>, FormRejection>,
) -> AppResult<Response> {
    let Form(form) = form.map_err(|e| {
        warn!(error = %e, "Rejected interstitial form");
        AppError::BadRequest(e.body_text())
    })?;

    state.redirector.complete(form, Some(deadline.0)).await
}
