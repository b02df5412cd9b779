//! One-time password endpoints

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use validator::Validate;

use crate::api::JsonBody;
use crate::middleware::RequestTx;
use crate::models::{
    OtpCreateRequest, OtpCreateResponse, OtpCreateResults, OtpEmailCreateIdResults,
    OtpEmailCreateRequest, OtpEmailCreateResponse, OtpEmailCreateResults, OtpValidateRequest,
    OtpValidateResponse, OtpValidateResults, RequestMetadata, ServiceAccount,
};
use crate::services::email::otp_email;
use crate::utils::{AppError, AppResult};
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/create", post(create_otp))
        .route("/validate", post(validate_otp))
}

pub fn email_routes() -> Router<AppState> {
    Router::new().route("/create", post(create_otp_email))
}

async fn create_otp(
    State(state): State<AppState>,
    account: ServiceAccount,
    tx: RequestTx,
    JsonBody(request): JsonBody<OtpCreateRequest>,
) -> AppResult<(StatusCode, Json<OtpCreateResponse>)> {
    let (id, otp) = {
        let mut conn = tx.conn().await?;
        state
            .otp
            .create(&mut conn, &account, &request.otp_create_params)
            .await?
    };

    Ok((
        StatusCode::CREATED,
        Json(OtpCreateResponse {
            otp_create_results: OtpCreateResults { id, otp },
            request_metadata: RequestMetadata::current(),
        }),
    ))
}

async fn create_otp_email(
    State(state): State<AppState>,
    account: ServiceAccount,
    tx: RequestTx,
    JsonBody(request): JsonBody<OtpEmailCreateRequest>,
) -> AppResult<(StatusCode, Json<OtpEmailCreateResponse>)> {
    let params = request.otp_email_create_params;
    params.email_params.validate()?;

    let (id, code) = {
        let mut conn = tx.conn().await?;
        state
            .otp
            .create(&mut conn, &account, &params.otp_create_params)
            .await?
    };

    let email = otp_email(&params.email_params, &code);
    state
        .email
        .send(&email)
        .await
        .map_err(|e| AppError::Provider(format!("Failed to send OTP email: {e:#}")))?;

    Ok((
        StatusCode::CREATED,
        Json(OtpEmailCreateResponse {
            otp_email_create_results: OtpEmailCreateResults {
                otp_create_results: OtpEmailCreateIdResults { id },
            },
            request_metadata: RequestMetadata::current(),
        }),
    ))
}

/// A code that is absent, expired, used or wrong is a caller error here
async fn validate_otp(
    State(state): State<AppState>,
    account: ServiceAccount,
    tx: RequestTx,
    JsonBody(request): JsonBody<OtpValidateRequest>,
) -> AppResult<Json<OtpValidateResponse>> {
    let params = request.otp_validate_params;
    let outcome = {
        let mut conn = tx.conn().await?;
        state
            .otp
            .validate(&mut conn, &account, params.id, &params.otp)
            .await
    };

    // A failed attempt burns the OTP, so it commits ahead of the error response
    if matches!(outcome, Ok(()) | Err(AppError::NotFound(_))) {
        tx.commit().await?;
    }
    outcome.map_err(|e| match e {
        AppError::NotFound(msg) => AppError::BadRequest(msg),
        other => other,
    })?;

    Ok(Json(OtpValidateResponse {
        otp_validate_results: OtpValidateResults::default(),
        request_metadata: RequestMetadata::current(),
    }))
}
