//! One-time password models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{EmailParams, RequestMetadata};

/// Arguments for persisting a generated code
#[derive(Debug, Clone)]
pub struct CreateOtp {
    pub id: Uuid,
    pub sa_uuid: Uuid,
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpCreateParams {
    #[serde(default)]
    pub char_set_alpha_lower: bool,
    #[serde(default)]
    pub char_set_alpha_upper: bool,
    #[serde(default)]
    pub char_set_numeric: bool,
    /// Zero or absent selects the configured default
    #[serde(default)]
    pub length: usize,
    #[serde(default)]
    pub lifespan_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpCreateRequest {
    pub otp_create_params: OtpCreateParams,
}

#[derive(Debug, Clone, Serialize)]
pub struct OtpCreateResults {
    pub id: Uuid,
    pub otp: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpCreateResponse {
    pub otp_create_results: OtpCreateResults,
    pub request_metadata: RequestMetadata,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpEmailCreateParams {
    #[serde(default)]
    pub otp_create_params: OtpCreateParams,
    pub email_params: EmailParams,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpEmailCreateRequest {
    pub otp_email_create_params: OtpEmailCreateParams,
}

/// Only the id; the code travels by email
#[derive(Debug, Clone, Serialize)]
pub struct OtpEmailCreateIdResults {
    pub id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpEmailCreateResults {
    pub otp_create_results: OtpEmailCreateIdResults,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpEmailCreateResponse {
    pub otp_email_create_results: OtpEmailCreateResults,
    pub request_metadata: RequestMetadata,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtpValidateParams {
    pub id: Uuid,
    pub otp: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpValidateRequest {
    pub otp_validate_params: OtpValidateParams,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OtpValidateResults {}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpValidateResponse {
    pub otp_validate_results: OtpValidateResults,
    pub request_metadata: RequestMetadata,
}
