//! JWT request and response bodies

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use super::RequestMetadata;

/// Parameters shared by `jwt/create` and the magic-link endpoints
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JwtCreateParams {
    /// Caller claims, kept byte-for-byte as sent
    #[serde(default)]
    pub jwt_claims: Option<Box<RawValue>>,
    /// Zero or absent selects the configured default
    #[serde(default)]
    pub jwt_lifespan_seconds: u64,
    /// Signing algorithm hint; the signing-default key when absent
    #[serde(default)]
    pub jwt_alg: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JwtCreateRequest {
    pub jwt_create_params: JwtCreateParams,
}

#[derive(Debug, Clone, Serialize)]
pub struct JwtCreateResults {
    pub jwt: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JwtCreateResponse {
    pub jwt_create_results: JwtCreateResults,
    pub request_metadata: RequestMetadata,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtValidateParams {
    pub jwt: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JwtValidateRequest {
    pub jwt_validate_params: JwtValidateParams,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JwtValidateResults {
    pub jwt_claims: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JwtValidateResponse {
    pub jwt_validate_results: JwtValidateResults,
    pub request_metadata: RequestMetadata,
}
