//! Magic link models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{EmailParams, JwtCreateParams, RequestMetadata};

/// Query key the JWT travels in when the caller names none
pub const DEFAULT_REDIRECT_QUERY_KEY: &str = "jwt";

/// Arguments for persisting a new link
#[derive(Debug, Clone)]
pub struct CreateMagicLink {
    pub sa_uuid: Uuid,
    pub expires_at: DateTime<Utc>,
    /// Claim bytes, already merged with registered claims
    pub claims: Vec<u8>,
    /// Algorithm the pinned key must carry; the signing default when `None`
    pub jwt_alg: Option<String>,
    pub redirect_url: String,
    pub redirect_query_key: String,
}

/// Row handed back by the read-and-expire statement
#[derive(Debug, Clone)]
pub struct RedeemedMagicLink {
    pub secret: Uuid,
    pub sa_uuid: Uuid,
    pub expires_at: DateTime<Utc>,
    pub claims: Vec<u8>,
    pub jwt_key_id: Option<String>,
    pub jwt_signing_method: Option<String>,
    pub redirect_url: String,
    pub redirect_query_key: String,
    pub visited_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MagicLinkCreateParams {
    #[serde(default)]
    pub jwt_create_params: JwtCreateParams,
    /// Zero or absent selects the configured default
    #[serde(default)]
    pub lifespan_seconds: u64,
    #[serde(default)]
    pub redirect_query_key: Option<String>,
    #[serde(rename = "redirectURL")]
    pub redirect_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MagicLinkCreateRequest {
    pub magic_link_create_params: MagicLinkCreateParams,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MagicLinkCreateResults {
    pub magic_link: String,
    pub secret: Uuid,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MagicLinkCreateResponse {
    pub magic_link_create_results: MagicLinkCreateResults,
    pub request_metadata: RequestMetadata,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MagicLinkEmailCreateParams {
    pub magic_link_create_params: MagicLinkCreateParams,
    pub email_params: EmailParams,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MagicLinkEmailCreateRequest {
    pub magic_link_email_create_params: MagicLinkEmailCreateParams,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MagicLinkEmailCreateResults {
    pub magic_link_create_results: MagicLinkCreateResults,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MagicLinkEmailCreateResponse {
    pub magic_link_email_create_results: MagicLinkEmailCreateResults,
    pub request_metadata: RequestMetadata,
}
