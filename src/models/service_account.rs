//! Service account models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::RequestMetadata;

/// Authenticated principal of an API call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccount {
    pub uuid: Uuid,
    pub api_key: Uuid,
    /// Audience stamped into every JWT this account mints
    pub aud: Uuid,
    pub admin: bool,
}

/// Arguments for inserting a service account
#[derive(Debug, Clone)]
pub struct CreateServiceAccount {
    pub uuid: Uuid,
    pub api_key: Uuid,
    pub aud: Uuid,
    pub admin: bool,
}

impl CreateServiceAccount {
    /// Fresh non-admin account with random identifiers
    pub fn generate() -> Self {
        Self {
            uuid: Uuid::new_v4(),
            api_key: Uuid::new_v4(),
            aud: Uuid::new_v4(),
            admin: false,
        }
    }
}

/// Stored row, including bookkeeping columns
#[derive(Debug, Clone)]
pub struct ServiceAccountRecord {
    pub account: ServiceAccount,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccountCreateParams {}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccountCreateRequest {
    #[serde(default)]
    pub service_account_create_params: ServiceAccountCreateParams,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccountCreateResults {
    pub service_account: ServiceAccount,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccountCreateResponse {
    pub service_account_create_results: ServiceAccountCreateResults,
    pub request_metadata: RequestMetadata,
}
