//! Database setup singleton

use serde::{Deserialize, Serialize};

/// Persisted once on first start; checked against configuration afterwards
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SetupRecord {
    pub plaintext_claims: bool,
    #[serde(rename = "plaintextJWK")]
    pub plaintext_jwk: bool,
    pub semver: String,
}
