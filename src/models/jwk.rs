//! JSON Web Key models
//!
//! [`Jwk`] is the private form kept in storage; [`PublicJwk`] is what
//! `jwks.json` publishes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// JWK with private members, as persisted in the assets blob
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwk {
    pub kty: String,
    pub kid: String,
    pub alg: String,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dq: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qi: Option<String>,
    /// Symmetric key value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<String>,
}

impl Jwk {
    /// Empty key of the given type; generators fill in the members
    pub fn new(kty: &str, kid: impl Into<String>, alg: &str) -> Self {
        Self {
            kty: kty.to_string(),
            kid: kid.into(),
            alg: alg.to_string(),
            key_use: Some("sig".to_string()),
            crv: None,
            x: None,
            y: None,
            d: None,
            n: None,
            e: None,
            p: None,
            q: None,
            dp: None,
            dq: None,
            qi: None,
            k: None,
        }
    }

    /// Whether this is a shared-secret key that must never be published
    pub fn is_symmetric(&self) -> bool {
        self.kty == "oct"
    }

    /// Public projection, or `None` for symmetric keys
    pub fn public(&self) -> Option<PublicJwk> {
        if self.is_symmetric() {
            return None;
        }

        Some(PublicJwk {
            kty: self.kty.clone(),
            kid: self.kid.clone(),
            alg: self.alg.clone(),
            key_use: self.key_use.clone(),
            crv: self.crv.clone(),
            x: self.x.clone(),
            y: self.y.clone(),
            n: self.n.clone(),
            e: self.e.clone(),
        })
    }
}

/// Public members only
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicJwk {
    pub kty: String,
    pub kid: String,
    pub alg: String,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PublicJwkSet {
    pub keys: Vec<PublicJwk>,
}

/// Stored signing key
#[derive(Debug, Clone)]
pub struct JwkRecord {
    pub kid: String,
    pub alg: String,
    pub signing_default: bool,
    pub jwk: Jwk,
    pub created_at: DateTime<Utc>,
}

/// Constraint for `read_signing_key`
#[derive(Debug, Clone, Default)]
pub struct SigningKeyQuery {
    /// Newest key with this algorithm; the signing default when unset
    pub alg: Option<String>,
}
