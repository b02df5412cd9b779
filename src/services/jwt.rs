//! JWT minting and validation
//!
//! Caller claims are kept as the exact JSON bytes the caller sent. The
//! registered claims are spliced into that object at the byte level and the
//! result is signed as-is, so the stored claim blob and the signed payload
//! are identical.

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{Header, Validation};
use serde::Serialize;
use serde_json::value::RawValue;
use serde_json::{Map, Value};
use sqlx::SqliteConnection;
use tracing::debug;
use uuid::Uuid;

use crate::config::LimitsConfig;
use crate::db::{AtRestPolicy, JwkRepository};
use crate::models::{JwkRecord, JwtCreateParams, ServiceAccount, SigningKeyQuery};
use crate::services::jwks::JwksSnapshot;
use crate::services::keys;
use crate::utils::validation::resolve_lifespan;
use crate::utils::{AppError, AppResult};

/// Claim names the server controls
pub const REGISTERED_CLAIMS: [&str; 7] = ["iss", "sub", "aud", "exp", "nbf", "iat", "jti"];

/// Largest caller claim object accepted, in bytes
pub const MAX_CLAIMS_BYTES: usize = 4096;

/// Claims injected by the server
///
/// `sub` is never set.
#[derive(Debug, Clone, Serialize)]
pub struct RegisteredClaims {
    pub iss: String,
    pub aud: Vec<String>,
    pub exp: i64,
    pub nbf: i64,
    pub iat: i64,
    pub jti: Uuid,
}

impl RegisteredClaims {
    pub fn new(iss: &str, aud: Uuid, lifespan: Duration) -> Self {
        let now = Utc::now().timestamp();
        let lifespan = i64::try_from(lifespan.as_secs()).unwrap_or(i64::MAX);

        Self {
            iss: iss.to_string(),
            aud: vec![aud.to_string()],
            exp: now.saturating_add(lifespan),
            nbf: now,
            iat: now,
            jti: Uuid::new_v4(),
        }
    }
}

/// A JSON claim object held as bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JwtClaims(Vec<u8>);

impl JwtClaims {
    /// Accept a caller-supplied claim object
    ///
    /// Absent claims become `{}`.
    pub fn from_caller(raw: Option<&RawValue>) -> AppResult<Self> {
        let Some(raw) = raw else {
            return Ok(Self(b"{}".to_vec()));
        };
        let text = raw.get();

        if text.len() > MAX_CLAIMS_BYTES {
            return Err(AppError::BadRequest(format!(
                "jwtClaims must be at most {MAX_CLAIMS_BYTES} bytes"
            )));
        }

        let object: Map<String, Value> = serde_json::from_str(text)
            .map_err(|_| AppError::BadRequest("jwtClaims must be a JSON object".to_string()))?;

        let mut provided: Vec<&str> = registered_names_in(&object).into_iter().collect();
        if !provided.is_empty() {
            provided.sort_unstable();
            return Err(AppError::RegisteredClaimProvided(provided.join(", ")));
        }

        Ok(Self(text.as_bytes().to_vec()))
    }

    /// Wrap bytes read back from storage
    pub fn from_stored(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Append the registered claims to the object
    pub fn with_registered(self, registered: &RegisteredClaims) -> AppResult<Self> {
        let injected = serde_json::to_vec(registered)?;
        let injected_fields = &injected[1..injected.len() - 1];

        let mut object = self.0;
        while object.last().is_some_and(u8::is_ascii_whitespace) {
            object.pop();
        }
        if object.pop() != Some(b'}') {
            return Err(AppError::Internal(
                "claim blob is not a JSON object".to_string(),
            ));
        }

        let is_empty = object
            .iter()
            .rev()
            .find(|b| !b.is_ascii_whitespace())
            .is_some_and(|b| *b == b'{');
        if !is_empty {
            object.push(b',');
        }
        object.extend_from_slice(injected_fields);
        object.push(b'}');

        Ok(Self(object))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Look up a top-level claim by name
    pub fn get(&self, name: &str) -> Option<Value> {
        let mut object: Map<String, Value> = serde_json::from_slice(&self.0).ok()?;
        object.remove(name)
    }

    pub fn iss(&self) -> Option<String> {
        self.get("iss")?.as_str().map(str::to_string)
    }

    pub fn exp(&self) -> Option<i64> {
        self.get("exp")?.as_i64()
    }

    pub fn jti(&self) -> Option<Uuid> {
        self.get("jti")?.as_str()?.parse().ok()
    }

    pub fn aud(&self) -> Vec<String> {
        match self.get("aud") {
            Some(Value::Array(values)) => values
                .into_iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(Value::String(single)) => vec![single],
            _ => Vec::new(),
        }
    }
}

/// Mints and validates JWTs for service accounts
#[derive(Debug, Clone)]
pub struct JwtService {
    iss: String,
    default_lifespan_secs: u64,
    max_lifespan_secs: u64,
}

impl JwtService {
    pub fn new(iss: impl Into<String>, limits: &LimitsConfig) -> Self {
        Self {
            iss: iss.into(),
            default_lifespan_secs: limits.jwt_lifespan_default_secs,
            max_lifespan_secs: limits.jwt_lifespan_max_secs,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.iss
    }

    /// Validate caller parameters and build the full claim blob, unsigned
    pub fn prepare_claims(
        &self,
        params: &JwtCreateParams,
        account: &ServiceAccount,
    ) -> AppResult<JwtClaims> {
        let lifespan = resolve_lifespan(
            params.jwt_lifespan_seconds,
            self.default_lifespan_secs,
            self.max_lifespan_secs,
            "JWT",
        )?;
        check_algorithm_hint(params.jwt_alg.as_deref())?;

        let registered = RegisteredClaims::new(&self.iss, account.aud, lifespan);
        JwtClaims::from_caller(params.jwt_claims.as_deref())?.with_registered(&registered)
    }

    /// Mint a JWT with the key selected by the algorithm hint or the signing default
    pub async fn create(
        &self,
        conn: &mut SqliteConnection,
        policy: &AtRestPolicy,
        params: &JwtCreateParams,
        account: &ServiceAccount,
    ) -> AppResult<String> {
        let claims = self.prepare_claims(params, account)?;

        let query = SigningKeyQuery {
            alg: params.jwt_alg.clone(),
        };
        let key = JwkRepository::new(conn, policy)
            .read_signing_key(&query)
            .await?
            .ok_or_else(|| missing_key_error(params.jwt_alg.as_deref()))?;

        sign(&claims, &key, params.jwt_alg.as_deref())
    }

    /// Verify a JWT against the published key set
    ///
    /// Every failure, including issuer and audience mismatches, is a
    /// [`AppError::TokenError`].
    pub fn validate(&self, token: &str, keys: &JwksSnapshot, aud: Uuid) -> AppResult<Value> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| AppError::TokenError(format!("Malformed JWT: {e}")))?;
        let kid = header
            .kid
            .ok_or_else(|| AppError::TokenError("JWT header has no kid".to_string()))?;
        let key = keys
            .verification_key(&kid)
            .ok_or_else(|| AppError::TokenError(format!("Unknown signing key: {kid}")))?;

        if header.alg != key.algorithm {
            return Err(AppError::TokenError(
                "JWT algorithm does not match its signing key".to_string(),
            ));
        }

        let mut validation = Validation::new(key.algorithm);
        validation.set_issuer(&[self.iss.as_str()]);
        validation.set_audience(&[aud.to_string()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation.validate_nbf = true;

        let data = jsonwebtoken::decode::<Value>(token, &key.decoding_key, &validation)
            .map_err(|e| AppError::TokenError(format!("Invalid JWT: {e}")))?;

        Ok(data.claims)
    }
}

/// Reject algorithm hints no stored key could satisfy
pub fn check_algorithm_hint(alg: Option<&str>) -> AppResult<()> {
    match alg {
        Some(alg) if !keys::is_supported_algorithm(alg) => Err(AppError::BadRequest(format!(
            "Unsupported JWT algorithm: {alg}"
        ))),
        _ => Ok(()),
    }
}

pub fn missing_key_error(alg: Option<&str>) -> AppError {
    match alg {
        Some(alg) => AppError::BadRequest(format!("No signing key with algorithm {alg}")),
        None => AppError::Internal("No signing-default key in the JWK set".to_string()),
    }
}

/// Sign claim bytes with a stored key
///
/// `method` overrides the method derived from the key type.
pub fn sign(claims: &JwtClaims, key: &JwkRecord, method: Option<&str>) -> AppResult<String> {
    let method = match method {
        Some(method) => method,
        None => keys::signing_method(&key.jwk).ok_or_else(|| {
            AppError::Crypto(format!("Key {} has no supported signing method", key.kid))
        })?,
    };
    let algorithm = keys::parse_algorithm(method)?;

    let mut header = Header::new(algorithm);
    header.kid = Some(key.kid.clone());

    let payload: &RawValue = serde_json::from_slice(claims.as_bytes())
        .map_err(|e| AppError::Internal(format!("claim blob is not valid JSON: {e}")))?;
    let encoding_key = keys::encoding_key(&key.jwk)?;

    let token = jsonwebtoken::encode(&header, &payload, &encoding_key)
        .map_err(|e| AppError::Crypto(format!("Failed to sign JWT with key {}: {e}", key.kid)))?;

    debug!(kid = %key.kid, method, "Signed JWT");
    Ok(token)
}

/// Registered names present in a claim object
pub fn registered_names_in(object: &Map<String, Value>) -> HashSet<&'static str> {
    REGISTERED_CLAIMS
        .iter()
        .copied()
        .filter(|name| object.contains_key(*name))
        .collect()
}
