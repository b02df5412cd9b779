//! JWK set cache
//!
//! Holds a snapshot of the stored keys: the public JSON served at
//! `jwks.json` and the verification keys used by `jwt/validate`. A snapshot
//! older than the refresh interval is rebuilt from storage on the next read.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use jsonwebtoken::{Algorithm, DecodingKey};
use sqlx::SqliteConnection;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::db::{AtRestPolicy, DbPool, JwkRepository};
use crate::models::{JwkRecord, PublicJwkSet};
use crate::services::keys;

/// Key a token's signature is checked against
#[derive(Clone)]
pub struct VerificationKey {
    pub algorithm: Algorithm,
    pub decoding_key: DecodingKey,
}

/// Point-in-time view of the key set
pub struct JwksSnapshot {
    public_json: String,
    keys: HashMap<String, VerificationKey>,
    refreshed_at: Instant,
}

impl JwksSnapshot {
    /// Build a snapshot from stored records
    ///
    /// Symmetric keys verify tokens but are never part of the public JSON.
    /// Records whose key material does not decode are logged and left out.
    pub fn from_records(records: &[JwkRecord]) -> Result<Self> {
        let mut public = PublicJwkSet::default();
        let mut keys = HashMap::with_capacity(records.len());

        for record in records {
            if keys::signing_method(&record.jwk).is_none() {
                warn!(kid = %record.kid, crv = ?record.jwk.crv, "Skipping key with no supported signing method");
                continue;
            }

            let algorithm = match keys::parse_algorithm(&record.alg) {
                Ok(algorithm) => algorithm,
                Err(e) => {
                    warn!(kid = %record.kid, alg = %record.alg, error = %e, "Key cannot verify tokens");
                    continue;
                }
            };
            let decoding_key = match keys::decoding_key(&record.jwk) {
                Ok(decoding_key) => decoding_key,
                Err(e) => {
                    warn!(kid = %record.kid, error = %e, "Skipping key that cannot be decoded");
                    continue;
                }
            };
            if let Some(jwk) = record.jwk.public() {
                public.keys.push(jwk);
            }
            keys.insert(
                record.kid.clone(),
                VerificationKey {
                    algorithm,
                    decoding_key,
                },
            );
        }

        Ok(Self {
            public_json: serde_json::to_string(&public).context("Failed to render JWKS")?,
            keys,
            refreshed_at: Instant::now(),
        })
    }

    pub fn public_json(&self) -> &str {
        &self.public_json
    }

    pub fn verification_key(&self, kid: &str) -> Option<&VerificationKey> {
        self.keys.get(kid)
    }

    pub fn age(&self) -> Duration {
        self.refreshed_at.elapsed()
    }
}

/// Bounded-staleness cache over the stored key set
pub struct JwksCache {
    pool: DbPool,
    policy: Arc<AtRestPolicy>,
    refresh_interval: Duration,
    snapshot: RwLock<Option<Arc<JwksSnapshot>>>,
}

impl JwksCache {
    pub fn new(pool: DbPool, policy: Arc<AtRestPolicy>, refresh_interval: Duration) -> Self {
        Self {
            pool,
            policy,
            refresh_interval,
            snapshot: RwLock::new(None),
        }
    }

    /// Current snapshot, rebuilt through a pooled connection when stale
    pub async fn snapshot(&self) -> Result<Arc<JwksSnapshot>> {
        if let Some(snapshot) = self.fresh().await {
            return Ok(snapshot);
        }

        let mut conn = self
            .pool
            .acquire()
            .await
            .context("Failed to acquire connection for JWKS refresh")?;
        self.rebuild(&mut conn, false).await
    }

    /// Current snapshot, rebuilt through the caller's connection when stale
    ///
    /// Handlers running inside the request transaction use this so a refresh
    /// never needs a second pool connection.
    pub async fn snapshot_in(&self, conn: &mut SqliteConnection) -> Result<Arc<JwksSnapshot>> {
        if let Some(snapshot) = self.fresh().await {
            return Ok(snapshot);
        }
        self.rebuild(conn, false).await
    }

    /// Rebuild the snapshot now
    pub async fn refresh(&self) -> Result<Arc<JwksSnapshot>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .context("Failed to acquire connection for JWKS refresh")?;
        self.rebuild(&mut conn, true).await
    }

    async fn fresh(&self) -> Option<Arc<JwksSnapshot>> {
        let current = self.snapshot.read().await;
        current
            .as_ref()
            .filter(|snapshot| snapshot.age() < self.refresh_interval)
            .map(Arc::clone)
    }

    async fn rebuild(&self, conn: &mut SqliteConnection, force: bool) -> Result<Arc<JwksSnapshot>> {
        let mut current = self.snapshot.write().await;

        // Another writer may have refreshed while we waited
        if !force {
            if let Some(snapshot) = current.as_ref() {
                if snapshot.age() < self.refresh_interval {
                    return Ok(Arc::clone(snapshot));
                }
            }
        }

        let records = JwkRepository::new(conn, &self.policy)
            .key_read_all()
            .await?;
        debug!(keys = records.len(), "Refreshed JWKS cache");

        let fresh = Arc::new(JwksSnapshot::from_records(&records)?);
        *current = Some(Arc::clone(&fresh));
        Ok(fresh)
    }
}
