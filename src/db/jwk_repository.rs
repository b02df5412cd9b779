//! Signing key repository
//!
//! The private JWK is serialized once and stored in the `assets` column,
//! sealed with the at-rest cipher unless `plaintext_jwk` is set.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqliteConnection;

use super::{format_timestamp, parse_db_timestamp, AtRestPolicy};
use crate::models::{Jwk, JwkRecord, SigningKeyQuery};

#[derive(Debug, sqlx::FromRow)]
struct JwkRow {
    kid: String,
    alg: String,
    signing_default: bool,
    assets: Vec<u8>,
    created_at: String,
}

pub struct JwkRepository<'a> {
    conn: &'a mut SqliteConnection,
    policy: &'a AtRestPolicy,
}

impl<'a> JwkRepository<'a> {
    pub fn new(conn: &'a mut SqliteConnection, policy: &'a AtRestPolicy) -> Self {
        Self { conn, policy }
    }

    /// Store a new key; it does not become the signing default
    pub async fn key_write(&mut self, jwk: &Jwk) -> Result<()> {
        let json = serde_json::to_vec(jwk).context("Failed to serialize JWK")?;
        let assets = self.policy.seal_jwk(&json)?;

        sqlx::query(
            r#"
            INSERT INTO jwks (kid, alg, signing_default, assets, created_at)
            VALUES (?, ?, 0, ?, ?)
            "#,
        )
        .bind(&jwk.kid)
        .bind(&jwk.alg)
        .bind(assets)
        .bind(format_timestamp(Utc::now()))
        .execute(&mut *self.conn)
        .await
        .with_context(|| format!("Failed to write JWK {}", jwk.kid))?;

        Ok(())
    }

    pub async fn key_read(&mut self, kid: &str) -> Result<Option<JwkRecord>> {
        let row = sqlx::query_as::<_, JwkRow>(
            "SELECT kid, alg, signing_default, assets, created_at FROM jwks WHERE kid = ?",
        )
        .bind(kid)
        .fetch_optional(&mut *self.conn)
        .await
        .context("Failed to read JWK")?;

        row.map(|row| self.row_to_record(row)).transpose()
    }

    pub async fn key_read_all(&mut self) -> Result<Vec<JwkRecord>> {
        let rows = sqlx::query_as::<_, JwkRow>(
            r#"
            SELECT kid, alg, signing_default, assets, created_at
            FROM jwks
            ORDER BY created_at ASC, kid ASC
            "#,
        )
        .fetch_all(&mut *self.conn)
        .await
        .context("Failed to list JWKs")?;

        rows.into_iter()
            .map(|row| self.row_to_record(row))
            .collect()
    }

    pub async fn key_delete(&mut self, kid: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM jwks WHERE kid = ?")
            .bind(kid)
            .execute(&mut *self.conn)
            .await
            .context("Failed to delete JWK")?;

        Ok(result.rows_affected() > 0)
    }

    /// Newest key for the requested algorithm, or the signing default
    pub async fn read_signing_key(&mut self, query: &SigningKeyQuery) -> Result<Option<JwkRecord>> {
        let row = match query.alg.as_deref() {
            Some(alg) => {
                sqlx::query_as::<_, JwkRow>(
                    r#"
                    SELECT kid, alg, signing_default, assets, created_at
                    FROM jwks
                    WHERE alg = ?
                    ORDER BY created_at DESC, kid DESC
                    LIMIT 1
                    "#,
                )
                .bind(alg)
                .fetch_optional(&mut *self.conn)
                .await
            }
            None => {
                sqlx::query_as::<_, JwkRow>(
                    r#"
                    SELECT kid, alg, signing_default, assets, created_at
                    FROM jwks
                    WHERE signing_default = 1
                    "#,
                )
                .fetch_optional(&mut *self.conn)
                .await
            }
        }
        .context("Failed to read signing key")?;

        row.map(|row| self.row_to_record(row)).transpose()
    }

    /// Move the signing-default flag to `kid`
    ///
    /// Returns `false` when no key has that id, leaving the current default in place.
    pub async fn update_default_signing(&mut self, kid: &str) -> Result<bool> {
        let exists: Option<String> = sqlx::query_scalar(
            "UPDATE jwks SET signing_default = signing_default WHERE kid = ? RETURNING kid",
        )
        .bind(kid)
        .fetch_optional(&mut *self.conn)
        .await
        .context("Failed to look up JWK")?;

        if exists.is_none() {
            return Ok(false);
        }

        sqlx::query("UPDATE jwks SET signing_default = 0 WHERE signing_default = 1 AND kid != ?")
            .bind(kid)
            .execute(&mut *self.conn)
            .await
            .context("Failed to clear signing default")?;

        sqlx::query("UPDATE jwks SET signing_default = 1 WHERE kid = ?")
            .bind(kid)
            .execute(&mut *self.conn)
            .await
            .context("Failed to set signing default")?;

        Ok(true)
    }

    pub async fn count(&mut self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM jwks")
            .fetch_one(&mut *self.conn)
            .await
            .context("Failed to count JWKs")
    }

    fn row_to_record(&self, row: JwkRow) -> Result<JwkRecord> {
        let json = self
            .policy
            .open_jwk(&row.assets)
            .with_context(|| format!("Failed to open JWK {}", row.kid))?;
        let jwk: Jwk = serde_json::from_slice(&json)
            .with_context(|| format!("Stored JWK {} is not valid JSON", row.kid))?;

        Ok(JwkRecord {
            kid: row.kid,
            alg: row.alg,
            signing_default: row.signing_default,
            jwk,
            created_at: parse_db_timestamp(&row.created_at)?,
        })
    }
}
