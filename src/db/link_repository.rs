//! Magic link repository

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use uuid::Uuid;

use super::{format_timestamp, parse_db_timestamp, AtRestPolicy};
use crate::models::{CreateMagicLink, RedeemedMagicLink};

#[derive(Debug, sqlx::FromRow)]
struct RedeemedRow {
    secret: String,
    sa_uuid: String,
    expires_at: String,
    claims: Vec<u8>,
    jwt_key_id: Option<String>,
    jwt_signing_method: Option<String>,
    redirect_url: String,
    redirect_query_key: String,
    visited_at: Option<String>,
    created_at: String,
}

/// Identifiers assigned when a link is stored
#[derive(Debug, Clone)]
pub struct CreatedLink {
    pub secret: Uuid,
    /// Key pinned for redemption; `None` when no key matched
    pub jwt_key_id: Option<String>,
}

pub struct LinkRepository<'a> {
    conn: &'a mut SqliteConnection,
    policy: &'a AtRestPolicy,
}

impl<'a> LinkRepository<'a> {
    pub fn new(conn: &'a mut SqliteConnection, policy: &'a AtRestPolicy) -> Self {
        Self { conn, policy }
    }

    /// Store a link with a fresh random secret, pinning its signing key
    ///
    /// The key is resolved inside the INSERT, so the statement is the
    /// transaction's first and only access to the database.
    pub async fn create(&mut self, args: &CreateMagicLink) -> Result<CreatedLink> {
        let secret = Uuid::new_v4();
        let claims = self.policy.seal_claims(&args.claims)?;

        let key_subquery = if args.jwt_alg.is_some() {
            "(SELECT kid FROM jwks WHERE alg = ? ORDER BY created_at DESC, kid DESC LIMIT 1)"
        } else {
            "(SELECT kid FROM jwks WHERE signing_default = 1 AND ? IS NULL)"
        };
        let sql = format!(
            r#"
            INSERT INTO magic_links (
                secret, sa_uuid, expires_at, claims, jwt_key_id, jwt_signing_method,
                redirect_url, redirect_query_key, visited_at, created_at
            )
            VALUES (?, ?, ?, ?, {key_subquery}, ?, ?, ?, NULL, ?)
            RETURNING jwt_key_id
            "#
        );

        let jwt_key_id: Option<String> = sqlx::query_scalar(&sql)
            .bind(secret.to_string())
            .bind(args.sa_uuid.to_string())
            .bind(format_timestamp(args.expires_at))
            .bind(claims)
            .bind(args.jwt_alg.as_deref())
            .bind(args.jwt_alg.as_deref())
            .bind(&args.redirect_url)
            .bind(&args.redirect_query_key)
            .bind(format_timestamp(Utc::now()))
            .fetch_one(&mut *self.conn)
            .await
            .context("Failed to create magic link")?;

        Ok(CreatedLink { secret, jwt_key_id })
    }

    /// Atomically consume a redeemable link
    ///
    /// A link is redeemable while unvisited and unexpired. The conditional
    /// UPDATE takes the database write lock, so of any number of concurrent
    /// callers exactly one gets the row back. Links that are not redeemable
    /// are left untouched and yield `None`.
    pub async fn read_and_expire(&mut self, secret: Uuid) -> Result<Option<RedeemedMagicLink>> {
        let now = format_timestamp(Utc::now());

        let row = sqlx::query_as::<_, RedeemedRow>(
            r#"
            UPDATE magic_links
            SET visited_at = ?
            WHERE secret = ? AND visited_at IS NULL AND expires_at > ?
            RETURNING secret, sa_uuid, expires_at, claims, jwt_key_id, jwt_signing_method,
                      redirect_url, redirect_query_key, visited_at, created_at
            "#,
        )
        .bind(&now)
        .bind(secret.to_string())
        .bind(&now)
        .fetch_optional(&mut *self.conn)
        .await
        .context("Failed to redeem magic link")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let claims = self
            .policy
            .open_claims(&row.claims)
            .context("Failed to open magic link claims")?;
        let visited_at = row
            .visited_at
            .as_deref()
            .context("Redeemed magic link has no visit time")?;

        Ok(Some(RedeemedMagicLink {
            secret: Uuid::parse_str(&row.secret).context("Invalid magic link secret")?,
            sa_uuid: Uuid::parse_str(&row.sa_uuid).context("Invalid magic link owner")?,
            expires_at: parse_db_timestamp(&row.expires_at)?,
            claims,
            jwt_key_id: row.jwt_key_id,
            jwt_signing_method: row.jwt_signing_method,
            redirect_url: row.redirect_url,
            redirect_query_key: row.redirect_query_key,
            visited_at: parse_db_timestamp(visited_at)?,
            created_at: parse_db_timestamp(&row.created_at)?,
        }))
    }

    /// Remove links that expired before `before`
    pub async fn delete_expired(&mut self, before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM magic_links WHERE expires_at < ?")
            .bind(format_timestamp(before))
            .execute(&mut *self.conn)
            .await
            .context("Failed to delete expired magic links")?;

        Ok(result.rows_affected())
    }
}
