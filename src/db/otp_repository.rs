//! One-time password repository

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use uuid::Uuid;

use super::format_timestamp;
use crate::models::CreateOtp;

pub struct OtpRepository<'a> {
    conn: &'a mut SqliteConnection,
}

impl<'a> OtpRepository<'a> {
    pub fn new(conn: &'a mut SqliteConnection) -> Self {
        Self { conn }
    }

    pub async fn create(&mut self, args: &CreateOtp) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO otps (id, sa_uuid, expires_at, code, used_at, created_at)
            VALUES (?, ?, ?, ?, NULL, ?)
            "#,
        )
        .bind(args.id.to_string())
        .bind(args.sa_uuid.to_string())
        .bind(format_timestamp(args.expires_at))
        .bind(&args.code)
        .bind(format_timestamp(Utc::now()))
        .execute(&mut *self.conn)
        .await
        .context("Failed to create OTP")?;

        Ok(())
    }

    /// Consume the caller's OTP and check the code
    ///
    /// Any attempt by the owning account on a live OTP marks it used, whether
    /// or not the code matches. Returns `true` only for a matching code; an
    /// OTP that is absent, expired, already used or owned by another account
    /// is left untouched and yields `false`.
    pub async fn validate(&mut self, id: Uuid, sa_uuid: Uuid, code: &str) -> Result<bool> {
        let now = format_timestamp(Utc::now());

        let stored: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE otps
            SET used_at = ?
            WHERE id = ? AND sa_uuid = ? AND used_at IS NULL AND expires_at > ?
            RETURNING code
            "#,
        )
        .bind(&now)
        .bind(id.to_string())
        .bind(sa_uuid.to_string())
        .bind(&now)
        .fetch_optional(&mut *self.conn)
        .await
        .context("Failed to validate OTP")?;

        Ok(stored.is_some_and(|stored| stored == code))
    }

    /// Remove OTPs that expired before `before`
    pub async fn delete_expired(&mut self, before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM otps WHERE expires_at < ?")
            .bind(format_timestamp(before))
            .execute(&mut *self.conn)
            .await
            .context("Failed to delete expired OTPs")?;

        Ok(result.rows_affected())
    }
}
