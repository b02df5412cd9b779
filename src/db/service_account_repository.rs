//! Service account repository

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqliteConnection;
use uuid::Uuid;

use super::{format_timestamp, parse_db_timestamp};
use crate::models::{CreateServiceAccount, ServiceAccount, ServiceAccountRecord};

#[derive(Debug, sqlx::FromRow)]
struct ServiceAccountRow {
    uuid: String,
    api_key: String,
    aud: String,
    admin: bool,
    created_at: String,
}

impl TryFrom<ServiceAccountRow> for ServiceAccountRecord {
    type Error = anyhow::Error;

    fn try_from(row: ServiceAccountRow) -> Result<Self> {
        Ok(ServiceAccountRecord {
            account: ServiceAccount {
                uuid: Uuid::parse_str(&row.uuid).context("Invalid service account uuid")?,
                api_key: Uuid::parse_str(&row.api_key).context("Invalid service account api key")?,
                aud: Uuid::parse_str(&row.aud).context("Invalid service account aud")?,
                admin: row.admin,
            },
            created_at: parse_db_timestamp(&row.created_at)?,
        })
    }
}

pub struct ServiceAccountRepository<'a> {
    conn: &'a mut SqliteConnection,
}

impl<'a> ServiceAccountRepository<'a> {
    pub fn new(conn: &'a mut SqliteConnection) -> Self {
        Self { conn }
    }

    /// Insert or refresh an admin account declared in configuration
    pub async fn create_admin(&mut self, args: &CreateServiceAccount) -> Result<ServiceAccount> {
        sqlx::query(
            r#"
            INSERT INTO service_accounts (uuid, api_key, aud, admin, created_at)
            VALUES (?, ?, ?, 1, ?)
            ON CONFLICT (uuid) DO UPDATE SET
                api_key = excluded.api_key,
                aud = excluded.aud,
                admin = 1
            "#,
        )
        .bind(args.uuid.to_string())
        .bind(args.api_key.to_string())
        .bind(args.aud.to_string())
        .bind(format_timestamp(Utc::now()))
        .execute(&mut *self.conn)
        .await
        .context("Failed to create admin service account")?;

        Ok(ServiceAccount {
            uuid: args.uuid,
            api_key: args.api_key,
            aud: args.aud,
            admin: true,
        })
    }

    pub async fn create(&mut self, args: &CreateServiceAccount) -> Result<ServiceAccount> {
        sqlx::query(
            r#"
            INSERT INTO service_accounts (uuid, api_key, aud, admin, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(args.uuid.to_string())
        .bind(args.api_key.to_string())
        .bind(args.aud.to_string())
        .bind(args.admin)
        .bind(format_timestamp(Utc::now()))
        .execute(&mut *self.conn)
        .await
        .context("Failed to create service account")?;

        Ok(ServiceAccount {
            uuid: args.uuid,
            api_key: args.api_key,
            aud: args.aud,
            admin: args.admin,
        })
    }

    pub async fn read_by_uuid(&mut self, uuid: Uuid) -> Result<Option<ServiceAccountRecord>> {
        let row = sqlx::query_as::<_, ServiceAccountRow>(
            r#"
            SELECT uuid, api_key, aud, admin, created_at
            FROM service_accounts
            WHERE uuid = ?
            "#,
        )
        .bind(uuid.to_string())
        .fetch_optional(&mut *self.conn)
        .await
        .context("Failed to read service account")?;

        row.map(ServiceAccountRecord::try_from).transpose()
    }

    pub async fn read_by_api_key(&mut self, api_key: Uuid) -> Result<Option<ServiceAccountRecord>> {
        let row = sqlx::query_as::<_, ServiceAccountRow>(
            r#"
            SELECT uuid, api_key, aud, admin, created_at
            FROM service_accounts
            WHERE api_key = ?
            "#,
        )
        .bind(api_key.to_string())
        .fetch_optional(&mut *self.conn)
        .await
        .context("Failed to read service account by api key")?;

        row.map(ServiceAccountRecord::try_from).transpose()
    }
}
