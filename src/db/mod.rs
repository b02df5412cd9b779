//! Database layer
//!
//! This module handles persistence of:
//! - Service accounts
//! - Signing keys (sealed at rest unless configured otherwise)
//! - Magic links and one-time passwords
//! - The setup singleton checked at startup
//!
//! Repositories borrow a `&mut SqliteConnection`, which is either the
//! request transaction or a connection checked out of the pool.

pub mod jwk_repository;
pub mod link_repository;
pub mod otp_repository;
pub mod service_account_repository;
pub mod setup;

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};

use crate::config::DatabaseConfig;
use crate::services::crypto::{AtRestCipher, CryptoError};

pub use jwk_repository::JwkRepository;
pub use link_repository::LinkRepository;
pub use otp_repository::OtpRepository;
pub use service_account_repository::ServiceAccountRepository;

/// Database connection pool type
pub type DbPool = Pool<Sqlite>;

/// Initialize the database connection pool and run migrations
pub async fn init_pool(config: &DatabaseConfig) -> Result<DbPool> {
    let options = SqliteConnectOptions::from_str(&config.url)
        .with_context(|| format!("Invalid database URL: {}", config.url))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(config.busy_timeout_secs));

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .connect_with(options)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    Ok(pool)
}

/// Ping the database
pub async fn check_health(pool: &DbPool) -> bool {
    sqlx::query("SELECT 1").execute(pool).await.is_ok()
}

/// Fixed-width RFC 3339 so that SQL string comparison orders timestamps
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_db_timestamp(ts: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(ts) {
        return Ok(dt.with_timezone(&Utc));
    }
    let dt = chrono::NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S")
        .with_context(|| format!("Invalid timestamp in database: {ts}"))?;
    Ok(DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc))
}

/// Which blob kinds are sealed, and the cipher that seals them
#[derive(Debug, Clone)]
pub struct AtRestPolicy {
    cipher: Option<AtRestCipher>,
    plaintext_claims: bool,
    plaintext_jwk: bool,
}

impl AtRestPolicy {
    pub fn new(cipher: Option<AtRestCipher>, plaintext_claims: bool, plaintext_jwk: bool) -> Self {
        Self {
            cipher,
            plaintext_claims,
            plaintext_jwk,
        }
    }

    pub fn from_config(config: &DatabaseConfig) -> Result<Self> {
        let cipher = match config.encryption_key_bytes()? {
            Some(key) => Some(AtRestCipher::new(&key)?),
            None if config.encryption_required() => {
                anyhow::bail!("An encryption key is required unless both plaintext flags are set")
            }
            None => None,
        };

        Ok(Self::new(cipher, config.plaintext_claims, config.plaintext_jwk))
    }

    pub fn plaintext_claims(&self) -> bool {
        self.plaintext_claims
    }

    pub fn plaintext_jwk(&self) -> bool {
        self.plaintext_jwk
    }

    pub fn seal_claims(&self, claims: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.seal(claims, self.plaintext_claims)
    }

    pub fn open_claims(&self, stored: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.open(stored, self.plaintext_claims)
    }

    pub fn seal_jwk(&self, jwk: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.seal(jwk, self.plaintext_jwk)
    }

    pub fn open_jwk(&self, stored: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.open(stored, self.plaintext_jwk)
    }

    fn seal(&self, data: &[u8], plaintext: bool) -> Result<Vec<u8>, CryptoError> {
        if plaintext {
            return Ok(data.to_vec());
        }
        self.cipher
            .as_ref()
            .ok_or(CryptoError::MissingKey)?
            .seal(data)
    }

    fn open(&self, stored: &[u8], plaintext: bool) -> Result<Vec<u8>, CryptoError> {
        if plaintext {
            return Ok(stored.to_vec());
        }
        self.cipher
            .as_ref()
            .ok_or(CryptoError::MissingKey)?
            .open(stored)
    }
}
