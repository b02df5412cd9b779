//! Setup singleton and database version compatibility

use anyhow::{bail, Context, Result};
use sqlx::SqliteConnection;
use tracing::info;

use super::AtRestPolicy;
use crate::models::SetupRecord;

/// Schema version this binary expects
pub const DATABASE_SEMVER: &str = "1.0.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Version {
    major: u64,
    minor: u64,
    patch: u64,
}

fn parse_version(raw: &str) -> Result<Version> {
    let core = raw
        .trim()
        .trim_start_matches('v')
        .split(['-', '+'])
        .next()
        .unwrap_or_default();

    let mut parts = core.split('.');
    let mut next = |name: &str| -> Result<u64> {
        parts
            .next()
            .with_context(|| format!("Version {raw:?} is missing the {name} component"))?
            .parse::<u64>()
            .with_context(|| format!("Version {raw:?} has a non-numeric {name} component"))
    };

    let version = Version {
        major: next("major")?,
        minor: next("minor")?,
        patch: next("patch")?,
    };

    if parts.next().is_some() {
        bail!("Version {raw:?} has too many components");
    }
    Ok(version)
}

/// Whether a database at `database` may be served by a binary expecting `binary`
///
/// Pre-1.0 versions must match exactly. Otherwise the majors must match and the
/// database may be ahead in minor version, never behind.
pub fn semver_compatible(database: &str, binary: &str) -> Result<bool> {
    let db = parse_version(database)?;
    let bin = parse_version(binary)?;

    if bin.major == 0 || db.major == 0 {
        return Ok(db == bin);
    }
    Ok(db.major == bin.major && db.minor >= bin.minor)
}

pub async fn read_setup(conn: &mut SqliteConnection) -> Result<Option<SetupRecord>> {
    let raw: Option<String> = sqlx::query_scalar("SELECT setup FROM setup WHERE id = 1")
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to read setup row")?;

    raw.map(|json| serde_json::from_str(&json).context("Setup row is not valid JSON"))
        .transpose()
}

async fn write_setup(conn: &mut SqliteConnection, setup: &SetupRecord) -> Result<()> {
    let json = serde_json::to_string(setup)?;
    sqlx::query("INSERT INTO setup (id, setup) VALUES (1, ?)")
        .bind(json)
        .execute(&mut *conn)
        .await
        .context("Failed to write setup row")?;
    Ok(())
}

/// Initialize the setup row on first start, then require it to match the
/// running configuration
pub async fn ensure_setup(conn: &mut SqliteConnection, policy: &AtRestPolicy) -> Result<SetupRecord> {
    let expected = SetupRecord {
        plaintext_claims: policy.plaintext_claims(),
        plaintext_jwk: policy.plaintext_jwk(),
        semver: DATABASE_SEMVER.to_string(),
    };

    let setup = match read_setup(conn).await? {
        Some(setup) => setup,
        None => {
            write_setup(conn, &expected).await?;
            info!(semver = DATABASE_SEMVER, "Initialized database setup row");
            expected.clone()
        }
    };

    check_setup(&setup, &expected)?;
    Ok(setup)
}

fn check_setup(stored: &SetupRecord, expected: &SetupRecord) -> Result<()> {
    if stored.plaintext_claims != expected.plaintext_claims {
        bail!(
            "Database was initialized with plaintext_claims = {}, configuration says {}",
            stored.plaintext_claims,
            expected.plaintext_claims
        );
    }
    if stored.plaintext_jwk != expected.plaintext_jwk {
        bail!(
            "Database was initialized with plaintext_jwk = {}, configuration says {}",
            stored.plaintext_jwk,
            expected.plaintext_jwk
        );
    }
    if !semver_compatible(&stored.semver, &expected.semver)? {
        bail!(
            "Database version {} is not compatible with required version {}; run migrations",
            stored.semver,
            expected.semver
        );
    }
    Ok(())
}
