//! Startup and maintenance tasks run outside the request pipeline

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::config::{AdminServiceAccountConfig, JwksConfig};
use crate::db::{setup, AtRestPolicy, DbPool, JwkRepository, ServiceAccountRepository};
use crate::models::{CreateServiceAccount, JwkRecord, SetupRecord};
use crate::services::keys;

/// Create or check the setup row
pub async fn check_setup(pool: &DbPool, policy: &AtRestPolicy) -> Result<SetupRecord> {
    let mut tx = pool.begin().await?;
    let record = setup::ensure_setup(&mut tx, policy).await?;
    tx.commit().await?;
    Ok(record)
}

/// Upsert the admin accounts declared in configuration
pub async fn ensure_admin_accounts(
    pool: &DbPool,
    admins: &[AdminServiceAccountConfig],
) -> Result<()> {
    let mut tx = pool.begin().await?;
    let mut repo = ServiceAccountRepository::new(&mut tx);
    for admin in admins {
        repo.create_admin(&CreateServiceAccount {
            uuid: admin.uuid,
            api_key: admin.api_key,
            aud: admin.aud,
            admin: true,
        })
        .await?;
        info!(sa_uuid = %admin.uuid, "Admin service account ready");
    }
    tx.commit().await?;
    Ok(())
}

async fn generate(alg: &str) -> Result<crate::models::Jwk> {
    let alg = alg.to_string();
    tokio::task::spawn_blocking(move || keys::generate_jwk(&alg))
        .await
        .context("Key generation task failed")?
}

/// Make sure a signing-default key exists
///
/// An empty set is seeded with `provision_algorithms` when auto-provisioning
/// is on; the first algorithm becomes the default. A non-empty set without a
/// default gets its newest key promoted.
pub async fn provision_keys(pool: &DbPool, policy: &AtRestPolicy, config: &JwksConfig) -> Result<()> {
    let mut generated = Vec::with_capacity(config.provision_algorithms.len());
    let empty = {
        let mut conn = pool.acquire().await?;
        JwkRepository::new(&mut conn, policy).count().await? == 0
    };

    if empty {
        if !config.auto_provision {
            warn!("JWK set is empty and auto-provisioning is disabled; signing will fail");
            return Ok(());
        }
        for alg in &config.provision_algorithms {
            generated.push(generate(alg).await?);
        }
    }

    let mut tx = pool.begin().await?;
    let mut repo = JwkRepository::new(&mut tx, policy);

    for jwk in &generated {
        repo.key_write(jwk).await?;
        info!(kid = %jwk.kid, alg = %jwk.alg, "Provisioned signing key");
    }
    if let Some(first) = generated.first() {
        repo.update_default_signing(&first.kid).await?;
    }

    if repo
        .read_signing_key(&Default::default())
        .await?
        .is_none()
    {
        let newest = repo.key_read_all().await?.into_iter().last();
        if let Some(newest) = newest {
            repo.update_default_signing(&newest.kid).await?;
            warn!(kid = %newest.kid, "No signing-default key; promoted the newest key");
        }
    }

    tx.commit().await?;
    Ok(())
}

/// Generate a key and make it the signing default
pub async fn rotate_key(pool: &DbPool, policy: &AtRestPolicy, alg: &str) -> Result<JwkRecord> {
    if !keys::is_supported_algorithm(alg) {
        bail!(
            "Unsupported algorithm {alg}; expected one of {}",
            keys::SUPPORTED_ALGORITHMS.join(", ")
        );
    }
    let jwk = generate(alg).await?;

    let mut tx = pool.begin().await?;
    let mut repo = JwkRepository::new(&mut tx, policy);
    repo.key_write(&jwk).await?;
    repo.update_default_signing(&jwk.kid).await?;
    let record = repo
        .key_read(&jwk.kid)
        .await?
        .context("Rotated key disappeared")?;
    tx.commit().await?;

    info!(kid = %record.kid, alg = %record.alg, "Rotated signing-default key");
    Ok(record)
}

/// Delete a key that is not the signing default
pub async fn delete_key(pool: &DbPool, policy: &AtRestPolicy, kid: &str) -> Result<()> {
    let mut tx = pool.begin().await?;
    let mut repo = JwkRepository::new(&mut tx, policy);

    let record = repo
        .key_read(kid)
        .await?
        .with_context(|| format!("No key with id {kid}"))?;
    if record.signing_default {
        bail!("Key {kid} is the signing default; rotate before deleting it");
    }
    repo.key_delete(kid).await?;
    tx.commit().await?;

    info!(kid = %kid, "Deleted signing key");
    Ok(())
}

pub async fn list_keys(pool: &DbPool, policy: &AtRestPolicy) -> Result<Vec<JwkRecord>> {
    let mut conn = pool.acquire().await?;
    JwkRepository::new(&mut conn, policy).key_read_all().await
}
