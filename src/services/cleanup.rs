//! Periodic purge of expired magic links and OTPs

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::CleanupConfig;
use crate::db::{AtRestPolicy, DbPool, LinkRepository, OtpRepository};

/// Counts of rows removed by one pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupStats {
    pub links: u64,
    pub otps: u64,
}

/// Delete links and OTPs that expired more than `retention` ago
pub async fn purge_expired(
    pool: &DbPool,
    policy: &AtRestPolicy,
    retention: Duration,
) -> Result<CleanupStats> {
    let retention = chrono::Duration::from_std(retention).context("Retention out of range")?;
    let before = Utc::now() - retention;

    let mut tx = pool.begin().await.context("Failed to begin cleanup")?;
    let links = LinkRepository::new(&mut *tx, policy)
        .delete_expired(before)
        .await?;
    let otps = OtpRepository::new(&mut *tx).delete_expired(before).await?;
    tx.commit().await.context("Failed to commit cleanup")?;

    Ok(CleanupStats { links, otps })
}

/// Spawn the background cleanup loop
pub fn spawn_expired_cleanup(
    pool: DbPool,
    policy: AtRestPolicy,
    config: CleanupConfig,
) -> Option<JoinHandle<()>> {
    if !config.enabled {
        return None;
    }

    let period = Duration::from_secs(config.interval_secs.max(1));
    let retention = Duration::from_secs(config.retention_secs);

    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            match purge_expired(&pool, &policy, retention).await {
                Ok(stats) if stats.links + stats.otps > 0 => {
                    info!(links = stats.links, otps = stats.otps, "Purged expired records");
                }
                Ok(_) => debug!("No expired records to purge"),
                Err(e) => error!(error = %format!("{e:#}"), "Expired record cleanup failed"),
            }
        }
    }))
}
