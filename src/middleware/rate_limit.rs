//! Rate limiting middleware
//!
//! Each authenticated service account gets its own token bucket. A request
//! that finds the bucket empty waits for a token until the request deadline
//! and only then fails with 429.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::{collections::HashMap, num::NonZeroU32, sync::Arc, time::Duration};
use tokio::{sync::RwLock, task::JoinHandle, time::Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::RateLimitConfig;
use crate::middleware::request_context::RequestDeadline;
use crate::models::ServiceAccount;
use crate::utils::{AppError, AppResult};
use crate::AppState;

/// Per-account rate limiter using governor
pub type AccountRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Map of service account UUIDs to their token buckets
#[derive(Clone)]
pub struct RateLimitState {
    limiters: Arc<RwLock<HashMap<Uuid, Arc<AccountRateLimiter>>>>,
    /// `None` disables limiting
    quota: Option<Quota>,
    max_tracked: usize,
}

/// Quota refilling `refill_per_second` tokens with room for `burst`
fn quota_from_config(config: &RateLimitConfig) -> Option<Quota> {
    let refill = config.refill_per_second?;
    let period = Duration::try_from_secs_f64(1.0 / refill).ok()?;
    let burst = NonZeroU32::new(config.burst).unwrap_or(NonZeroU32::MIN);
    Quota::with_period(period).map(|quota| quota.allow_burst(burst))
}

impl RateLimitState {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            limiters: Arc::new(RwLock::new(HashMap::new())),
            quota: quota_from_config(config),
            max_tracked: config.max_tracked.max(1),
        }
    }

    pub fn enabled(&self) -> bool {
        self.quota.is_some()
    }

    /// Get or create the limiter for `key`
    async fn get_limiter(&self, key: Uuid) -> Option<Arc<AccountRateLimiter>> {
        let quota = self.quota?;

        {
            let limiters = self.limiters.read().await;
            if let Some(limiter) = limiters.get(&key) {
                return Some(limiter.clone());
            }
        }

        let mut limiters = self.limiters.write().await;

        // Double-check after acquiring write lock
        if let Some(limiter) = limiters.get(&key) {
            return Some(limiter.clone());
        }

        let limiter = Arc::new(RateLimiter::direct(quota));
        limiters.insert(key, limiter.clone());
        Some(limiter)
    }

    /// Take a token for `key`, waiting until `deadline` at most
    pub async fn acquire(&self, key: Uuid, deadline: Option<Instant>) -> AppResult<()> {
        let Some(limiter) = self.get_limiter(key).await else {
            return Ok(());
        };

        if limiter.check().is_ok() {
            return Ok(());
        }

        let Some(deadline) = deadline else {
            warn!(sa_uuid = %key, "Rate limit exceeded");
            return Err(AppError::RateLimited);
        };

        debug!(sa_uuid = %key, "Rate limit bucket empty, waiting for a token");
        tokio::time::timeout_at(deadline, limiter.until_ready())
            .await
            .map_err(|_| {
                warn!(sa_uuid = %key, "Rate limit exceeded");
                AppError::RateLimited
            })
    }

    pub async fn tracked(&self) -> usize {
        self.limiters.read().await.len()
    }

    /// Evict buckets once more than `max_tracked` accounts are tracked
    ///
    /// Governor limiters carry no idle time, so half of the map is dropped.
    pub async fn cleanup(&self) {
        let mut limiters = self.limiters.write().await;
        let initial_count = limiters.len();

        if initial_count > self.max_tracked {
            let to_remove: Vec<_> = limiters
                .keys()
                .take(initial_count / 2)
                .cloned()
                .collect();

            for key in to_remove {
                limiters.remove(&key);
            }

            debug!(
                "Rate limiter cleanup: {} -> {} entries",
                initial_count,
                limiters.len()
            );
        }
    }
}

/// Rate limit the authenticated service account
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if state.rate_limit.enabled() {
        let account = request
            .extensions()
            .get::<ServiceAccount>()
            .map(|account| account.uuid)
            .ok_or_else(|| AppError::Unauthorized("Missing X-API-KEY header".to_string()))?;
        let deadline = request.extensions().get::<RequestDeadline>().map(|d| d.0);

        state.rate_limit.acquire(account, deadline).await?;
    }

    Ok(next.run(request).await)
}

/// Spawn a background task to periodically clean up rate limiters
pub fn spawn_rate_limit_cleanup(state: RateLimitState, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period.max(Duration::from_secs(1)));
        loop {
            interval.tick().await;
            state.cleanup().await;
        }
    })
}
