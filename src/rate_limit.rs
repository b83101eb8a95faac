//! Fixed-window attempt limiting behind an injectable store.
//!
//! [`MemoryRateLimitStore`] suits a single process. Horizontally scaled
//! deployments implement [`RateLimitStore`] over a shared cache instead.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::Error;

/// Attempts allowed per window.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub limit: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    /// 5 attempts per 15 minutes.
    fn default() -> Self {
        Self {
            limit: 5,
            window: Duration::from_secs(15 * 60),
        }
    }
}

/// One identifier's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRecord {
    pub count: u32,
    pub reset_at: Instant,
}

/// Result of [`RateLimitStore::hit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    pub record: RateLimitRecord,
    pub counted: bool,
}

/// Storage for rate-limit windows.
pub trait RateLimitStore: Send + Sync + 'static {
    /// Counts an attempt for `key` in one atomic step.
    ///
    /// Starts a new window with `count = 1` when none exists or the old one
    /// ended before `now`. A full window is left unchanged and reported with
    /// `counted == false`.
    fn hit(
        &self,
        key: &str,
        config: RateLimitConfig,
        now: Instant,
    ) -> impl Future<Output = Result<Hit, Error>> + Send;

    fn get(&self, key: &str) -> impl Future<Output = Result<Option<RateLimitRecord>, Error>> + Send;

    fn remove(&self, key: &str) -> impl Future<Output = Result<(), Error>> + Send;

    /// Drops windows that ended before `now`. Returns how many were removed.
    fn purge_expired(&self, now: Instant) -> impl Future<Output = Result<usize, Error>> + Send;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryRateLimitStore {
    records: Mutex<HashMap<String, RateLimitRecord>>,
}

impl MemoryRateLimitStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, RateLimitRecord>> {
        // A panic mid-update leaves at worst one stale counter.
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl RateLimitStore for MemoryRateLimitStore {
    async fn hit(
        &self,
        key: &str,
        config: RateLimitConfig,
        now: Instant,
    ) -> Result<Hit, Error> {
        let fresh = RateLimitRecord {
            count: 1,
            reset_at: now + config.window,
        };
        let mut records = self.lock();
        let Some(record) = records.get_mut(key) else {
            records.insert(key.to_string(), fresh);
            return Ok(Hit {
                record: fresh,
                counted: true,
            });
        };

        let counted = if now > record.reset_at {
            *record = fresh;
            true
        } else if record.count < config.limit {
            record.count += 1;
            true
        } else {
            false
        };
        Ok(Hit {
            record: *record,
            counted,
        })
    }

    async fn get(&self, key: &str) -> Result<Option<RateLimitRecord>, Error> {
        Ok(self.lock().get(key).copied())
    }

    async fn remove(&self, key: &str) -> Result<(), Error> {
        self.lock().remove(key);
        Ok(())
    }

    async fn purge_expired(&self, now: Instant) -> Result<usize, Error> {
        let mut records = self.lock();
        let before = records.len();
        records.retain(|_, r| now <= r.reset_at);
        Ok(before - records.len())
    }
}

/// Outcome of [`RateLimiter::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

impl RateLimitDecision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Limits attempts per identifier (e.g. `login:{ip}`).
#[derive(Debug)]
pub struct RateLimiter<S> {
    store: S,
    config: RateLimitConfig,
}

impl<S: RateLimitStore> RateLimiter<S> {
    #[must_use]
    pub fn new(store: S, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    #[must_use]
    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Records an attempt; `Limited` once the window already holds `limit` attempts.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn check(&self, key: &str) -> Result<RateLimitDecision, Error> {
        self.check_with(key, self.config).await
    }

    /// [`check`](Self::check) under a different limit, sharing the store.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn check_with(
        &self,
        key: &str,
        config: RateLimitConfig,
    ) -> Result<RateLimitDecision, Error> {
        let now = Instant::now();
        let Hit { record, counted } = self.store.hit(key, config, now).await?;

        if !counted {
            let retry_after = record.reset_at.saturating_duration_since(now);
            tracing::warn!(key, ?retry_after, "Rate limit exceeded");
            return Ok(RateLimitDecision::Limited { retry_after });
        }
        Ok(RateLimitDecision::Allowed {
            remaining: config.limit.saturating_sub(record.count),
        })
    }

    /// Attempts left in the current window.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn remaining(&self, key: &str) -> Result<u32, Error> {
        let now = Instant::now();
        Ok(match self.store.get(key).await? {
            Some(r) if now <= r.reset_at => self.config.limit.saturating_sub(r.count),
            _ => self.config.limit,
        })
    }

    /// Time until the current window ends, if one is open.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn reset_after(&self, key: &str) -> Result<Option<Duration>, Error> {
        let now = Instant::now();
        Ok(self
            .store
            .get(key)
            .await?
            .filter(|r| now <= r.reset_at)
            .map(|r| r.reset_at - now))
    }

    /// Forgets `key`, e.g. after a successful login.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn clear(&self, key: &str) -> Result<(), Error> {
        self.store.remove(key).await
    }

    /// Drops ended windows. Call periodically.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn cleanup_expired(&self) -> Result<usize, Error> {
        let removed = self.store.purge_expired(Instant::now()).await?;
        if removed > 0 {
            tracing::debug!(removed, "Purged expired rate-limit windows");
        }
        Ok(removed)
    }
}
