//! Per-user monthly usage accounting.
//!
//! [`UsageTracker`] counts accepted jobs per `(owner, billing period)`.
//! The durable store is the source of truth and its increment is a single
//! atomic upsert — never read-modify-write — so concurrent completions for
//! the same owner cannot lose updates. A TTL cache fronts the read path;
//! it is strictly best-effort: cache failures are logged and swallowed,
//! and reads degrade transparently to the durable store.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};

/// A UTC-aligned calendar month, canonically the first day of the month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BillingPeriod(NaiveDate);

impl BillingPeriod {
    /// The period containing the current UTC instant.
    pub fn current() -> Self {
        Self::for_date(Utc::now().date_naive())
    }

    /// The period containing the given date.
    pub fn for_date(date: NaiveDate) -> Self {
        let first = NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
            .expect("first of month is a valid date");
        Self(first)
    }

    pub fn start(&self) -> NaiveDate {
        self.0
    }
}

impl std::fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m"))
    }
}

/// Usage count for one owner in one period, with quota context when the
/// caller resolved a limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub owner: String,
    pub period: BillingPeriod,
    pub count: u64,
    /// Monthly quota, resolved by the caller from its entitlement source.
    pub limit: Option<u64>,
    /// `limit - count`, floored at zero. `None` for unlimited tiers.
    pub remaining: Option<u64>,
}

/// Durable usage counters.
///
/// `increment` must be an atomic upsert in a single round trip: insert
/// with count 1 if the key is absent, otherwise add 1 — with no window in
/// which another writer could observe or overwrite an intermediate value.
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Atomically increment and return the new count.
    async fn increment(&self, owner: &str, period: BillingPeriod) -> Result<u64>;

    /// Current count, zero if no record exists.
    async fn fetch(&self, owner: &str, period: BillingPeriod) -> Result<u64>;
}

/// Cache for usage counts. Failures here must never affect correctness —
/// the tracker treats every error as a miss.
#[async_trait]
pub trait UsageCache: Send + Sync {
    async fn get(&self, owner: &str, period: BillingPeriod) -> Result<Option<u64>>;
    async fn put(&self, owner: &str, period: BillingPeriod, count: u64) -> Result<()>;
}

/// In-memory [`UsageStore`]. One mutex guards the map, so the upsert is a
/// single atomic operation exactly like `INSERT .. ON CONFLICT .. DO
/// UPDATE` against a relational store.
#[derive(Default)]
pub struct MemoryUsageStore {
    counts: Mutex<HashMap<(String, BillingPeriod), u64>>,
}

impl MemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UsageStore for MemoryUsageStore {
    async fn increment(&self, owner: &str, period: BillingPeriod) -> Result<u64> {
        let mut counts = self.counts.lock();
        let count = counts.entry((owner.to_string(), period)).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn fetch(&self, owner: &str, period: BillingPeriod) -> Result<u64> {
        Ok(self
            .counts
            .lock()
            .get(&(owner.to_string(), period))
            .copied()
            .unwrap_or(0))
    }
}

struct CachedCount {
    count: u64,
    expires_at: Instant,
}

/// In-memory TTL [`UsageCache`].
pub struct MemoryUsageCache {
    entries: RwLock<HashMap<(String, BillingPeriod), CachedCount>>,
    ttl: Duration,
}

impl MemoryUsageCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }
}

#[async_trait]
impl UsageCache for MemoryUsageCache {
    async fn get(&self, owner: &str, period: BillingPeriod) -> Result<Option<u64>> {
        let entries = self.entries.read();
        Ok(entries.get(&(owner.to_string(), period)).and_then(|e| {
            if Instant::now() >= e.expires_at {
                None
            } else {
                Some(e.count)
            }
        }))
    }

    async fn put(&self, owner: &str, period: BillingPeriod, count: u64) -> Result<()> {
        self.entries.write().insert(
            (owner.to_string(), period),
            CachedCount {
                count,
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(())
    }
}

/// Monthly usage counter with a cache-assisted read path.
pub struct UsageTracker {
    store: Arc<dyn UsageStore>,
    cache: Arc<dyn UsageCache>,
}

impl UsageTracker {
    pub fn new(store: Arc<dyn UsageStore>, cache: Arc<dyn UsageCache>) -> Self {
        Self { store, cache }
    }

    /// In-memory tracker with the given cache TTL. Convenient for tests
    /// and single-process deployments.
    pub fn in_memory(cache_ttl: Duration) -> Self {
        Self::new(
            Arc::new(MemoryUsageStore::new()),
            Arc::new(MemoryUsageCache::new(cache_ttl)),
        )
    }

    /// Count one accepted job for the owner's current period.
    ///
    /// The durable increment happens first; only then is the cache
    /// refreshed, best-effort. A durable failure is returned to the caller
    /// (who decides whether to proceed — the pipeline does); a cache
    /// failure is logged and ignored.
    pub async fn increment(&self, owner: &str) -> Result<u64> {
        let period = BillingPeriod::current();
        let count = self.store.increment(owner, period).await?;

        if let Err(e) = self.cache.put(owner, period, count).await {
            warn!(owner, %period, error = %e, "usage cache write failed, continuing");
        }
        Ok(count)
    }

    /// Current usage for the owner's current period.
    ///
    /// Reads the cache first; a miss or a cache failure falls back to the
    /// durable store and repopulates the cache. Cache trouble never
    /// surfaces as an error.
    pub async fn get(&self, owner: &str) -> Result<UsageSnapshot> {
        self.get_with_limit(owner, None).await
    }

    /// Like [`get`](Self::get), with quota context from a caller-resolved
    /// monthly limit.
    pub async fn get_with_limit(&self, owner: &str, limit: Option<u64>) -> Result<UsageSnapshot> {
        let period = BillingPeriod::current();

        let cached = match self.cache.get(owner, period).await {
            Ok(hit) => hit,
            Err(e) => {
                debug!(owner, %period, error = %e, "usage cache read failed, using durable store");
                None
            }
        };

        let count = match cached {
            Some(count) => count,
            None => {
                let count = self.store.fetch(owner, period).await?;
                if let Err(e) = self.cache.put(owner, period, count).await {
                    debug!(owner, %period, error = %e, "usage cache repopulation failed");
                }
                count
            }
        };

        Ok(UsageSnapshot {
            owner: owner.to_string(),
            period,
            count,
            limit,
            remaining: limit.map(|l| l.saturating_sub(count)),
        })
    }
}
