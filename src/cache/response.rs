//! Response cache for generated recipe text.
//!
//! [`ResponseCache`] maps a request [`Fingerprint`] to the [`Completion`]
//! a provider produced for it. It sits in
//! [`ProviderRouter`](crate::gateway::ProviderRouter) between the rate
//! limiter and the provider fallback chain; a hit bypasses retry logic,
//! provider selection, and provider metrics entirely.
//!
//! # Expiry and capacity
//!
//! Every entry carries its own TTL, fixed at `store` time. Capacity is
//! measured in bytes using each entry's `size_hint` (key + text + provider
//! name), and eviction is least-recently-used. Both are enforced by moka;
//! the cache additionally re-checks `expires_at` on every read so an expired
//! entry is never handed out, even before moka's housekeeping has run.
//!
//! # Future extensibility: shared caching
//!
//! The store is in-memory and owned per router instance. A redis-backed
//! variant for several bot shards would sit behind a small async trait with
//! `lookup`/`store`; the fingerprint is already backend-agnostic.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use moka::Expiry;
use moka::future::Cache;
use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use serde::Serialize;
use tracing::debug;

use super::key::Fingerprint;
use crate::telemetry;
use crate::types::Completion;
use crate::{GenieError, Result};

/// Fixed per-entry bookkeeping overhead added to every `size_hint`.
const ENTRY_OVERHEAD: u32 = 64;

/// Longest time-to-live an entry can get. Longer TTLs passed to
/// [`ResponseCache::store`] are clamped to it; configs asking for more are
/// rejected.
pub const MAX_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Longest interval accepted for a background sweeper.
pub const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Configuration for the response cache.
///
/// ```rust
/// # use genie::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .max_bytes(4 * 1024 * 1024)
///     .ttl(Duration::from_secs(3600));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Total byte budget across all entries. Default: 16 MiB.
    pub max_bytes: u64,
    /// Default time-to-live for stored responses. Default: 1 hour.
    pub ttl: Duration,
    /// How often the router's sweeper purges expired entries. Default: 5 minutes.
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: 16 * 1024 * 1024,
            ttl: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(300),
        }
    }
}

impl CacheConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the total byte budget.
    pub fn max_bytes(mut self, n: u64) -> Self {
        self.max_bytes = n;
        self
    }

    /// Set the default time-to-live.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the expiry sweep interval.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Reject configurations that cannot hold anything, or whose durations
    /// are out of range.
    pub fn validate(&self) -> Result<()> {
        if self.max_bytes == 0 {
            return Err(GenieError::Config("cache max_bytes must be positive".into()));
        }
        if self.ttl.is_zero() {
            return Err(GenieError::Config("cache ttl must be positive".into()));
        }
        if self.ttl > MAX_TTL {
            return Err(GenieError::Config(format!(
                "cache ttl must not exceed {}s",
                MAX_TTL.as_secs()
            )));
        }
        validate_sweep_interval("cache", self.sweep_interval)
    }
}

/// Check a background sweep interval: positive and at most [`MAX_SWEEP_INTERVAL`].
pub(crate) fn validate_sweep_interval(what: &str, interval: Duration) -> Result<()> {
    if interval.is_zero() {
        return Err(GenieError::Config(format!(
            "{what} sweep interval must be positive"
        )));
    }
    if interval > MAX_SWEEP_INTERVAL {
        return Err(GenieError::Config(format!(
            "{what} sweep interval must not exceed {}s",
            MAX_SWEEP_INTERVAL.as_secs()
        )));
    }
    Ok(())
}

/// A stored response plus its lifetime bookkeeping.
#[derive(Debug, Clone)]
struct CacheEntry {
    completion: Completion,
    created_at: Instant,
    expires_at: Instant,
    size_hint: u32,
}

impl CacheEntry {
    fn ttl(&self) -> Duration {
        self.expires_at.saturating_duration_since(self.created_at)
    }
}

/// Expiry policy reading each entry's own TTL.
struct EntryTtl;

impl Expiry<String, CacheEntry> for EntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl())
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl())
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl Counters {
    fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.expirations.store(0, Ordering::Relaxed);
    }
}

/// Read-only cache statistics for the admin surface.
///
/// Counters only grow within a process lifetime, except across
/// [`ResponseCache::clear`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries removed to make room (capacity pressure).
    pub evictions: u64,
    /// Entries removed because their TTL elapsed.
    pub expirations: u64,
    pub entries: u64,
    /// Sum of live entries' `size_hint`, in bytes.
    pub weighted_size: u64,
    pub max_bytes: u64,
}

impl CacheStats {
    /// Percentage of lookups that hit, 0.0 when nothing was looked up.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64 * 100.0
        }
    }
}

/// In-memory LRU + TTL cache of generated responses.
///
/// Cheap to share behind an `Arc`; all methods take `&self`. Lookups never
/// touch the network and never wait on in-flight provider calls.
pub struct ResponseCache {
    entries: Cache<String, CacheEntry>,
    counters: Arc<Counters>,
    config: CacheConfig,
}

impl ResponseCache {
    /// Create a new response cache with the given configuration.
    pub fn new(config: &CacheConfig) -> Self {
        let counters = Arc::new(Counters::default());
        let listener_counters = Arc::clone(&counters);
        let entries = Cache::builder()
            .max_capacity(config.max_bytes)
            .weigher(|_key: &String, entry: &CacheEntry| entry.size_hint)
            .eviction_policy(EvictionPolicy::lru())
            .expire_after(EntryTtl)
            .eviction_listener(move |_key, _entry, cause| match cause {
                RemovalCause::Size => {
                    listener_counters.evictions.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!(telemetry::CACHE_EVICTIONS_TOTAL).increment(1);
                }
                RemovalCause::Expired => {
                    listener_counters.expirations.fetch_add(1, Ordering::Relaxed);
                }
                _ => {}
            })
            .build();
        Self {
            entries,
            counters,
            config: config.clone(),
        }
    }

    /// Default TTL applied by [`store_default`](Self::store_default).
    pub fn default_ttl(&self) -> Duration {
        self.config.ttl
    }

    /// Look up a live response. Expired entries count as a miss and are
    /// removed on the spot.
    pub async fn lookup(&self, key: &Fingerprint) -> Option<Completion> {
        let found = match self.entries.get(key.as_str()).await {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.completion),
            Some(_) => {
                self.entries.invalidate(key.as_str()).await;
                self.counters.expirations.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => None,
        };
        if found.is_some() {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(telemetry::CACHE_HITS_TOTAL).increment(1);
        } else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
        }
        found
    }

    /// Like [`lookup`](Self::lookup) but leaves the hit/miss counters alone.
    ///
    /// Used to re-check the cache after winning a single-flight race, so one
    /// request never counts as two misses.
    pub async fn peek(&self, key: &Fingerprint) -> Option<Completion> {
        self.entries
            .get(key.as_str())
            .await
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.completion)
    }

    /// Insert or overwrite a response with an explicit TTL.
    ///
    /// A zero TTL stores nothing and TTLs above [`MAX_TTL`] are clamped. If
    /// the insert pushes the byte total past capacity, least-recently-used
    /// entries are evicted until it fits.
    pub async fn store(&self, key: Fingerprint, completion: Completion, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let ttl = ttl.min(MAX_TTL);
        let created_at = Instant::now();
        let Some(expires_at) = created_at.checked_add(ttl) else {
            debug!(ttl_secs = ttl.as_secs(), "ttl out of range, not caching");
            return;
        };
        let key = key.into_inner();
        let size_hint = size_hint(&key, &completion);
        let entry = CacheEntry {
            completion,
            created_at,
            expires_at,
            size_hint,
        };
        debug!(size_hint, ttl_secs = ttl.as_secs(), "caching response");
        self.entries.insert(key, entry).await;
    }

    /// Insert or overwrite a response with the configured default TTL.
    pub async fn store_default(&self, key: Fingerprint, completion: Completion) {
        self.store(key, completion, self.config.ttl).await;
    }

    /// Drop one entry. Returns whether it was present.
    pub async fn invalidate(&self, key: &Fingerprint) -> bool {
        self.entries.remove(key.as_str()).await.is_some()
    }

    /// Drop every entry and reset the statistics counters.
    pub async fn clear(&self) {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks().await;
        self.counters.reset();
    }

    /// Run pending housekeeping, purging expired entries.
    ///
    /// Returns how many entries expired during this sweep.
    pub async fn cleanup_expired(&self) -> u64 {
        let before = self.counters.expirations.load(Ordering::Relaxed);
        self.entries.run_pending_tasks().await;
        let removed = self
            .counters
            .expirations
            .load(Ordering::Relaxed)
            .saturating_sub(before);
        if removed > 0 {
            debug!(removed, "purged expired cache entries");
        }
        removed
    }

    /// Current statistics. Runs pending housekeeping first so entry counts
    /// and eviction totals are up to date.
    pub async fn stats(&self) -> CacheStats {
        self.entries.run_pending_tasks().await;
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            entries: self.entries.entry_count(),
            weighted_size: self.entries.weighted_size(),
            max_bytes: self.config.max_bytes,
        }
    }
}

/// Approximate byte footprint of an entry, used for capacity accounting.
fn size_hint(key: &str, completion: &Completion) -> u32 {
    let bytes = key.len() + completion.text.len() + completion.provider.len();
    u32::try_from(bytes)
        .unwrap_or(u32::MAX)
        .saturating_add(ENTRY_OVERHEAD)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completion(text: &str) -> Completion {
        Completion {
            text: text.into(),
            provider: "local".into(),
            model: None,
            usage: None,
        }
    }

    #[test]
    fn size_hint_counts_key_text_and_provider() {
        assert_eq!(size_hint("abc", &completion("hello")), 3 + 5 + 5 + ENTRY_OVERHEAD);
    }

    #[test]
    fn config_validation() {
        assert!(CacheConfig::default().validate().is_ok());
        assert!(CacheConfig::new().max_bytes(0).validate().is_err());
        assert!(CacheConfig::new().ttl(Duration::ZERO).validate().is_err());
        assert!(CacheConfig::new().ttl(MAX_TTL).validate().is_ok());
        assert!(CacheConfig::new().ttl(MAX_TTL + Duration::from_secs(1)).validate().is_err());
        assert!(
            CacheConfig::new()
                .sweep_interval(Duration::from_secs(u64::MAX))
                .validate()
                .is_err()
        );
    }

    #[test]
    fn hit_rate_handles_empty() {
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert_eq!(stats.hit_rate(), 75.0);
    }

    #[tokio::test]
    async fn zero_ttl_is_not_stored() {
        let cache = ResponseCache::new(&CacheConfig::default());
        let key = Fingerprint::new("soup", None, "local", None, 10, 0.5);
        cache.store(key.clone(), completion("x"), Duration::ZERO).await;
        assert!(cache.lookup(&key).await.is_none());
    }
}
