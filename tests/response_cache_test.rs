//! Tests for [`ResponseCache`]: byte-bounded LRU + per-entry TTL cache of
//! generated recipes.
//!
//! moka runs on its own clock, so TTL tests sleep for real (tens of ms).

use std::time::Duration;

use genie::cache::{CacheConfig, Fingerprint, MAX_SWEEP_INTERVAL, MAX_TTL, ResponseCache};
use genie::{Completion, Usage};

fn make_completion(text: &str) -> Completion {
    Completion {
        text: text.into(),
        provider: "local".into(),
        model: Some("llama-3.1-8b".into()),
        usage: Some(Usage {
            prompt_tokens: 12,
            completion_tokens: 80,
            total_tokens: 92,
        }),
    }
}

fn key(prompt: &str) -> Fingerprint {
    Fingerprint::new(prompt, None, "local", Some("llama-3.1-8b"), 500, 0.7)
}

// =========================================================================
// CacheConfig
// =========================================================================

#[test]
fn cache_config_defaults() {
    let config = CacheConfig::default();
    assert_eq!(config.max_bytes, 16 * 1024 * 1024);
    assert_eq!(config.ttl, Duration::from_secs(3600));
    assert_eq!(config.sweep_interval, Duration::from_secs(300));
}

#[test]
fn cache_config_builder() {
    let config = CacheConfig::new()
        .max_bytes(4096)
        .ttl(Duration::from_secs(60))
        .sweep_interval(Duration::from_secs(30));
    assert_eq!(config.max_bytes, 4096);
    assert_eq!(config.ttl, Duration::from_secs(60));
    assert_eq!(config.sweep_interval, Duration::from_secs(30));
    assert!(config.validate().is_ok());
}

#[test]
fn cache_config_rejects_zero_interval() {
    let config = CacheConfig::new().sweep_interval(Duration::ZERO);
    assert!(config.validate().is_err());
}

#[test]
fn cache_config_rejects_out_of_range_durations() {
    let huge = Duration::from_secs(i64::MAX as u64);
    assert!(CacheConfig::new().ttl(huge).validate().is_err());
    assert!(CacheConfig::new().sweep_interval(huge).validate().is_err());
    assert!(
        CacheConfig::new()
            .ttl(MAX_TTL)
            .sweep_interval(MAX_SWEEP_INTERVAL)
            .validate()
            .is_ok()
    );
}

// =========================================================================
// Lookup / store
// =========================================================================

#[tokio::test]
async fn miss_then_hit() {
    let cache = ResponseCache::new(&CacheConfig::default());
    let k = key("tomato, chicken, rice");

    assert!(cache.lookup(&k).await.is_none());

    let completion = make_completion("Chicken and tomato rice bake");
    cache.store_default(k.clone(), completion.clone()).await;

    assert_eq!(cache.lookup(&k).await, Some(completion));

    let stats = cache.stats().await;
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.hit_rate(), 50.0);
}

#[tokio::test]
async fn normalized_prompts_share_an_entry() {
    let cache = ResponseCache::new(&CacheConfig::default());
    cache
        .store_default(key("tomato, chicken, rice"), make_completion("bake"))
        .await;

    let hit = cache.lookup(&key("  Tomato,  CHICKEN, rice\n")).await;
    assert_eq!(hit.map(|c| c.text), Some("bake".to_string()));
}

#[tokio::test]
async fn different_provider_is_miss() {
    let cache = ResponseCache::new(&CacheConfig::default());
    cache.store_default(key("soup"), make_completion("soup")).await;

    let other = Fingerprint::new("soup", None, "openrouter", Some("llama-3.1-8b"), 500, 0.7);
    assert!(cache.lookup(&other).await.is_none());
}

#[tokio::test]
async fn store_overwrites() {
    let cache = ResponseCache::new(&CacheConfig::default());
    cache.store_default(key("soup"), make_completion("first")).await;
    cache.store_default(key("soup"), make_completion("second")).await;

    assert_eq!(cache.lookup(&key("soup")).await.unwrap().text, "second");
    assert_eq!(cache.stats().await.entries, 1);
}

#[tokio::test]
async fn peek_does_not_count() {
    let cache = ResponseCache::new(&CacheConfig::default());
    assert!(cache.peek(&key("soup")).await.is_none());
    cache.store_default(key("soup"), make_completion("soup")).await;
    assert!(cache.peek(&key("soup")).await.is_some());

    let stats = cache.stats().await;
    assert_eq!((stats.hits, stats.misses), (0, 0));
}

#[tokio::test]
async fn invalidate_removes_one_entry() {
    let cache = ResponseCache::new(&CacheConfig::default());
    cache.store_default(key("a"), make_completion("a")).await;
    cache.store_default(key("b"), make_completion("b")).await;

    assert!(cache.invalidate(&key("a")).await);
    assert!(!cache.invalidate(&key("a")).await);
    assert!(cache.lookup(&key("a")).await.is_none());
    assert!(cache.lookup(&key("b")).await.is_some());
}

#[tokio::test]
async fn clear_drops_entries_and_resets_stats() {
    let cache = ResponseCache::new(&CacheConfig::default());
    cache.store_default(key("a"), make_completion("a")).await;
    cache.lookup(&key("a")).await;
    cache.lookup(&key("zzz")).await;

    cache.clear().await;

    let stats = cache.stats().await;
    assert_eq!(stats.entries, 0);
    assert_eq!(stats.hits, 0);
    assert_eq!(stats.misses, 0);
    assert!(cache.peek(&key("a")).await.is_none());
}

// =========================================================================
// TTL
// =========================================================================

#[tokio::test]
async fn default_ttl_expiry() {
    let config = CacheConfig::new().ttl(Duration::from_millis(50));
    let cache = ResponseCache::new(&config);

    cache.store_default(key("soup"), make_completion("soup")).await;

    // Should be present immediately
    assert!(cache.lookup(&key("soup")).await.is_some());

    // Wait for TTL + some margin
    tokio::time::sleep(Duration::from_millis(120)).await;

    // Should be expired
    assert!(cache.lookup(&key("soup")).await.is_none());
    assert_eq!(cache.stats().await.misses, 1);
}

#[tokio::test]
async fn ttl_is_per_entry() {
    let cache = ResponseCache::new(&CacheConfig::default());
    cache
        .store(key("short"), make_completion("short"), Duration::from_millis(50))
        .await;
    cache
        .store(key("long"), make_completion("long"), Duration::from_secs(60))
        .await;

    tokio::time::sleep(Duration::from_millis(120)).await;

    assert!(cache.lookup(&key("short")).await.is_none());
    assert!(cache.lookup(&key("long")).await.is_some());
}

#[tokio::test]
async fn oversized_ttl_is_clamped() {
    let cache = ResponseCache::new(&CacheConfig::default());
    cache.store(key("soup"), make_completion("soup"), Duration::MAX).await;
    assert!(cache.lookup(&key("soup")).await.is_some());
}

#[tokio::test]
async fn zero_ttl_stores_nothing() {
    let cache = ResponseCache::new(&CacheConfig::default());
    cache
        .store(key("soup"), make_completion("soup"), Duration::ZERO)
        .await;
    assert!(cache.peek(&key("soup")).await.is_none());
}

// =========================================================================
// Capacity (bytes, LRU)
// =========================================================================

/// Weight of one entry as accounted by the cache.
async fn entry_weight(prompt: &str, text: &str) -> u64 {
    let probe = ResponseCache::new(&CacheConfig::default());
    probe.store_default(key(prompt), make_completion(text)).await;
    probe.stats().await.weighted_size
}

#[tokio::test]
async fn least_recently_used_is_evicted_first() {
    // Same-length prompts and texts, so every entry weighs the same.
    let weight = entry_weight("dish a", "recipe").await;
    assert!(weight > 0);
    let config = CacheConfig::new().max_bytes(weight * 3 + weight / 2);
    let cache = ResponseCache::new(&config);

    for prompt in ["dish a", "dish b", "dish c"] {
        cache.store_default(key(prompt), make_completion("recipe")).await;
        cache.stats().await;
    }
    // Touch "a" so "b" becomes least recently used.
    assert!(cache.lookup(&key("dish a")).await.is_some());
    cache.stats().await;

    cache.store_default(key("dish d"), make_completion("recipe")).await;
    let stats = cache.stats().await;

    assert_eq!(stats.entries, 3);
    assert_eq!(stats.evictions, 1);
    assert!(stats.weighted_size <= stats.max_bytes);
    assert!(cache.peek(&key("dish b")).await.is_none());
    assert!(cache.peek(&key("dish a")).await.is_some());
    assert!(cache.peek(&key("dish d")).await.is_some());
}

#[tokio::test]
async fn weighted_size_tracks_bytes() {
    let weight = entry_weight("dish a", "recipe").await;
    let cache = ResponseCache::new(&CacheConfig::default());
    cache.store_default(key("dish a"), make_completion("recipe")).await;
    cache.store_default(key("dish b"), make_completion("recipe")).await;
    assert_eq!(cache.stats().await.weighted_size, weight * 2);
}

// =========================================================================
// Metrics
// =========================================================================

/// Runs async cache operations within a local recorder scope.
///
/// Uses `block_in_place` + `block_on` pattern to keep `with_local_recorder`
/// on the same thread (it's a thread-local recorder).
#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn metrics_with_recorder() {
    use metrics_util::MetricKind;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                let cache = ResponseCache::new(&CacheConfig::default());

                // Miss
                cache.lookup(&key("soup")).await;

                // Insert + hit
                cache.store_default(key("soup"), make_completion("soup")).await;
                cache.lookup(&key("soup")).await;
            })
        })
    });

    let snapshot = snapshotter.snapshot().into_vec();

    let count = |name: &str| -> u64 {
        snapshot
            .iter()
            .filter(|(key, _, _, _)| key.kind() == MetricKind::Counter && key.key().name() == name)
            .map(|(_, _, _, val)| match val {
                DebugValue::Counter(c) => *c,
                _ => 0,
            })
            .sum()
    };

    assert_eq!(count(genie::telemetry::CACHE_MISSES_TOTAL), 1, "expected 1 cache miss");
    assert_eq!(count(genie::telemetry::CACHE_HITS_TOTAL), 1, "expected 1 cache hit");
}
