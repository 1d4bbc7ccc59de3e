//! Telemetry metric name constants.
//!
//! Centralised metric names for genie operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `genie_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `provider`: provider name (e.g. "local", "openrouter")
//! - `status`: outcome: "ok" or "error"
//! - `dimension`: rate-limit dimension: "user" or "guild"

/// Total provider calls dispatched by the router.
///
/// Labels: `provider`, `status` ("ok" | "error").
pub const REQUESTS_TOTAL: &str = "genie_requests_total";

/// Provider call duration in seconds, retries included.
///
/// Labels: `provider`.
pub const REQUEST_DURATION_SECONDS: &str = "genie_request_duration_seconds";

/// Total retry attempts (not counting the initial request).
///
/// Labels: `provider`.
pub const RETRIES_TOTAL: &str = "genie_retries_total";

/// Total fall-throughs from one provider to the next.
///
/// Labels: `provider` (the one that failed).
pub const FALLBACKS_TOTAL: &str = "genie_fallbacks_total";

/// Total tokens reported by providers.
///
/// Labels: `provider`.
pub const TOKENS_TOTAL: &str = "genie_tokens_total";

/// Total response cache hits.
pub const CACHE_HITS_TOTAL: &str = "genie_cache_hits_total";

/// Total response cache misses.
pub const CACHE_MISSES_TOTAL: &str = "genie_cache_misses_total";

/// Total entries evicted for capacity.
pub const CACHE_EVICTIONS_TOTAL: &str = "genie_cache_evictions_total";

/// Total requests that waited on another request's in-flight call.
pub const COALESCED_TOTAL: &str = "genie_coalesced_total";

/// Total admissions denied by the rate limiter.
///
/// Labels: `dimension`.
pub const RATE_LIMITED_TOTAL: &str = "genie_rate_limited_total";
