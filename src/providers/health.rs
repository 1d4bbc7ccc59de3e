//! Per-provider statistics and health for the admin surface.
//!
//! The router keeps one [`ProviderStats`] per configured provider and
//! updates it after every provider call (cache hits and coalesced waits do
//! not count). Health is derived from consecutive failures only:
//!
//! | consecutive failures | state       |
//! |----------------------|-------------|
//! | 0                    | `Healthy`   |
//! | 1-2                  | `Degraded`  |
//! | 3+                   | `Unhealthy` |
//!
//! Health is informational; routing order never depends on it.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::error::{ErrorKind, GenieError};
use crate::types::Usage;

/// Consecutive failures at which a provider is reported unhealthy.
const UNHEALTHY_AFTER: u64 = 3;

/// Coarse provider health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthState {
    fn from_consecutive_failures(n: u64) -> Self {
        match n {
            0 => HealthState::Healthy,
            n if n < UNHEALTHY_AFTER => HealthState::Degraded,
            _ => HealthState::Unhealthy,
        }
    }
}

/// Point-in-time view of one provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderHealth {
    pub name: String,
    pub state: HealthState,
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub consecutive_failures: u64,
    pub last_error: Option<ErrorKind>,
    /// EWMA of call latency (successes and failures), `None` before the first call.
    pub average_latency: Option<Duration>,
    pub total_tokens: u64,
}

/// Live counters for one provider.
#[derive(Debug)]
pub struct ProviderStats {
    requests: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    consecutive_failures: AtomicU64,
    tokens: AtomicU64,
    last_error: Mutex<Option<ErrorKind>>,
    latency: ProviderLatency,
}

impl Default for ProviderStats {
    fn default() -> Self {
        Self {
            requests: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            consecutive_failures: AtomicU64::new(0),
            tokens: AtomicU64::new(0),
            last_error: Mutex::new(None),
            latency: ProviderLatency::with_default_alpha(),
        }
    }
}

impl ProviderStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, elapsed: Duration, usage: Option<&Usage>) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        if let Some(usage) = usage {
            self.tokens
                .fetch_add(u64::from(usage.total_tokens), Ordering::Relaxed);
        }
        self.latency.record(elapsed);
    }

    pub fn record_failure(&self, elapsed: Duration, error: &GenieError) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        *self
            .last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(error.kind());
        self.latency.record(elapsed);
    }

    pub fn state(&self) -> HealthState {
        HealthState::from_consecutive_failures(self.consecutive_failures.load(Ordering::Relaxed))
    }

    pub fn snapshot(&self, name: &str) -> ProviderHealth {
        let consecutive_failures = self.consecutive_failures.load(Ordering::Relaxed);
        ProviderHealth {
            name: name.to_owned(),
            state: HealthState::from_consecutive_failures(consecutive_failures),
            requests: self.requests.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            consecutive_failures,
            last_error: *self
                .last_error
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
            average_latency: self.latency.average(),
            total_tokens: self.tokens.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// EWMA latency tracking
// ============================================================================

/// Per-provider latency tracker using exponential weighted moving average.
///
/// Lock-free. Higher `alpha` reacts faster to change; the default of 0.2
/// smooths over a handful of calls.
pub struct ProviderLatency {
    /// EWMA in microseconds, stored as f64 bits. 0 until the first sample.
    ewma_micros: AtomicU64,
    alpha: f64,
    count: AtomicU64,
}

impl ProviderLatency {
    pub fn new(alpha: f64) -> Self {
        debug_assert!((0.0..=1.0).contains(&alpha), "alpha must be in [0.0, 1.0]");
        Self {
            ewma_micros: AtomicU64::new(0_f64.to_bits()),
            alpha,
            count: AtomicU64::new(0),
        }
    }

    pub fn with_default_alpha() -> Self {
        Self::new(0.2)
    }

    /// Record one call duration.
    ///
    /// Two threads racing on the very first sample may both initialise the
    /// average; the estimate converges after a few more samples.
    pub fn record(&self, duration: Duration) {
        let micros = duration.as_micros() as f64;
        loop {
            let current_bits = self.ewma_micros.load(Ordering::Relaxed);
            let current = f64::from_bits(current_bits);
            let new = if self.count.load(Ordering::Relaxed) == 0 {
                micros
            } else {
                self.alpha * micros + (1.0 - self.alpha) * current
            };
            if self
                .ewma_micros
                .compare_exchange_weak(
                    current_bits,
                    new.to_bits(),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                self.count.fetch_add(1, Ordering::Relaxed);
                break;
            }
        }
    }

    /// Current estimate, or `None` before the first sample.
    pub fn average(&self) -> Option<Duration> {
        if self.count.load(Ordering::Relaxed) == 0 {
            return None;
        }
        let micros = f64::from_bits(self.ewma_micros.load(Ordering::Relaxed));
        Some(Duration::from_micros(micros as u64))
    }

    pub fn observation_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for ProviderLatency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderLatency")
            .field("average", &self.average())
            .field("count", &self.observation_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_follows_consecutive_failures() {
        let stats = ProviderStats::new();
        assert_eq!(stats.state(), HealthState::Healthy);
        stats.record_failure(Duration::from_millis(10), &GenieError::Timeout);
        assert_eq!(stats.state(), HealthState::Degraded);
        stats.record_failure(Duration::from_millis(10), &GenieError::Timeout);
        stats.record_failure(Duration::from_millis(10), &GenieError::Timeout);
        assert_eq!(stats.state(), HealthState::Unhealthy);
        stats.record_success(Duration::from_millis(10), None);
        assert_eq!(stats.state(), HealthState::Healthy);
    }

    #[test]
    fn snapshot_aggregates_tokens_and_last_error() {
        let stats = ProviderStats::new();
        let usage = Usage {
            total_tokens: 42,
            ..Default::default()
        };
        stats.record_success(Duration::from_millis(100), Some(&usage));
        stats.record_success(Duration::from_millis(100), Some(&usage));
        stats.record_failure(Duration::from_millis(100), &GenieError::Auth);

        let snap = stats.snapshot("local");
        assert_eq!(snap.name, "local");
        assert_eq!(snap.requests, 3);
        assert_eq!(snap.successes, 2);
        assert_eq!(snap.failures, 1);
        assert_eq!(snap.total_tokens, 84);
        assert_eq!(snap.last_error, Some(ErrorKind::Auth));
        assert_eq!(snap.average_latency, Some(Duration::from_millis(100)));
    }

    #[test]
    fn ewma_first_sample_initialises() {
        let latency = ProviderLatency::new(0.5);
        assert_eq!(latency.average(), None);
        latency.record(Duration::from_millis(100));
        latency.record(Duration::from_millis(200));
        assert_eq!(latency.average(), Some(Duration::from_millis(150)));
        assert_eq!(latency.observation_count(), 2);
    }
}
