//! Sliding-window bookkeeping for one rate-limited scope.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use super::RateLimitConfig;

/// Event timestamps for one scope, oldest first.
///
/// Only timestamps younger than the window are kept; older ones are purged
/// lazily whenever the scope is evaluated.
#[derive(Debug)]
pub struct RateWindow {
    timestamps: VecDeque<Instant>,
    last_active: Instant,
}

/// Result of evaluating a window at one instant, before anything is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Verdict {
    pub used: usize,
    pub burst_used: usize,
    /// `None` if the event may proceed; otherwise how long until it could.
    pub wait: Option<Duration>,
}

impl RateWindow {
    pub fn new(now: Instant) -> Self {
        Self {
            timestamps: VecDeque::new(),
            last_active: now,
        }
    }

    /// Drop timestamps that are no longer inside the trailing window.
    pub fn purge(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.timestamps.front() {
            if now.saturating_duration_since(oldest) >= window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Decide whether one more event fits. Call [`purge`](Self::purge) first.
    pub(crate) fn evaluate(&self, now: Instant, config: &RateLimitConfig) -> Verdict {
        let used = self.timestamps.len();
        let burst_used = self
            .timestamps
            .iter()
            .rev()
            .take_while(|&&t| now.saturating_duration_since(t) < config.burst_window)
            .count();

        let mut wait = None;
        if used >= config.limit as usize {
            // The oldest event has to leave the window.
            wait = Some(self.wait_for(used - config.limit as usize, now, config.window));
        }
        if burst_used >= config.burst_limit as usize {
            // The oldest event of the burst has to leave the burst window.
            let idx = used - burst_used + (burst_used - config.burst_limit as usize);
            let burst_wait = self.wait_for(idx, now, config.burst_window);
            wait = Some(wait.map_or(burst_wait, |w: Duration| w.max(burst_wait)));
        }

        Verdict {
            used,
            burst_used,
            wait,
        }
    }

    /// Time until the timestamp at `idx` is `span` old, clamped to zero.
    fn wait_for(&self, idx: usize, now: Instant, span: Duration) -> Duration {
        self.timestamps
            .get(idx)
            .map(|&t| span.saturating_sub(now.saturating_duration_since(t)))
            .unwrap_or_default()
    }

    /// Append an admitted event.
    pub fn record(&mut self, now: Instant) {
        self.timestamps.push_back(now);
        self.last_active = now;
    }

    /// Note that the scope was evaluated, even if the event was denied.
    pub fn touch(&mut self, now: Instant) {
        self.last_active = self.last_active.max(now);
    }

    /// Whether the scope saw no activity for at least `idle_after`.
    pub fn is_idle(&self, now: Instant, idle_after: Duration) -> bool {
        now.saturating_duration_since(self.last_active) >= idle_after
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}
