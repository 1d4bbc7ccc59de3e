//! Sliding-window rate limiting.
//!
//! A [`RateLimiter`] tracks one dimension (users, or guilds). Each scope in
//! that dimension owns a [`RateWindow`] of event timestamps behind its own
//! lock, so unrelated users never serialize on each other; the dimension's
//! map lock is held only to find or create a window.
//!
//! [`AdmissionControl`] combines the user and guild dimensions. A request
//! is admitted only if both dimensions have room, and it is recorded in
//! both or in neither.
//!
//! # Algorithm
//!
//! On every check the scope's timestamps older than `window` are dropped.
//! The event is accepted iff fewer than `limit` timestamps remain AND fewer
//! than `burst_limit` fall inside the last `burst_window` (1 second by
//! default). A denial reports how long until the blocking timestamp leaves
//! its window.
//!
//! Denial is ordinary control flow, not an error. The only failure is a
//! misconfiguration, rejected by [`RateLimitConfig::validate`] at startup.

mod window;

pub use window::RateWindow;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::telemetry;
use crate::{GenieError, Result};

/// Limits for one dimension.
///
/// ```rust
/// # use genie::RateLimitConfig;
/// # use std::time::Duration;
/// let per_user = RateLimitConfig::new(5, Duration::from_secs(60)).burst_limit(3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Events allowed per window.
    pub limit: u32,
    /// Length of the trailing window.
    pub window: Duration,
    /// Events allowed per burst window.
    pub burst_limit: u32,
    /// Length of the burst sub-window. Default: 1 second.
    pub burst_window: Duration,
    /// Scopes idle this long are dropped by [`RateLimiter::sweep`].
    /// Default: twice the window.
    pub idle_after: Duration,
}

impl RateLimitConfig {
    /// Create a config with `burst_limit == limit` (no extra burst cap).
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            burst_limit: limit,
            burst_window: Duration::from_secs(1),
            idle_after: window.saturating_mul(2),
        }
    }

    pub fn burst_limit(mut self, n: u32) -> Self {
        self.burst_limit = n;
        self
    }

    pub fn burst_window(mut self, window: Duration) -> Self {
        self.burst_window = window;
        self
    }

    pub fn idle_after(mut self, idle: Duration) -> Self {
        self.idle_after = idle;
        self
    }

    /// Reject limits that could never admit anything, or that would let a
    /// sweep drop live events.
    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(GenieError::Config("rate limit must be positive".into()));
        }
        if self.burst_limit == 0 {
            return Err(GenieError::Config("burst limit must be positive".into()));
        }
        if self.window.is_zero() || self.burst_window.is_zero() {
            return Err(GenieError::Config("rate limit windows must be non-zero".into()));
        }
        if self.idle_after < self.window {
            // A swept scope forgets events that still count against it.
            return Err(GenieError::Config(
                "rate limit idle_after must not be shorter than the window".into(),
            ));
        }
        Ok(())
    }
}

impl Default for RateLimitConfig {
    /// Recipe requests per user: 5 per minute, 3 per second.
    fn default() -> Self {
        Self::new(5, Duration::from_secs(60)).burst_limit(3)
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Denied { retry_after: Duration },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Admission::Allowed => None,
            Admission::Denied { retry_after } => Some(*retry_after),
        }
    }
}

/// Snapshot of one scope for the admin surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeStatus {
    /// Events inside the trailing window.
    pub used: u32,
    pub remaining: u32,
    /// Events inside the burst window.
    pub burst_used: u32,
    /// Wait before the next event would be admitted, if it would be denied now.
    pub retry_after: Option<Duration>,
}

type SharedWindow = Arc<Mutex<RateWindow>>;

/// Sliding-window limiter for one dimension (e.g. all users).
pub struct RateLimiter {
    dimension: &'static str,
    config: RateLimitConfig,
    scopes: Mutex<HashMap<String, SharedWindow>>,
}

impl RateLimiter {
    /// Create a limiter. `dimension` labels logs and metrics ("user", "guild").
    pub fn new(dimension: &'static str, config: RateLimitConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            dimension,
            config,
            scopes: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn dimension(&self) -> &'static str {
        self.dimension
    }

    /// Try to record one event for `scope` now.
    pub fn try_acquire(&self, scope: &str) -> Admission {
        self.try_acquire_at(scope, Instant::now())
    }

    /// Try to record one event for `scope` at `now`.
    ///
    /// Deterministic for a given sequence of `(scope, now)` calls.
    pub fn try_acquire_at(&self, scope: &str, now: Instant) -> Admission {
        let window = self.window(scope, now);
        let mut window = lock(&window);
        window.purge(now, self.config.window);
        window.touch(now);
        let verdict = window.evaluate(now, &self.config);
        match verdict.wait {
            None => {
                window.record(now);
                Admission::Allowed
            }
            Some(retry_after) => {
                self.on_denied(scope, retry_after);
                Admission::Denied { retry_after }
            }
        }
    }

    /// Current usage of `scope`, or `None` if the scope is not tracked.
    pub fn status(&self, scope: &str) -> Option<ScopeStatus> {
        self.status_at(scope, Instant::now())
    }

    pub fn status_at(&self, scope: &str, now: Instant) -> Option<ScopeStatus> {
        let window = lock_map(&self.scopes).get(scope).cloned()?;
        let mut window = lock(&window);
        window.purge(now, self.config.window);
        let verdict = window.evaluate(now, &self.config);
        Some(ScopeStatus {
            used: verdict.used as u32,
            remaining: self.config.limit.saturating_sub(verdict.used as u32),
            burst_used: verdict.burst_used as u32,
            retry_after: verdict.wait,
        })
    }

    /// Forget everything about `scope`. Returns whether it was tracked.
    pub fn reset(&self, scope: &str) -> bool {
        let removed = lock_map(&self.scopes).remove(scope).is_some();
        if removed {
            debug!(dimension = self.dimension, scope, "rate limit reset");
        }
        removed
    }

    /// Number of scopes currently tracked.
    pub fn active_scopes(&self) -> usize {
        lock_map(&self.scopes).len()
    }

    /// Drop scopes idle for at least `idle_after`. Returns how many went.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut scopes = lock_map(&self.scopes);
        let before = scopes.len();
        // Windows are only cloned out under the map lock, so a count of 1
        // means no request is evaluating this scope right now.
        scopes.retain(|_, window| {
            Arc::strong_count(window) > 1 || !lock(window).is_idle(now, self.config.idle_after)
        });
        let removed = before - scopes.len();
        if removed > 0 {
            debug!(
                dimension = self.dimension,
                removed,
                active = scopes.len(),
                "rate limiter sweep"
            );
        }
        removed
    }

    /// Find or lazily create the window for `scope`.
    fn window(&self, scope: &str, now: Instant) -> SharedWindow {
        let mut scopes = lock_map(&self.scopes);
        Arc::clone(
            scopes
                .entry(scope.to_owned())
                .or_insert_with(|| Arc::new(Mutex::new(RateWindow::new(now)))),
        )
    }

    fn on_denied(&self, scope: &str, retry_after: Duration) {
        warn!(
            dimension = self.dimension,
            scope,
            retry_after_ms = retry_after.as_millis() as u64,
            "rate limited"
        );
        metrics::counter!(telemetry::RATE_LIMITED_TOTAL, "dimension" => self.dimension)
            .increment(1);
    }
}

/// User and guild limiters evaluated together.
pub struct AdmissionControl {
    user: RateLimiter,
    guild: RateLimiter,
}

impl AdmissionControl {
    pub fn new(user: RateLimitConfig, guild: RateLimitConfig) -> Result<Self> {
        Ok(Self {
            user: RateLimiter::new("user", user)?,
            guild: RateLimiter::new("guild", guild)?,
        })
    }

    pub fn user(&self) -> &RateLimiter {
        &self.user
    }

    pub fn guild(&self) -> &RateLimiter {
        &self.guild
    }

    /// Admit one request from `user` (in `guild`, if any) now.
    pub fn try_acquire(&self, user: &str, guild: Option<&str>) -> Admission {
        self.try_acquire_at(user, guild, Instant::now())
    }

    /// Admit one request iff both dimensions have room; record in both or
    /// neither. The longer of the two waits is reported on denial.
    pub fn try_acquire_at(&self, user: &str, guild: Option<&str>, now: Instant) -> Admission {
        let user_window = self.user.window(user, now);
        let guild_window = guild.map(|g| self.guild.window(g, now));

        // Always user before guild, so two requests never lock in opposite order.
        let mut user_guard = lock(&user_window);
        let mut guild_guard = guild_window.as_ref().map(|w| lock(w));

        user_guard.purge(now, self.user.config.window);
        user_guard.touch(now);
        let user_wait = user_guard.evaluate(now, &self.user.config).wait;

        let guild_wait = guild_guard.as_mut().and_then(|g| {
            g.purge(now, self.guild.config.window);
            g.touch(now);
            g.evaluate(now, &self.guild.config).wait
        });

        if let Some(wait) = user_wait {
            self.user.on_denied(user, wait);
        }
        if let (Some(wait), Some(g)) = (guild_wait, guild) {
            self.guild.on_denied(g, wait);
        }

        match (user_wait, guild_wait) {
            (None, None) => {
                user_guard.record(now);
                if let Some(g) = guild_guard.as_mut() {
                    g.record(now);
                }
                Admission::Allowed
            }
            (a, b) => Admission::Denied {
                retry_after: a.unwrap_or_default().max(b.unwrap_or_default()),
            },
        }
    }

    pub fn reset_user(&self, user: &str) -> bool {
        self.user.reset(user)
    }

    pub fn reset_guild(&self, guild: &str) -> bool {
        self.guild.reset(guild)
    }

    /// Sweep both dimensions. Returns the total number of scopes dropped.
    pub fn sweep(&self) -> usize {
        self.user.sweep() + self.guild.sweep()
    }
}

fn lock(window: &Mutex<RateWindow>) -> MutexGuard<'_, RateWindow> {
    window.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn lock_map(
    scopes: &Mutex<HashMap<String, SharedWindow>>,
) -> MutexGuard<'_, HashMap<String, SharedWindow>> {
    scopes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
