//! Tests for the sliding-window rate limiter.
//!
//! Timing is driven through `try_acquire_at` with explicit instants, so the
//! results do not depend on how fast the test runs.

use std::time::Duration;

use tokio::time::Instant;

use genie::{Admission, AdmissionControl, RateLimitConfig, RateLimiter};

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

fn limiter(limit: u32, window: Duration, burst: u32) -> RateLimiter {
    RateLimiter::new("user", RateLimitConfig::new(limit, window).burst_limit(burst)).unwrap()
}

// ============================================================================
// Scenario from the bot's default limits
// ============================================================================

#[test]
fn burst_then_window_slide() {
    let limiter = limiter(5, secs(60), 3);
    let t0 = Instant::now();

    for _ in 0..3 {
        assert_eq!(limiter.try_acquire_at("alice", t0), Admission::Allowed);
    }

    // 4th call 200ms later exceeds the 1-second burst.
    match limiter.try_acquire_at("alice", t0 + ms(200)) {
        Admission::Denied { retry_after } => assert_eq!(retry_after, ms(800)),
        Admission::Allowed => panic!("burst limit should deny"),
    }

    // Well after the window slid, a new call is allowed.
    assert_eq!(limiter.try_acquire_at("alice", t0 + secs(61)), Admission::Allowed);
}

#[test]
fn window_limit_reports_wait_for_oldest() {
    let limiter = limiter(5, secs(60), 5);
    let t0 = Instant::now();
    for i in 0..5 {
        assert!(limiter.try_acquire_at("bob", t0 + secs(i * 2)).is_allowed());
    }
    let denied = limiter.try_acquire_at("bob", t0 + secs(20));
    assert_eq!(denied.retry_after(), Some(secs(40)));

    // Exactly when the oldest leaves, there is room again.
    assert!(limiter.try_acquire_at("bob", t0 + secs(60)).is_allowed());
}

#[test]
fn denied_calls_are_not_recorded() {
    let limiter = limiter(1, secs(10), 1);
    let t0 = Instant::now();
    assert!(limiter.try_acquire_at("carol", t0).is_allowed());
    for i in 1..5 {
        assert!(!limiter.try_acquire_at("carol", t0 + secs(i)).is_allowed());
    }
    // Only the first call counts toward the window.
    assert!(limiter.try_acquire_at("carol", t0 + secs(10)).is_allowed());
}

#[test]
fn scopes_are_independent() {
    let limiter = limiter(1, secs(60), 1);
    let t0 = Instant::now();
    assert!(limiter.try_acquire_at("a", t0).is_allowed());
    assert!(limiter.try_acquire_at("b", t0).is_allowed());
    assert!(!limiter.try_acquire_at("a", t0).is_allowed());
}

// ============================================================================
// Properties
// ============================================================================

/// No trailing window of length W ever holds more than L admissions, and no
/// trailing second holds more than the burst limit.
#[test]
fn admissions_never_exceed_limits() {
    let (limit, window, burst) = (7u32, secs(10), 3u32);
    let limiter = limiter(limit, window, burst);
    let t0 = Instant::now();

    let mut admitted = Vec::new();
    // Irregular arrivals, several per second.
    let mut offset = 0u64;
    for i in 0..400u64 {
        offset += 37 + (i * 7919) % 300;
        let now = t0 + ms(offset);
        if limiter.try_acquire_at("prop", now).is_allowed() {
            admitted.push(now);
        }
    }
    assert!(!admitted.is_empty());

    for (i, &at) in admitted.iter().enumerate() {
        let in_window = admitted[..=i]
            .iter()
            .filter(|&&t| at.duration_since(t) < window)
            .count();
        assert!(in_window <= limit as usize, "window overflow at #{i}");

        let in_burst = admitted[..=i]
            .iter()
            .filter(|&&t| at.duration_since(t) < secs(1))
            .count();
        assert!(in_burst <= burst as usize, "burst overflow at #{i}");
    }
}

#[test]
fn same_sequence_same_answers() {
    let run = || {
        let limiter = limiter(3, secs(5), 2);
        let t0 = Instant::now();
        (0..30u64)
            .map(|i| limiter.try_acquire_at("d", t0 + ms(i * 350)))
            .map(|a| a.retry_after())
            .collect::<Vec<_>>()
    };
    assert_eq!(run(), run());
}

// ============================================================================
// Status, reset, sweep
// ============================================================================

#[test]
fn status_reports_usage() {
    let limiter = limiter(5, secs(60), 3);
    let t0 = Instant::now();
    assert!(limiter.status_at("eve", t0).is_none());

    limiter.try_acquire_at("eve", t0);
    limiter.try_acquire_at("eve", t0 + ms(10));
    let status = limiter.status_at("eve", t0 + ms(20)).unwrap();
    assert_eq!(status.used, 2);
    assert_eq!(status.remaining, 3);
    assert_eq!(status.burst_used, 2);
    assert_eq!(status.retry_after, None);
}

#[test]
fn reset_clears_scope() {
    let limiter = limiter(1, secs(60), 1);
    let t0 = Instant::now();
    limiter.try_acquire_at("frank", t0);
    assert!(!limiter.try_acquire_at("frank", t0).is_allowed());

    assert!(limiter.reset("frank"));
    assert!(!limiter.reset("frank"));
    assert!(limiter.try_acquire_at("frank", t0).is_allowed());
}

#[test]
fn sweep_drops_idle_scopes_only() {
    let limiter = limiter(5, secs(60), 5);
    let t0 = Instant::now();
    limiter.try_acquire_at("idle", t0);
    limiter.try_acquire_at("busy", t0 + secs(100));
    assert_eq!(limiter.active_scopes(), 2);

    // idle_after defaults to 2 × window = 120s.
    assert_eq!(limiter.sweep_at(t0 + secs(119)), 0);
    assert_eq!(limiter.sweep_at(t0 + secs(120)), 1);
    assert_eq!(limiter.active_scopes(), 1);
}

// ============================================================================
// User + guild admission
// ============================================================================

fn admission() -> AdmissionControl {
    AdmissionControl::new(
        RateLimitConfig::new(3, secs(60)),
        RateLimitConfig::new(4, secs(60)),
    )
    .unwrap()
}

#[test]
fn guild_limit_applies_across_users() {
    let control = admission();
    let t0 = Instant::now();
    for (i, user) in ["u1", "u2", "u3", "u4"].iter().enumerate() {
        let at = t0 + secs(i as u64);
        assert!(control.try_acquire_at(user, Some("g"), at).is_allowed());
    }
    assert!(!control.try_acquire_at("u5", Some("g"), t0 + secs(5)).is_allowed());
    // Same user in a direct message skips the guild dimension.
    assert!(control.try_acquire_at("u5", None, t0 + secs(5)).is_allowed());
}

#[test]
fn denial_in_one_dimension_records_neither() {
    let control = admission();
    let t0 = Instant::now();
    for i in 0..4 {
        assert!(control.try_acquire_at(&format!("u{i}"), Some("g"), t0).is_allowed());
    }
    // Guild is full: this user's attempt must not be charged.
    assert!(!control.try_acquire_at("fresh", Some("g"), t0).is_allowed());
    assert!(control.user().status_at("fresh", t0).is_some_and(|s| s.used == 0));
}

#[test]
fn tighter_dimension_sets_retry_after() {
    let control = admission();
    let t0 = Instant::now();
    for i in 0..3 {
        control.try_acquire_at("u", Some(&format!("g{i}")), t0 + secs(i * 10));
    }
    control.try_acquire_at("other", Some("g9"), t0 + secs(25));
    // User full (oldest at t0 → 30s left); guild g9 has room.
    let denied = control.try_acquire_at("u", Some("g9"), t0 + secs(30));
    assert_eq!(denied.retry_after(), Some(secs(30)));
}

#[test]
fn longer_guild_wait_is_reported() {
    let control = admission();
    let t0 = Instant::now();
    // User "u" fills its own window in direct messages: oldest at t0.
    for i in 0..3 {
        assert!(control.try_acquire_at("u", None, t0 + secs(i)).is_allowed());
    }
    // Guild "g" fills up later: oldest at t0 + 20s.
    for user in ["a", "b", "c", "d"] {
        assert!(control.try_acquire_at(user, Some("g"), t0 + secs(20)).is_allowed());
    }

    // Both full at t0 + 50s: user frees up in 10s, guild only in 30s.
    let denied = control.try_acquire_at("u", Some("g"), t0 + secs(50));
    assert_eq!(denied.retry_after(), Some(secs(30)));

    // A user with room is held back by the guild alone.
    let denied = control.try_acquire_at("fresh", Some("g"), t0 + secs(50));
    assert_eq!(denied.retry_after(), Some(secs(30)));
}

#[test]
fn idle_after_shorter_than_window_is_rejected() {
    let config = RateLimitConfig::new(5, secs(60)).idle_after(secs(30));
    assert!(config.validate().is_err());
    assert!(RateLimiter::new("user", config).is_err());
    assert!(
        RateLimitConfig::new(5, secs(60))
            .idle_after(secs(60))
            .validate()
            .is_ok()
    );
}

#[test]
fn invalid_limits_are_rejected() {
    assert!(
        AdmissionControl::new(RateLimitConfig::new(0, secs(60)), RateLimitConfig::default())
            .is_err()
    );
    assert!(
        AdmissionControl::new(
            RateLimitConfig::default(),
            RateLimitConfig::new(5, secs(60)).burst_limit(0)
        )
        .is_err()
    );
}
