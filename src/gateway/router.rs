//! The request façade: admission, cache, single-flight, fallback.
//!
//! Every request walks the same state machine:
//!
//! ```text
//! handle(request)
//!     │
//!     ├─ AdmissionControl::try_acquire(user, guild) ── denied ──► Denied(retry_after)
//!     │
//!     ├─ ResponseCache::lookup(fingerprint) ────────── hit ─────► Done(cached)
//!     │
//!     └─ SingleFlight::run(fingerprint)
//!            │ follower: wait for the leader's outcome ────────► Done(coalesced)
//!            │ leader:
//!            ├─ re-check cache (another leader may just have landed)
//!            ├─ acquire a generation permit
//!            ├─ provider[0] ─ transient ─► provider[1] ─ ... ─► AllProvidersFailed
//!            │      │ permanent ──────────────────────────────► Done(error)
//!            │      └ ok ─► ResponseCache::store ─────────────► Done(text)
//! ```
//!
//! Nothing here returns `Err`: every outcome, denial included, is folded
//! into a [`GenerationResult`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::cache::{
    CacheStats, Fingerprint, FlightRole, MAX_SWEEP_INTERVAL, ResponseCache, SingleFlight,
};
use crate::limiter::{Admission, AdmissionControl, ScopeStatus};
use crate::providers::{Provider, ProviderHealth, ProviderStats};
use crate::telemetry;
use crate::types::{Completion, GenerationRequest, GenerationResult};
use crate::{GenieError, Result};

/// One configured provider plus its live statistics.
pub(crate) struct Slot {
    pub(crate) provider: Arc<dyn Provider>,
    pub(crate) stats: ProviderStats,
}

/// Outcome shared between a single-flight leader and its followers.
#[derive(Debug, Clone)]
struct Attempt {
    outcome: Result<Completion>,
    /// Provider that produced the text, or the last one that failed.
    provider: Option<String>,
    /// The leader found the answer in the cache on its re-check.
    cached: bool,
}

/// State shared with the background sweepers.
pub(crate) struct Shared {
    pub(crate) admission: AdmissionControl,
    pub(crate) cache: ResponseCache,
    pub(crate) cache_sweep_interval: Duration,
    pub(crate) limiter_sweep_interval: Duration,
}

/// Entry point used by the chat glue layer.
///
/// Build with [`RouterBuilder`](super::RouterBuilder). Share between message
/// handlers behind an `Arc`; every method takes `&self`.
///
/// Dropping the future returned by [`handle`](Self::handle) abandons the
/// request. If it was leading a provider call, requests waiting on that
/// call resolve with [`GenieError::Cancelled`].
pub struct ProviderRouter {
    shared: Arc<Shared>,
    slots: Vec<Slot>,
    flight: SingleFlight<Attempt>,
    permits: Semaphore,
    shutdown: watch::Sender<bool>,
    sweepers: Mutex<Vec<JoinHandle<()>>>,
}

impl ProviderRouter {
    pub(crate) fn new(shared: Shared, slots: Vec<Slot>, max_concurrent_requests: usize) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(shared),
            slots,
            flight: SingleFlight::new(),
            permits: Semaphore::new(max_concurrent_requests),
            shutdown,
            sweepers: Mutex::new(Vec::new()),
        }
    }

    /// Run one request through admission, cache and providers.
    #[instrument(
        skip_all,
        fields(
            user = %request.user_scope,
            guild = request.guild_scope.as_deref().unwrap_or("-"),
            language = request.language.as_deref().unwrap_or("-"),
        )
    )]
    pub async fn handle(&self, request: GenerationRequest) -> GenerationResult {
        let started = Instant::now();

        if self.is_shut_down() {
            return failure(GenieError::Cancelled, None, started);
        }

        // 1. Admission: both dimensions, recorded in both or neither.
        if let Admission::Denied { retry_after } = self
            .shared
            .admission
            .try_acquire(&request.user_scope, request.guild_scope.as_deref())
        {
            return GenerationResult::denied(retry_after);
        }

        // 2. Cache, keyed on the first provider of the route.
        let route = self.route(request.requested_provider.as_deref());
        let Some(&primary) = route.first() else {
            return failure(GenieError::NoProvider, None, started);
        };
        let language = request.language.as_deref();
        let key = fingerprint(&request.prompt, language, self.slots[primary].provider.as_ref());
        if let Some(hit) = self.shared.cache.lookup(&key).await {
            debug!(provider = %hit.provider, "cache hit");
            return success(hit, started, true, false);
        }

        // 3. Single-flight: one provider call per key at a time.
        let mut stop = self.shutdown.subscribe();
        let flight = self.flight.run(key.as_str(), || async {
            Ok(self.fetch(&key, &request.prompt, language, &route).await)
        });
        let (outcome, role) = tokio::select! {
            out = flight => out,
            () = shutdown_signalled(&mut stop) => (Err(GenieError::Cancelled), FlightRole::Leader),
        };

        let coalesced = role == FlightRole::Follower;
        if coalesced {
            metrics::counter!(telemetry::COALESCED_TOTAL).increment(1);
        }
        match outcome {
            Ok(Attempt {
                outcome: Ok(completion),
                cached,
                ..
            }) => success(completion, started, cached, coalesced),
            Ok(Attempt {
                outcome: Err(e),
                provider,
                ..
            }) => failure(e, provider, started).with_coalesced(coalesced),
            Err(e) => failure(e, None, started).with_coalesced(coalesced),
        }
    }

    /// Leader path: re-check the cache, then walk the route.
    async fn fetch(
        &self,
        key: &Fingerprint,
        prompt: &str,
        language: Option<&str>,
        route: &[usize],
    ) -> Attempt {
        if let Some(hit) = self.shared.cache.peek(key).await {
            return Attempt {
                provider: Some(hit.provider.clone()),
                outcome: Ok(hit),
                cached: true,
            };
        }

        let Ok(_permit) = self.permits.acquire().await else {
            // Closed on shutdown.
            return Attempt {
                outcome: Err(GenieError::Cancelled),
                provider: None,
                cached: false,
            };
        };

        let mut last_err = None;
        let mut last_provider = None;
        for (position, &idx) in route.iter().enumerate() {
            let slot = &self.slots[idx];
            let name = slot.provider.name();
            let call_started = Instant::now();
            let result = slot.provider.generate(prompt, language).await;
            let elapsed = call_started.elapsed();
            match result {
                Ok(completion) => {
                    slot.stats.record_success(elapsed, completion.usage.as_ref());
                    record_request(name, elapsed, true);
                    if let Some(usage) = &completion.usage {
                        metrics::counter!(telemetry::TOKENS_TOTAL, "provider" => name.to_owned())
                            .increment(u64::from(usage.total_tokens));
                    }
                    self.shared
                        .cache
                        .store_default(key.clone(), completion.clone())
                        .await;
                    return Attempt {
                        provider: Some(name.to_owned()),
                        outcome: Ok(completion),
                        cached: false,
                    };
                }
                Err(e) if e.is_transient() => {
                    slot.stats.record_failure(elapsed, &e);
                    record_request(name, elapsed, false);
                    if position + 1 < route.len() {
                        metrics::counter!(telemetry::FALLBACKS_TOTAL, "provider" => name.to_owned())
                            .increment(1);
                        warn!(provider = name, error = %e, "provider failed, falling back");
                    } else {
                        warn!(provider = name, error = %e, "last provider failed");
                    }
                    last_err = Some(e);
                    last_provider = Some(name.to_owned());
                }
                Err(e) => {
                    slot.stats.record_failure(elapsed, &e);
                    record_request(name, elapsed, false);
                    warn!(provider = name, error = %e, "provider failed permanently");
                    return Attempt {
                        outcome: Err(e),
                        provider: Some(name.to_owned()),
                        cached: false,
                    };
                }
            }
        }

        Attempt {
            outcome: Err(GenieError::AllProvidersFailed {
                attempts: route.len(),
                last: Box::new(last_err.unwrap_or(GenieError::NoProvider)),
            }),
            provider: last_provider,
            cached: false,
        }
    }

    /// Slot indices in the order they should be tried.
    ///
    /// A known requested provider moves to the front; the others keep
    /// their configured priority. Each provider appears once.
    fn route(&self, requested: Option<&str>) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.slots.len()).collect();
        if let Some(requested) = requested {
            match order
                .iter()
                .position(|&i| self.slots[i].provider.name() == requested)
            {
                Some(pos) => order[..=pos].rotate_right(1),
                None => warn!(requested, "unknown provider requested, using default order"),
            }
        }
        order
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Spawn the cache and rate-limiter sweepers. Calling it twice is a no-op.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut sweepers = lock_sweepers(&self.sweepers);
        if !sweepers.is_empty() || self.is_shut_down() {
            return;
        }

        let shared = Arc::clone(&self.shared);
        let every = shared.cache_sweep_interval;
        sweepers.push(spawn_sweeper(every, self.shutdown.subscribe(), move || {
            let shared = Arc::clone(&shared);
            async move {
                shared.cache.cleanup_expired().await;
            }
        }));

        let shared = Arc::clone(&self.shared);
        let every = shared.limiter_sweep_interval;
        sweepers.push(spawn_sweeper(every, self.shutdown.subscribe(), move || {
            let shared = Arc::clone(&shared);
            async move {
                shared.admission.sweep();
            }
        }));
        info!(providers = self.slots.len(), "router started");
    }

    /// Stop the sweepers and abandon in-flight provider calls.
    ///
    /// Requests in progress resolve with [`GenieError::Cancelled`]; later
    /// calls to [`handle`](Self::handle) do too.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        self.permits.close();
        let handles: Vec<_> = lock_sweepers(&self.sweepers).drain(..).collect();
        join_all(handles).await;
        info!("router shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    // ========================================================================
    // Admin surface
    // ========================================================================

    pub async fn cache_stats(&self) -> CacheStats {
        self.shared.cache.stats().await
    }

    pub async fn clear_cache(&self) {
        self.shared.cache.clear().await;
        info!("response cache cleared");
    }

    /// Usage of a user scope, `None` if the user has no recent activity.
    pub fn user_status(&self, user: &str) -> Option<ScopeStatus> {
        self.shared.admission.user().status(user)
    }

    /// Usage of a guild scope, `None` if the guild has no recent activity.
    pub fn guild_status(&self, guild: &str) -> Option<ScopeStatus> {
        self.shared.admission.guild().status(guild)
    }

    pub fn reset_user(&self, user: &str) -> bool {
        self.shared.admission.reset_user(user)
    }

    pub fn reset_guild(&self, guild: &str) -> bool {
        self.shared.admission.reset_guild(guild)
    }

    /// Number of tracked (user, guild) scopes.
    pub fn active_scopes(&self) -> (usize, usize) {
        let admission = &self.shared.admission;
        (admission.user().active_scopes(), admission.guild().active_scopes())
    }

    /// Health of every provider, in priority order.
    pub fn provider_health(&self) -> Vec<ProviderHealth> {
        self.slots
            .iter()
            .map(|slot| slot.stats.snapshot(slot.provider.name()))
            .collect()
    }

    /// Provider names in priority order.
    pub fn provider_names(&self) -> Vec<&str> {
        self.slots.iter().map(|slot| slot.provider.name()).collect()
    }

    /// Number of cache keys with a provider call in flight.
    pub fn in_flight(&self) -> usize {
        self.flight.in_flight()
    }
}

impl Drop for ProviderRouter {
    fn drop(&mut self) {
        for handle in lock_sweepers(&self.sweepers).drain(..) {
            handle.abort();
        }
    }
}

fn fingerprint(prompt: &str, language: Option<&str>, provider: &dyn Provider) -> Fingerprint {
    let params = provider.params();
    Fingerprint::new(
        prompt,
        language,
        provider.name(),
        params.model.as_deref(),
        params.max_tokens,
        params.temperature,
    )
}

fn success(
    completion: Completion,
    started: Instant,
    cached: bool,
    coalesced: bool,
) -> GenerationResult {
    GenerationResult {
        outcome: Ok(completion.text),
        provider_used: Some(completion.provider),
        latency: started.elapsed(),
        cached,
        coalesced,
    }
}

fn failure(error: GenieError, provider: Option<String>, started: Instant) -> GenerationResult {
    GenerationResult {
        outcome: Err(error),
        provider_used: provider,
        latency: started.elapsed(),
        cached: false,
        coalesced: false,
    }
}

fn record_request(provider: &str, elapsed: Duration, ok: bool) {
    let status = if ok { "ok" } else { "error" };
    metrics::counter!(telemetry::REQUESTS_TOTAL,
        "provider" => provider.to_owned(),
        "status" => status,
    )
    .increment(1);
    metrics::histogram!(telemetry::REQUEST_DURATION_SECONDS,
        "provider" => provider.to_owned(),
    )
    .record(elapsed.as_secs_f64());
}

/// Resolves once shutdown is signalled. Never resolves if the router is
/// dropped without signalling, since nothing is left to cancel then.
async fn shutdown_signalled(stop: &mut watch::Receiver<bool>) {
    loop {
        let stopped = *stop.borrow_and_update();
        if stopped {
            return;
        }
        if stop.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn spawn_sweeper<F, Fut>(every: Duration, mut stop: watch::Receiver<bool>, sweep: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    let every = every.min(MAX_SWEEP_INTERVAL);
    tokio::spawn(async move {
        let mut tick = tokio::time::interval_at(Instant::now() + every, every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = tick.tick() => sweep().await,
                () = shutdown_signalled(&mut stop) => break,
            }
        }
    })
}

fn lock_sweepers(sweepers: &Mutex<Vec<JoinHandle<()>>>) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
    sweepers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
