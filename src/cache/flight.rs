//! Single-flight coalescing of concurrent cache misses.
//!
//! When several requests miss the cache on the same key at the same time,
//! only the first (the *leader*) runs the provider call. The others
//! (*followers*) subscribe to the leader's in-flight marker and receive a
//! clone of its outcome.
//!
//! The marker is a `tokio::sync::watch` channel. If the leader's future is
//! dropped before it finishes (message deleted, shutdown), its sender is
//! dropped with it and every follower resolves to
//! [`GenieError::Cancelled`] instead of waiting forever. The map lock is
//! held only to look up or insert a marker, never across an await.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;

use crate::{GenieError, Result};

type Marker<T> = watch::Receiver<Option<Result<T>>>;

/// Whether the caller ran the work itself or piggybacked on another call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightRole {
    Leader,
    Follower,
}

/// Per-key in-flight markers.
pub struct SingleFlight<T> {
    inflight: Mutex<HashMap<String, (u64, Marker<T>)>>,
    next_id: AtomicU64,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

enum Role<T> {
    Leader(u64, watch::Sender<Option<Result<T>>>),
    Follower(Marker<T>),
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` for `key` unless an identical call is already in flight,
    /// in which case wait for that call's outcome instead.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> (Result<T>, FlightRole)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let role = {
            let mut inflight = self.lock();
            match inflight.get(key) {
                Some((_, marker)) => Role::Follower(marker.clone()),
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let (tx, rx) = watch::channel(None);
                    inflight.insert(key.to_owned(), (id, rx));
                    Role::Leader(id, tx)
                }
            }
        };

        match role {
            Role::Follower(marker) => (Self::wait(marker).await, FlightRole::Follower),
            Role::Leader(id, tx) => {
                let _landing = Landing {
                    flight: self,
                    key,
                    id,
                };
                let outcome = work().await;
                // Nobody listening is fine.
                let _ = tx.send(Some(outcome.clone()));
                (outcome, FlightRole::Leader)
            }
        }
    }

    /// Number of keys currently in flight.
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    async fn wait(mut marker: Marker<T>) -> Result<T> {
        loop {
            let published = marker.borrow_and_update().clone();
            if let Some(outcome) = published {
                return outcome;
            }
            if marker.changed().await.is_err() {
                // Sender gone; it may still have published before dropping.
                let last = marker.borrow().clone();
                return last.unwrap_or(Err(GenieError::Cancelled));
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (u64, Marker<T>)>> {
        // A poisoned map only means a panic elsewhere mid-insert; the
        // markers themselves are still consistent.
        self.inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Removes the leader's marker when the leader finishes or is dropped.
struct Landing<'a, T: Clone> {
    flight: &'a SingleFlight<T>,
    key: &'a str,
    id: u64,
}

impl<T: Clone> Drop for Landing<'_, T> {
    fn drop(&mut self) {
        let mut inflight = self.flight.lock();
        if inflight.get(self.key).is_some_and(|(id, _)| *id == self.id) {
            inflight.remove(self.key);
        }
    }
}
