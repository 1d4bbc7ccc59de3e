//! Caching subsystem.
//!
//! - [`key::Fingerprint`]: normalized request identity (prompt text plus
//!   language, provider and generation parameters) used as the cache key.
//!
//! - [`response::ResponseCache`]: LRU + per-entry TTL store of generated
//!   responses, bounded by total byte size. See [`response`] module docs.
//!
//! - [`flight::SingleFlight`]: per-key in-flight markers so concurrent
//!   misses on the same fingerprint trigger a single provider call.

pub mod flight;
pub mod key;
pub mod response;

pub use flight::{FlightRole, SingleFlight};
pub use key::{Fingerprint, normalize_prompt};
pub use response::{CacheConfig, CacheStats, MAX_SWEEP_INTERVAL, MAX_TTL, ResponseCache};
pub(crate) use response::validate_sweep_interval;
