//! Genie - request admission and response delivery for Recipe Genie
//!
//! Sits between incoming chat messages and the LLM endpoints that write
//! recipes. Every message the bot decides to answer goes through
//! [`ProviderRouter::handle`]:
//!
//! 1. per-user and per-guild sliding-window rate limiting ([`limiter`]),
//! 2. a response cache with per-entry TTL and LRU eviction ([`cache`]),
//! 3. single-flight coalescing of identical concurrent misses,
//! 4. HTTP providers with timeout, backoff retry and ordered fallback
//!    ([`providers`]).
//!
//! # Example
//!
//! ```rust,no_run
//! use genie::{GenerationRequest, ProviderConfig, RouterBuilder};
//!
//! #[tokio::main]
//! async fn main() -> genie::Result<()> {
//!     let router = RouterBuilder::new()
//!         .http_provider(ProviderConfig::new(
//!             "local",
//!             "http://localhost:1234/v1/chat/completions",
//!         ))
//!         .build()?;
//!     router.start();
//!
//!     let result = router
//!         .handle(GenerationRequest::new("tomato, chicken, rice", "user-42").guild("guild-7"))
//!         .await;
//!     match result.text() {
//!         Some(recipe) => println!("{recipe}"),
//!         None => {
//!             let kind = result.error_kind().expect("failed results carry a kind");
//!             println!("{}", kind.user_message());
//!         }
//!     }
//!
//!     router.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod limiter;
pub mod providers;
pub mod telemetry;
pub mod types;

/// Crate version, for CLI `--version` output.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-export main types at crate root
pub use cache::{CacheConfig, CacheStats, Fingerprint, ResponseCache};
pub use config::{Config, Secrets};
pub use error::{ErrorKind, GenieError, Result};
pub use gateway::{ProviderRouter, RouterBuilder};
pub use limiter::{Admission, AdmissionControl, RateLimitConfig, RateLimiter, ScopeStatus};
pub use providers::{
    DialectKind, GenerationParams, HealthState, HttpProvider, Provider, ProviderConfig,
    ProviderHealth, RetryConfig, RetryingProvider,
};
pub use types::{
    Completion, GenerationRequest, GenerationResult, Message, Role, Usage, normalize_language,
};
