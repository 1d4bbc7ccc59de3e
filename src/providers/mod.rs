//! Generation providers.
//!
//! - [`Provider`]: the one trait the router talks to.
//! - [`HttpProvider`]: an HTTP endpoint speaking one [`Dialect`].
//! - [`RetryingProvider`]: decorator adding backoff retries on transient errors.
//! - [`ProviderStats`] / [`ProviderHealth`]: counters for the admin surface.

pub mod dialect;
pub mod health;
pub mod http;
pub mod retry;
pub mod traits;

pub use dialect::{ChatDialect, CompletionDialect, Dialect, DialectKind, Extracted};
pub use health::{HealthState, ProviderHealth, ProviderLatency, ProviderStats};
pub use http::{DEFAULT_ENDPOINT, HttpProvider, ProviderConfig};
pub use retry::{RetryConfig, RetryingProvider};
pub use traits::{GenerationParams, Provider};
