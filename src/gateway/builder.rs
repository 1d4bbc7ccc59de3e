//! Builder for [`ProviderRouter`] instances

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use super::router::{ProviderRouter, Shared, Slot};
use crate::cache::{CacheConfig, ResponseCache, validate_sweep_interval};
use crate::config::Config;
use crate::limiter::{AdmissionControl, RateLimitConfig};
use crate::providers::{HttpProvider, Provider, ProviderConfig, ProviderStats, RetryingProvider};
use crate::{GenieError, Result};

/// Default bound on concurrent outbound generations.
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 10;

/// A provider waiting to be built, kept in registration order.
enum Pending {
    Http(ProviderConfig),
    Custom(Arc<dyn Provider>),
}

/// Builder for configuring a [`ProviderRouter`].
///
/// Providers are tried in the order they are added.
///
/// ```rust,no_run
/// # use genie::{RouterBuilder, ProviderConfig, RateLimitConfig};
/// # use std::time::Duration;
/// # fn main() -> genie::Result<()> {
/// let router = RouterBuilder::new()
///     .http_provider(ProviderConfig::new("local", "http://localhost:1234/v1/chat/completions"))
///     .http_provider(
///         ProviderConfig::new("openrouter", "https://openrouter.ai/api/v1/chat/completions")
///             .api_key("sk-or-..."),
///     )
///     .user_limit(RateLimitConfig::new(5, Duration::from_secs(60)).burst_limit(3))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RouterBuilder {
    providers: Vec<Pending>,
    cache: CacheConfig,
    user_limit: RateLimitConfig,
    guild_limit: RateLimitConfig,
    limiter_sweep_interval: Duration,
    max_concurrent_requests: usize,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            cache: CacheConfig::default(),
            user_limit: RateLimitConfig::default(),
            guild_limit: RateLimitConfig::new(30, Duration::from_secs(60)).burst_limit(10),
            limiter_sweep_interval: Duration::from_secs(300),
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
        }
    }

    /// Start from a loaded [`Config`]. Providers keep their file order.
    pub fn from_config(config: &Config) -> Self {
        let mut builder = Self::new()
            .cache(config.cache_config())
            .user_limit(config.rate_limit.user.to_config())
            .guild_limit(config.rate_limit.guild.to_config())
            .limiter_sweep_interval(Duration::from_secs(config.rate_limit.sweep_interval_secs))
            .max_concurrent_requests(config.router.max_concurrent_requests);
        for provider in config.provider_configs() {
            builder = builder.http_provider(provider);
        }
        builder
    }

    /// Add an HTTP provider (appended = lowest priority so far).
    ///
    /// Wrapped in a [`RetryingProvider`] unless its retry config is disabled.
    pub fn http_provider(mut self, config: ProviderConfig) -> Self {
        self.providers.push(Pending::Http(config));
        self
    }

    /// Add an already-built provider as-is, without retry wrapping.
    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.providers.push(Pending::Custom(provider));
        self
    }

    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.cache = config;
        self
    }

    pub fn user_limit(mut self, config: RateLimitConfig) -> Self {
        self.user_limit = config;
        self
    }

    pub fn guild_limit(mut self, config: RateLimitConfig) -> Self {
        self.guild_limit = config;
        self
    }

    pub fn limiter_sweep_interval(mut self, interval: Duration) -> Self {
        self.limiter_sweep_interval = interval;
        self
    }

    pub fn max_concurrent_requests(mut self, n: usize) -> Self {
        self.max_concurrent_requests = n;
        self
    }

    /// Validate everything and build the router.
    ///
    /// Any invalid setting is a [`GenieError::Config`]; nothing is left to
    /// fail at request time.
    pub fn build(self) -> Result<ProviderRouter> {
        if self.providers.is_empty() {
            return Err(GenieError::Config("at least one provider is required".into()));
        }
        if self.max_concurrent_requests == 0 {
            return Err(GenieError::Config(
                "max_concurrent_requests must be positive".into(),
            ));
        }
        validate_sweep_interval("rate limit", self.limiter_sweep_interval)?;
        self.cache.validate()?;
        let admission = AdmissionControl::new(self.user_limit, self.guild_limit)?;

        // One connection pool for every HTTP provider.
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| GenieError::Config(format!("failed to build HTTP client: {e}")))?;

        let mut seen = HashSet::new();
        let mut slots = Vec::with_capacity(self.providers.len());
        for pending in self.providers {
            let provider: Arc<dyn Provider> = match pending {
                Pending::Http(config) => {
                    let retry = config.retry.clone();
                    let provider: Arc<dyn Provider> =
                        Arc::new(HttpProvider::with_http_client(config, http.clone())?);
                    if retry.max_retries > 0 {
                        Arc::new(RetryingProvider::new(provider, retry))
                    } else {
                        provider
                    }
                }
                Pending::Custom(provider) => provider,
            };
            if !seen.insert(provider.name().to_owned()) {
                return Err(GenieError::Config(format!(
                    "duplicate provider name '{}'",
                    provider.name()
                )));
            }
            slots.push(Slot {
                provider,
                stats: ProviderStats::new(),
            });
        }

        let shared = Shared {
            admission,
            cache: ResponseCache::new(&self.cache),
            cache_sweep_interval: self.cache.sweep_interval,
            limiter_sweep_interval: self.limiter_sweep_interval,
        };
        Ok(ProviderRouter::new(
            shared,
            slots,
            self.max_concurrent_requests,
        ))
    }
}

impl Default for RouterBuilder {
    fn default() -> Self {
        Self::new()
    }
}
