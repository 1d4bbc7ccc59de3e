//! Provider trait.
//!
//! A provider turns one prompt into one [`Completion`]. Implementations own
//! their transport, timeout and response parsing; retry is layered on top
//! by [`RetryingProvider`](super::RetryingProvider) and fallback by the
//! router.
//!
//! # Error contract
//!
//! - Transient failures (`Timeout`, `Connection`, `Upstream`, `RateLimited`)
//!   make the router move on to the next provider once retries are spent.
//! - Everything else (`Invalid`, `Auth`, `MalformedResponse`) ends the
//!   request immediately.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::types::Completion;

/// Generation parameters a provider sends with every request.
///
/// They are part of the response cache key: two providers (or two configs
/// of the same endpoint) with different parameters never share entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Model name sent upstream. `None` lets the endpoint pick its default.
    pub model: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            model: None,
            max_tokens: 500,
            temperature: 0.7,
        }
    }
}

/// A backend able to generate recipe text.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable provider identity, used for routing, logs and cache keys.
    fn name(&self) -> &str;

    /// Parameters this provider generates with.
    fn params(&self) -> GenerationParams {
        GenerationParams::default()
    }

    /// Generate text for `prompt`.
    ///
    /// `language` picks localized instructions where the provider has them;
    /// providers without any ignore it.
    async fn generate(&self, prompt: &str, language: Option<&str>) -> Result<Completion>;
}
