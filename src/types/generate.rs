//! Request and result types for the router façade.

use std::time::Duration;

use crate::error::{ErrorKind, GenieError};

/// One user message that the chat glue decided should produce a recipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Rate-limit scope of the author.
    pub user_scope: String,
    /// Rate-limit scope of the guild the message came from. `None` for
    /// direct messages, which skip the guild dimension.
    pub guild_scope: Option<String>,
    /// Provider to try first. Unknown names are ignored and the configured
    /// priority order is used.
    pub requested_provider: Option<String>,
    /// Language the recipe should be written in (`"en"`, `"es"`, ...).
    /// Selects the provider's localized instructions and is part of the
    /// cache key. `None` uses each provider's default instructions.
    pub language: Option<String>,
}

impl GenerationRequest {
    /// Create a request for a user with no guild and no provider override.
    pub fn new(prompt: impl Into<String>, user_scope: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            user_scope: user_scope.into(),
            guild_scope: None,
            requested_provider: None,
            language: None,
        }
    }

    /// Set the guild scope.
    pub fn guild(mut self, guild_scope: impl Into<String>) -> Self {
        self.guild_scope = Some(guild_scope.into());
        self
    }

    /// Ask for a specific provider.
    pub fn provider(mut self, name: impl Into<String>) -> Self {
        self.requested_provider = Some(name.into());
        self
    }

    /// Set the response language. Blank codes are treated as unset.
    pub fn language(mut self, code: &str) -> Self {
        self.language = normalize_language(code);
        self
    }
}

/// Canonical form of a language code: trimmed, lower-cased and without
/// control characters. `None` if nothing is left.
pub fn normalize_language(code: &str) -> Option<String> {
    let code: String = code
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .flat_map(char::to_lowercase)
        .collect();
    (!code.is_empty()).then_some(code)
}

/// Outcome of [`ProviderRouter::handle`](crate::ProviderRouter::handle).
///
/// Errors never escape the router as `Err`; they are carried in `outcome`.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    pub outcome: Result<String, GenieError>,
    /// Provider whose text was returned (or which failed last).
    pub provider_used: Option<String>,
    pub latency: Duration,
    /// Served from the response cache.
    pub cached: bool,
    /// Served by waiting on another request's in-flight provider call.
    pub coalesced: bool,
}

impl GenerationResult {
    pub(crate) fn denied(retry_after: Duration) -> Self {
        Self {
            outcome: Err(GenieError::Denied { retry_after }),
            provider_used: None,
            latency: Duration::ZERO,
            cached: false,
            coalesced: false,
        }
    }

    pub(crate) fn with_coalesced(mut self, coalesced: bool) -> Self {
        self.coalesced = coalesced;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Generated text, if the request succeeded.
    pub fn text(&self) -> Option<&str> {
        self.outcome.as_deref().ok()
    }

    pub fn error(&self) -> Option<&GenieError> {
        self.outcome.as_ref().err()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error().map(GenieError::kind)
    }

    /// Wait suggested to the user after a denial.
    pub fn retry_after(&self) -> Option<Duration> {
        self.error().and_then(GenieError::retry_after)
    }
}
