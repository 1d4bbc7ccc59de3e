//! HTTP provider for OpenAI-compatible and plain completion endpoints.
//!
//! One [`HttpProvider`] talks to one endpoint: a local model server
//! (LM Studio, Ollama, llama.cpp) or a hosted proxy such as OpenRouter.
//! The request/response shape comes from its [`Dialect`]; this module only
//! handles transport, the hard timeout, and status classification.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, HeaderName, HeaderValue, RETRY_AFTER};
use tracing::{debug, instrument};

use super::dialect::{Dialect, DialectKind};
use super::retry::RetryConfig;
use super::traits::{GenerationParams, Provider};
use crate::types::{Completion, normalize_language};
use crate::{GenieError, Result};

/// Default endpoint: a local OpenAI-compatible server.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:1234/v1/chat/completions";

/// Upstream error bodies are cut to this many characters before logging.
const MAX_ERROR_BODY: usize = 200;

/// Static settings of one provider. Immutable once the provider is built.
///
/// ```rust
/// # use genie::ProviderConfig;
/// # use std::time::Duration;
/// let config = ProviderConfig::new("openrouter", "https://openrouter.ai/api/v1/chat/completions")
///     .model("meta-llama/llama-3.1-8b-instruct")
///     .api_key("sk-or-...")
///     .timeout(Duration::from_secs(20))
///     .header("X-Title", "Recipe Genie Bot");
/// ```
#[derive(Clone, PartialEq)]
pub struct ProviderConfig {
    /// Stable identity used for routing, logs and cache keys.
    pub name: String,
    pub dialect: DialectKind,
    pub endpoint: String,
    /// Sent as a bearer token when set.
    pub api_key: Option<String>,
    pub params: GenerationParams,
    /// Hard limit on one attempt, from connect to the last response byte.
    pub timeout: Duration,
    pub retry: RetryConfig,
    /// Prepended as a system message (chat) or prefix (completion).
    pub system_prompt: Option<String>,
    /// Per-language replacements for `system_prompt`, keyed by normalized
    /// language code.
    pub localized_prompts: BTreeMap<String, String>,
    /// Extra static headers sent with every request.
    pub headers: BTreeMap<String, String>,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dialect: DialectKind::Chat,
            endpoint: endpoint.into(),
            api_key: None,
            params: GenerationParams::default(),
            timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            system_prompt: None,
            localized_prompts: BTreeMap::new(),
            headers: BTreeMap::new(),
        }
    }

    pub fn dialect(mut self, dialect: DialectKind) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.params.model = Some(model.into());
        self
    }

    pub fn max_tokens(mut self, n: u32) -> Self {
        self.params.max_tokens = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.params.temperature = t;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Use `prompt` instead of the default system prompt for `language`.
    pub fn localized_prompt(mut self, language: &str, prompt: impl Into<String>) -> Self {
        let key = normalize_language(language).unwrap_or_default();
        self.localized_prompts.insert(key, prompt.into());
        self
    }

    /// System prompt for a request in `language`, falling back to the default.
    pub fn system_prompt_for(&self, language: Option<&str>) -> Option<&str> {
        language
            .and_then(normalize_language)
            .and_then(|code| self.localized_prompts.get(&code))
            .or(self.system_prompt.as_ref())
            .map(String::as_str)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Startup validation. Errors name the provider but never the key.
    pub fn validate(&self) -> Result<()> {
        let fail = |what: &str| Err(GenieError::Config(format!("provider '{}': {what}", self.name)));
        if self.name.trim().is_empty() {
            return Err(GenieError::Config("provider name must not be empty".into()));
        }
        if self.endpoint.trim().is_empty() {
            return fail("endpoint must not be empty");
        }
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return fail("endpoint must be an http(s) URL");
        }
        if self.timeout.is_zero() {
            return fail("timeout must be positive");
        }
        if self.params.max_tokens == 0 {
            return fail("max_tokens must be positive");
        }
        if !(0.0..=2.0).contains(&self.params.temperature) {
            return fail("temperature must be between 0.0 and 2.0");
        }
        for code in self.localized_prompts.keys() {
            if normalize_language(code).as_deref() != Some(code.as_str()) {
                return fail(&format!("invalid language code '{code}'"));
            }
        }
        if self.retry.initial_delay > self.retry.max_delay {
            return fail("retry backoff must not exceed max backoff");
        }
        for (name, value) in &self.headers {
            if HeaderName::from_bytes(name.as_bytes()).is_err()
                || HeaderValue::from_str(value).is_err()
            {
                return fail(&format!("invalid header '{name}'"));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("dialect", &self.dialect)
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("params", &self.params)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("system_prompt", &self.system_prompt.is_some())
            .field("languages", &self.localized_prompts.keys().collect::<Vec<_>>())
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Provider backed by one HTTP endpoint. Does not retry by itself; wrap it
/// in a [`RetryingProvider`](super::RetryingProvider) for that.
pub struct HttpProvider {
    config: ProviderConfig,
    dialect: Box<dyn Dialect>,
    http: Client,
}

impl HttpProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| GenieError::Config(format!("failed to build HTTP client: {e}")))?;
        Self::with_http_client(config, http)
    }

    /// Create a provider sharing an existing connection pool.
    pub fn with_http_client(config: ProviderConfig, http: Client) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            dialect: config.dialect.dialect(),
            config,
            http,
        })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn call(&self, prompt: &str, language: Option<&str>) -> Result<Completion> {
        let body = self.dialect.build_body(
            prompt,
            &self.config.params,
            self.config.system_prompt_for(language),
        );

        let mut request = self.http.post(&self.config.endpoint).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.header(AUTHORIZATION, format!("Bearer {key}"));
        }
        for (name, value) in &self.config.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let text = response.text().await.unwrap_or_default();
            let message: String = text.chars().take(MAX_ERROR_BODY).collect();
            debug!(provider = %self.config.name, status = status.as_u16(), "upstream error");
            return Err(GenieError::from_status(status.as_u16(), message, retry_after));
        }

        let raw = response.bytes().await?;
        let extracted = self.dialect.extract(&raw)?;
        Ok(Completion {
            text: extracted.text,
            provider: self.config.name.clone(),
            model: extracted.model.or_else(|| self.config.params.model.clone()),
            usage: extracted.usage,
        })
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn params(&self) -> GenerationParams {
        self.config.params.clone()
    }

    #[instrument(
        skip_all,
        fields(
            provider = %self.config.name,
            dialect = self.dialect.name(),
            language = language.unwrap_or("-"),
        )
    )]
    async fn generate(&self, prompt: &str, language: Option<&str>) -> Result<Completion> {
        match tokio::time::timeout(self.config.timeout, self.call(prompt, language)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(GenieError::Timeout),
        }
    }
}
