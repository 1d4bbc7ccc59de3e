//! Configuration loading.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. Explicit path (e.g. `genie --config <path>`)
//! 2. `~/.genie/config.toml` (user)
//! 3. `/etc/genie/config.toml` (system)
//!
//! Secrets are loaded separately with mandatory permission checks:
//! 1. `~/.genie/secrets.toml` (user, must be 0600)
//! 2. `/etc/genie/secrets.toml` (system, must be 0600)
//!
//! A provider without a key in the secrets file falls back to the
//! `<NAME>_API_KEY` environment variable (`openrouter` → `OPENROUTER_API_KEY`).
//!
//! ```toml
//! [cache]
//! ttl_secs = 3600
//! max_bytes = 16777216
//!
//! [rate_limit.user]
//! limit = 5
//! window_secs = 60
//! burst_limit = 3
//!
//! [[providers]]
//! name = "local"
//! endpoint = "http://localhost:1234/v1/chat/completions"
//!
//! [[providers]]
//! name = "openrouter"
//! endpoint = "https://openrouter.ai/api/v1/chat/completions"
//! model = "meta-llama/llama-3.1-8b-instruct"
//! system_prompt = "You are an expert culinary assistant."
//! system_prompts = { es = "Eres un asistente culinario experto." }
//! headers = { "HTTP-Referer" = "https://recipe-genie-bot.com", "X-Title" = "Recipe Genie Bot" }
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::cache::{CacheConfig, validate_sweep_interval};
use crate::limiter::RateLimitConfig;
use crate::providers::{DEFAULT_ENDPOINT, DialectKind, GenerationParams, ProviderConfig, RetryConfig};
use crate::types::normalize_language;
use crate::{GenieError, Result};

/// Whole-process configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub rate_limit: RateLimitSection,
    #[serde(default)]
    pub router: RouterSection,
    /// Providers in fallback priority order.
    #[serde(default)]
    pub providers: Vec<ProviderEntry>,
}

/// `[cache]`
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
    #[serde(default = "default_sweep_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            max_bytes: default_max_bytes(),
            sweep_interval_secs: default_sweep_secs(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    3600
}

fn default_max_bytes() -> u64 {
    16 * 1024 * 1024
}

fn default_sweep_secs() -> u64 {
    300
}

/// `[rate_limit]`
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSection {
    #[serde(default = "LimitEntry::user_default")]
    pub user: LimitEntry,
    #[serde(default = "LimitEntry::guild_default")]
    pub guild: LimitEntry,
    #[serde(default = "default_sweep_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            user: LimitEntry::user_default(),
            guild: LimitEntry::guild_default(),
            sweep_interval_secs: default_sweep_secs(),
        }
    }
}

/// `[rate_limit.user]` / `[rate_limit.guild]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LimitEntry {
    pub limit: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Defaults to `limit` (no extra burst cap).
    #[serde(default)]
    pub burst_limit: Option<u32>,
}

fn default_window_secs() -> u64 {
    60
}

impl LimitEntry {
    fn user_default() -> Self {
        Self {
            limit: 5,
            window_secs: 60,
            burst_limit: Some(3),
        }
    }

    fn guild_default() -> Self {
        Self {
            limit: 30,
            window_secs: 60,
            burst_limit: Some(10),
        }
    }

    pub fn to_config(&self) -> RateLimitConfig {
        RateLimitConfig::new(self.limit, Duration::from_secs(self.window_secs))
            .burst_limit(self.burst_limit.unwrap_or(self.limit))
    }
}

/// `[router]`
#[derive(Debug, Clone, Deserialize)]
pub struct RouterSection {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            max_concurrent_requests: default_max_concurrent(),
        }
    }
}

fn default_max_concurrent() -> usize {
    10
}

/// One `[[providers]]` entry.
#[derive(Clone, Deserialize)]
pub struct ProviderEntry {
    pub name: String,
    #[serde(default)]
    pub dialect: DialectKind,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Per-language system prompts, e.g. `{ es = "Eres un asistente culinario..." }`.
    #[serde(default)]
    pub system_prompts: BTreeMap<String, String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Filled from [`Secrets`] by [`Config::apply_secrets`], never from the config file.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl std::fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderEntry")
            .field("name", &self.name)
            .field("dialect", &self.dialect)
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_tokens() -> u32 {
    500
}

fn default_temperature() -> f32 {
    0.7
}

fn default_retry_count() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

impl ProviderEntry {
    pub fn to_config(&self) -> ProviderConfig {
        ProviderConfig {
            name: self.name.clone(),
            dialect: self.dialect,
            endpoint: self.endpoint.clone(),
            api_key: self.api_key.clone(),
            params: GenerationParams {
                model: self.model.clone(),
                max_tokens: self.max_tokens,
                temperature: self.temperature,
            },
            timeout: Duration::from_secs(self.timeout_secs),
            retry: RetryConfig::new()
                .max_retries(self.retry_count)
                .initial_delay(Duration::from_millis(self.retry_backoff_ms))
                .max_delay(Duration::from_millis(self.max_backoff_ms)),
            system_prompt: self.system_prompt.clone(),
            localized_prompts: self
                .system_prompts
                .iter()
                .map(|(code, prompt)| {
                    let code = normalize_language(code).unwrap_or_default();
                    (code, prompt.clone())
                })
                .collect(),
            headers: self.headers.clone(),
        }
    }
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided)
    /// 2. `~/.genie/config.toml`
    /// 3. `/etc/genie/config.toml`
    ///
    /// The result is parsed but not yet validated; call
    /// [`validate`](Self::validate) once secrets are applied.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_config_path(explicit_path)?;
        Self::load_from_file(&path)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            GenieError::Config(format!("Failed to read config file {path:?}: {e}"))
        })?;
        Self::parse(&content)
            .map_err(|e| GenieError::Config(format!("Failed to parse config file {path:?}: {e}")))
    }

    /// Parse a TOML document.
    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Resolve the config file path.
    fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(path.to_path_buf());
            }
            return Err(GenieError::Config(format!("Config file not found: {path:?}")));
        }

        // User config
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".genie").join("config.toml");
            if user_config.exists() {
                return Ok(user_config);
            }
        }

        // System config
        let system_config = PathBuf::from("/etc/genie/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }

        Err(GenieError::Config(
            "No config file found. Create ~/.genie/config.toml or /etc/genie/config.toml"
                .to_string(),
        ))
    }

    /// Fill each provider's API key from `secrets`, or its env var.
    pub fn apply_secrets(&mut self, secrets: &Secrets) {
        for provider in &mut self.providers {
            provider.api_key = secrets.api_key(&provider.name);
        }
    }

    /// Reject anything that could only fail later, at request time.
    pub fn validate(&self) -> Result<()> {
        if self.providers.is_empty() {
            return Err(GenieError::Config("at least one provider is required".into()));
        }
        let mut seen = HashSet::new();
        for provider in &self.providers {
            if !seen.insert(provider.name.as_str()) {
                return Err(GenieError::Config(format!(
                    "duplicate provider name '{}'",
                    provider.name
                )));
            }
            provider.to_config().validate()?;
        }
        self.cache_config().validate()?;
        self.rate_limit.user.to_config().validate()?;
        self.rate_limit.guild.to_config().validate()?;
        validate_sweep_interval(
            "rate limit",
            Duration::from_secs(self.rate_limit.sweep_interval_secs),
        )?;
        if self.router.max_concurrent_requests == 0 {
            return Err(GenieError::Config(
                "max_concurrent_requests must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new()
            .max_bytes(self.cache.max_bytes)
            .ttl(Duration::from_secs(self.cache.ttl_secs))
            .sweep_interval(Duration::from_secs(self.cache.sweep_interval_secs))
    }

    /// Provider configs in priority order.
    pub fn provider_configs(&self) -> Vec<ProviderConfig> {
        self.providers.iter().map(ProviderEntry::to_config).collect()
    }
}

/// API keys per provider name.
///
/// ```toml
/// [openrouter]
/// api_key = "sk-or-..."
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct Secrets {
    providers: HashMap<String, ApiKeySecret>,
}

/// A single API key secret.
#[derive(Clone, Deserialize)]
pub struct ApiKeySecret {
    pub api_key: String,
}

impl std::fmt::Debug for ApiKeySecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKeySecret(<redacted>)")
    }
}

impl Secrets {
    /// Load secrets from the standard locations with permission checks.
    ///
    /// Resolution order:
    /// 1. `~/.genie/secrets.toml` (if exists, must be 0600)
    /// 2. `/etc/genie/secrets.toml` (if exists, must be 0600)
    ///
    /// Returns empty secrets if no file exists (providers may use env vars).
    pub fn load() -> Result<Self> {
        // Try user secrets first
        if let Some(home) = dirs::home_dir() {
            let user_secrets = home.join(".genie").join("secrets.toml");
            if user_secrets.exists() {
                return Self::load_from_file(&user_secrets);
            }
        }

        // Try system secrets
        let system_secrets = PathBuf::from("/etc/genie/secrets.toml");
        if system_secrets.exists() {
            return Self::load_from_file(&system_secrets);
        }

        // No secrets file, providers can fall back to env vars
        Ok(Secrets::default())
    }

    /// Load one secrets file after checking its permissions.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        Self::check_permissions(path)?;
        let content = fs::read_to_string(path).map_err(|e| {
            GenieError::Config(format!("Failed to read secrets file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            GenieError::Config(format!("Failed to parse secrets file {path:?}: {e}"))
        })
    }

    /// Check that the secrets file has secure permissions (0600 or 0400).
    #[cfg(unix)]
    fn check_permissions(path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let metadata = fs::metadata(path).map_err(|e| {
            GenieError::Config(format!("Failed to stat secrets file {path:?}: {e}"))
        })?;

        let mode = metadata.permissions().mode();
        // Reject if group or other bits are set
        if mode & 0o077 != 0 {
            return Err(GenieError::Config(format!(
                "Secrets file {path:?} has insecure permissions {:o}. Must be 0600 or 0400.",
                mode & 0o777
            )));
        }

        Ok(())
    }

    #[cfg(not(unix))]
    fn check_permissions(_path: &Path) -> Result<()> {
        Ok(())
    }

    /// API key for a provider, falling back to `<NAME>_API_KEY`.
    pub fn api_key(&self, provider: &str) -> Option<String> {
        self.providers
            .get(provider)
            .map(|s| s.api_key.clone())
            .or_else(|| std::env::var(env_var_for(provider)).ok())
            .filter(|key| !key.trim().is_empty())
    }
}

/// Environment variable holding a provider's API key.
pub fn env_var_for(provider: &str) -> String {
    let name: String = provider
        .chars()
        .map(|c| match c {
            '-' | '.' | ' ' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect();
    format!("{name}_API_KEY")
}
