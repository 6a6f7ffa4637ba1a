//! Configuration management for service clients
//!
//! Key/value providers (environment, memory, composite) plus the typed,
//! self-validating configuration of each external service.

use std::collections::HashMap;
use std::env;
use std::fmt::Debug;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServiceError};

/// Timeout applied to every external call unless overridden
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

/// Extra attempts for retryable failures unless overridden
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Base trait for configuration providers
pub trait ConfigProvider: Send + Sync {
    /// Get a string configuration value
    fn get_string(&self, key: &str) -> Result<String>;
}

/// Extension methods for configuration providers
pub trait ConfigProviderExt: ConfigProvider {
    /// Get an integer configuration value
    fn get_int(&self, key: &str) -> Result<i64> {
        let value = self.get_string(key)?;
        value.trim().parse::<i64>().map_err(|e| {
            ServiceError::configuration(format!("Invalid integer for key {}: {}", key, e))
        })
    }

    /// Get a boolean configuration value
    fn get_bool(&self, key: &str) -> Result<bool> {
        let value = self.get_string(key)?;
        match value.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" | "on" => Ok(true),
            "false" | "no" | "0" | "off" => Ok(false),
            _ => Err(ServiceError::configuration(format!(
                "Invalid boolean value for key {}: {}",
                key, value
            ))),
        }
    }

    /// Get a non-empty string value, or None when unset or blank
    fn get_optional(&self, key: &str) -> Option<String> {
        self.get_string(key)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn get_string_or(&self, key: &str, default: &str) -> String {
        self.get_optional(key).unwrap_or_else(|| default.to_string())
    }

    fn get_int_or(&self, key: &str, default: i64) -> i64 {
        self.get_int(key).unwrap_or(default)
    }

    fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get_bool(key).unwrap_or(default)
    }
}

impl<T: ConfigProvider + ?Sized> ConfigProviderExt for T {}

/// Environment variable based configuration provider
#[derive(Debug, Clone, Default)]
pub struct EnvConfigProvider {
    /// Optional prefix for environment variables
    prefix: Option<String>,
}

impl EnvConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a prefix for environment variables
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Format a configuration key as an environment variable
    fn format_key(&self, key: &str) -> String {
        let mut env_key = String::new();

        if let Some(ref prefix) = self.prefix {
            env_key.push_str(prefix);
            env_key.push('_');
        }

        env_key.push_str(&key.to_uppercase().replace(|c: char| !c.is_ascii_alphanumeric(), "_"));

        env_key
    }
}

impl ConfigProvider for EnvConfigProvider {
    fn get_string(&self, key: &str) -> Result<String> {
        let env_key = self.format_key(key);

        env::var(&env_key).map_err(|e| match e {
            env::VarError::NotPresent => {
                ServiceError::configuration(format!("Environment variable not set: {}", env_key))
            }
            env::VarError::NotUnicode(_) => ServiceError::configuration(format!(
                "Environment variable is not valid unicode: {}",
                env_key
            )),
        })
    }
}

/// In-memory config provider for tests and CLI overrides
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigProvider {
    values: HashMap<String, String>,
}

impl MemoryConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: ToString,
    {
        self.values.insert(key.into(), value.to_string());
    }
}

impl ConfigProvider for MemoryConfigProvider {
    fn get_string(&self, key: &str) -> Result<String> {
        self.values
            .get(key)
            .cloned()
            .ok_or_else(|| ServiceError::configuration(format!("Configuration key not found: {}", key)))
    }
}

/// A composite config provider that tries multiple providers in order
#[derive(Default)]
pub struct CompositeConfigProvider {
    providers: Vec<Box<dyn ConfigProvider>>,
}

impl CompositeConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider to the end of the chain
    pub fn add_provider(&mut self, provider: impl ConfigProvider + 'static) {
        self.providers.push(Box::new(provider));
    }
}

impl ConfigProvider for CompositeConfigProvider {
    fn get_string(&self, key: &str) -> Result<String> {
        self.providers
            .iter()
            .find_map(|provider| provider.get_string(key).ok())
            .ok_or_else(|| {
                ServiceError::configuration(format!(
                    "Configuration key not found in any provider: {}",
                    key
                ))
            })
    }
}

/// Global default configuration provider (plain environment variables)
pub static DEFAULT_PROVIDER: Lazy<Arc<EnvConfigProvider>> =
    Lazy::new(|| Arc::new(EnvConfigProvider::new()));

/// Trait for service-specific configuration
pub trait ServiceConfig: Debug + Send + Sync {
    /// Validate this configuration
    fn validate(&self) -> Result<()>;

    /// Service name
    fn service_name(&self) -> &str;
}

fn shared_timeout<P: ConfigProvider + ?Sized>(provider: &P) -> u64 {
    provider.get_int_or("sentralert_timeout_seconds", DEFAULT_TIMEOUT_SECONDS as i64).max(1) as u64
}

fn shared_retries<P: ConfigProvider + ?Sized>(provider: &P) -> u32 {
    provider.get_int_or("sentralert_max_retries", DEFAULT_MAX_RETRIES as i64).clamp(0, 3) as u32
}

/// Configuration for the Sentry API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentryConfig {
    /// Bearer token
    pub auth_token: String,

    /// Organization slug
    pub org_slug: String,

    /// Project slug (or numeric id), when queries should be scoped to one
    /// project. Discover gets the id, looked up by slug on first use.
    pub project: Option<String>,

    /// API base URL
    pub base_url: String,

    pub timeout_seconds: u64,

    pub max_retries: u32,
}

impl Default for SentryConfig {
    fn default() -> Self {
        Self {
            auth_token: String::new(),
            org_slug: String::new(),
            project: None,
            base_url: "https://sentry.io/api/0".to_string(),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl SentryConfig {
    /// Load configuration from a config provider
    pub fn from_provider<P: ConfigProvider + ?Sized>(provider: &P) -> Result<Self> {
        let config = Self {
            auth_token: provider.get_optional("sentry_auth_token").unwrap_or_default(),
            org_slug: provider.get_optional("sentry_org_slug").unwrap_or_default(),
            project: provider.get_optional("sentry_project"),
            base_url: provider.get_string_or("sentry_api", "https://sentry.io/api/0"),
            timeout_seconds: shared_timeout(provider),
            max_retries: shared_retries(provider),
        };

        config.validate()?;
        Ok(config)
    }
}

impl ServiceConfig for SentryConfig {
    fn validate(&self) -> Result<()> {
        if self.auth_token.is_empty() {
            return Err(ServiceError::configuration("SENTRY_AUTH_TOKEN is required"));
        }
        if self.org_slug.is_empty() {
            return Err(ServiceError::configuration("SENTRY_ORG_SLUG is required"));
        }
        if self.base_url.is_empty() {
            return Err(ServiceError::configuration("Sentry base URL is required"));
        }
        Ok(())
    }

    fn service_name(&self) -> &str {
        "sentry"
    }
}

/// Configuration for the Anthropic Messages API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    pub api_key: String,

    /// Model identifier sent with every request
    pub model: String,

    pub base_url: String,

    /// Value of the `anthropic-version` header
    pub api_version: String,

    /// Default `max_tokens` for single-shot analysis calls
    pub max_tokens: u32,

    pub timeout_seconds: u64,

    pub max_retries: u32,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "claude-haiku-4-5-20251001".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            api_version: "2023-06-01".to_string(),
            max_tokens: 2000,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl AnthropicConfig {
    pub fn from_provider<P: ConfigProvider + ?Sized>(provider: &P) -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            api_key: provider.get_optional("anthropic_api_key").unwrap_or_default(),
            model: provider.get_string_or("anthropic_model", &defaults.model),
            base_url: provider.get_string_or("anthropic_base_url", &defaults.base_url),
            api_version: defaults.api_version,
            max_tokens: provider.get_int_or("anthropic_max_tokens", defaults.max_tokens as i64).max(1)
                as u32,
            timeout_seconds: shared_timeout(provider),
            max_retries: shared_retries(provider),
        };

        config.validate()?;
        Ok(config)
    }
}

impl ServiceConfig for AnthropicConfig {
    fn validate(&self) -> Result<()> {
        if self.api_key.is_empty() {
            return Err(ServiceError::configuration("ANTHROPIC_API_KEY is required"));
        }
        if self.model.is_empty() {
            return Err(ServiceError::configuration("Anthropic model is required"));
        }
        Ok(())
    }

    fn service_name(&self) -> &str {
        "anthropic"
    }
}

/// Configuration for the DeepWiki MCP server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepWikiConfig {
    /// Repository page, e.g. `https://deepwiki.com/owner/repo`
    pub repo_url: String,

    /// SSE endpoint of the MCP server
    pub mcp_url: String,

    /// Budget for one session (connect, initialize, ask)
    pub timeout_seconds: u64,

    /// Fresh sessions opened after a retryable failure
    pub max_retries: u32,
}

impl Default for DeepWikiConfig {
    fn default() -> Self {
        Self {
            repo_url: "https://deepwiki.com/wuTims/sentralert-demo-service".to_string(),
            mcp_url: "https://mcp.deepwiki.com/sse".to_string(),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl DeepWikiConfig {
    pub fn from_provider<P: ConfigProvider + ?Sized>(provider: &P) -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            repo_url: provider.get_string_or("deepwiki_repo_url", &defaults.repo_url),
            mcp_url: provider.get_string_or("deepwiki_mcp_url", &defaults.mcp_url),
            timeout_seconds: shared_timeout(provider),
            max_retries: shared_retries(provider),
        };

        config.validate()?;
        Ok(config)
    }

    /// `owner/repo` as expected by the `ask_question` tool
    pub fn repository(&self) -> String {
        let trimmed = self.repo_url.trim().trim_end_matches('/');
        ["https://deepwiki.com/", "http://deepwiki.com/", "https://github.com/"]
            .iter()
            .find_map(|prefix| trimmed.strip_prefix(prefix))
            .unwrap_or(trimmed)
            .to_string()
    }
}

impl ServiceConfig for DeepWikiConfig {
    fn validate(&self) -> Result<()> {
        if self.repository().split('/').filter(|s| !s.is_empty()).count() != 2 {
            return Err(ServiceError::configuration(format!(
                "DEEPWIKI_REPO_URL must name an owner/repo pair: {}",
                self.repo_url
            )));
        }
        url::Url::parse(&self.mcp_url)?;
        Ok(())
    }

    fn service_name(&self) -> &str {
        "deepwiki"
    }
}
