//! Client builder implementation
//!
//! Provides one builder for the `reqwest` client and retry executor shared by
//! the Sentry, Anthropic and DeepWiki clients.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client as ReqwestClient;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, ServiceError};
use crate::resilience::{RetryConfig, RetryExecutor};
use crate::services::UserAgent;

/// How credentials are attached to every request
#[derive(Debug, Clone)]
pub enum AuthScheme {
    /// `Authorization: Bearer <token>`
    Bearer(String),
    /// A named header carrying the raw key, e.g. `x-api-key`
    Header { name: String, value: String },
}

/// Unified client builder for all service clients
pub struct ClientBuilder {
    auth: Option<AuthScheme>,

    /// Custom headers to include with all requests
    custom_headers: HashMap<String, String>,

    /// Request timeout; `None` leaves the client unbounded (streaming)
    timeout: Option<Duration>,

    retry_config: RetryConfig,

    user_agent: UserAgent,

    compression: bool,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            auth: None,
            custom_headers: HashMap::new(),
            timeout: Some(Duration::from_secs(crate::config::DEFAULT_TIMEOUT_SECONDS)),
            retry_config: RetryConfig::default(),
            user_agent: UserAgent::default(),
            compression: true,
        }
    }
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bearer_auth(mut self, token: impl Into<String>) -> Self {
        self.auth = Some(AuthScheme::Bearer(token.into()));
        self
    }

    pub fn header_auth(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.auth = Some(AuthScheme::Header {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// Add a custom header
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_headers.insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Disable the per-request timeout (used for long-lived SSE streams)
    pub fn no_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    pub fn retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    pub fn user_agent(mut self, user_agent: UserAgent) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    /// Build an HTTP client with the configured settings
    pub fn build_http_client(&self) -> Result<ReqwestClient> {
        let mut builder = ReqwestClient::builder()
            .user_agent(self.user_agent.to_string())
            .gzip(self.compression);

        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        let mut headers = HeaderMap::new();
        for (key, value) in &self.custom_headers {
            headers.insert(parse_header_name(key)?, parse_header_value(value)?);
        }

        match &self.auth {
            Some(AuthScheme::Bearer(token)) => {
                let mut value = parse_header_value(&format!("Bearer {}", token))?;
                value.set_sensitive(true);
                headers.insert(reqwest::header::AUTHORIZATION, value);
            }
            Some(AuthScheme::Header { name, value }) => {
                let mut value = parse_header_value(value)?;
                value.set_sensitive(true);
                headers.insert(parse_header_name(name)?, value);
            }
            None => {}
        }

        builder
            .default_headers(headers)
            .build()
            .map_err(|e| ServiceError::configuration(format!("Failed to build HTTP client: {}", e)))
    }

    /// Build the retry executor with the configured policy
    pub fn build_retry(&self) -> RetryExecutor {
        RetryExecutor::new(self.retry_config.clone())
    }
}

fn parse_header_name(name: &str) -> Result<HeaderName> {
    HeaderName::from_str(name)
        .map_err(|e| ServiceError::configuration(format!("Invalid header name {}: {}", name, e)))
}

fn parse_header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| ServiceError::configuration(format!("Invalid header value: {}", e)))
}
