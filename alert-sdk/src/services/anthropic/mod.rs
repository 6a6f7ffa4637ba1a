//! Anthropic Messages API client implementation

mod models;
pub use models::*;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::debug;
use reqwest::Client;

use crate::config::{AnthropicConfig, ServiceConfig};
use crate::core::{AuthenticatedClient, ClientBuilder, Reasoner, ServiceClient};
use crate::error::Result;
use crate::resilience::{RetryConfig, RetryExecutor};
use crate::services::common::{new_request_id, read_json};
use crate::services::UserAgent;

const MESSAGES_ENDPOINT: &str = "v1/messages";

/// Anthropic API client
pub struct AnthropicClient {
    http_client: Client,
    config: AnthropicConfig,
    retry: RetryExecutor,
}

impl AnthropicClient {
    /// Create a new Anthropic client
    pub fn new(config: AnthropicConfig) -> Result<Self> {
        config.validate()?;

        let builder = ClientBuilder::new()
            .header_auth("x-api-key", config.api_key.clone())
            .header("anthropic-version", config.api_version.clone())
            .timeout(Duration::from_secs(config.timeout_seconds))
            .retry_config(RetryConfig::default().with_max_retries(config.max_retries))
            .user_agent(UserAgent::for_client("anthropic"));

        Ok(Self {
            http_client: builder.build_http_client()?,
            retry: builder.build_retry(),
            config,
        })
    }

    pub fn config(&self) -> &AnthropicConfig {
        &self.config
    }

    async fn send_once(&self, request: &MessagesRequest) -> Result<MessagesResponse> {
        let request_id = new_request_id();
        let url = format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            MESSAGES_ENDPOINT
        );
        debug!(
            "Anthropic request {} ({} messages, {} tools, {})",
            request.model,
            request.messages.len(),
            request.tools.len(),
            request_id
        );

        let started = Instant::now();
        let response = self.http_client.post(&url).json(request).send().await?;
        let parsed: MessagesResponse =
            read_json("anthropic", MESSAGES_ENDPOINT, &request_id, response).await?;

        debug!(
            "Anthropic responded in {:?}: stop_reason={:?}, tokens in/out {}/{}",
            started.elapsed(),
            parsed.stop_reason,
            parsed.usage.input_tokens,
            parsed.usage.output_tokens
        );
        Ok(parsed)
    }
}

#[async_trait]
impl Reasoner for AnthropicClient {
    fn model(&self) -> &str {
        &self.config.model
    }

    fn max_tokens(&self) -> u32 {
        self.config.max_tokens
    }

    async fn create_message(&self, request: &MessagesRequest) -> Result<MessagesResponse> {
        self.retry.execute(move || self.send_once(request)).await
    }
}

#[async_trait]
impl ServiceClient for AnthropicClient {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn base_url(&self) -> &str {
        &self.config.base_url
    }

    async fn health_check(&self) -> Result<bool> {
        let request = MessagesRequest::from_prompt(self.model(), 1, "ping");
        match self.send_once(&request).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                log::warn!("Anthropic health check failed: {}", e);
                Ok(false)
            }
        }
    }
}

impl AuthenticatedClient for AnthropicClient {
    fn auth_type(&self) -> &str {
        "ApiKey"
    }

    fn is_authenticated(&self) -> bool {
        !self.config.api_key.is_empty()
    }
}
