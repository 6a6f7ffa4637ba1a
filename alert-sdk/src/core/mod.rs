//! Core abstractions for the Alert SDK
//!
//! - `ServiceClient`: identity and health of every client
//! - `RequestExecutor`: typed JSON requests against a REST API
//! - `AuthenticatedClient`: how a client authenticates
//! - `MetricsSource`, `Reasoner`, `CodebaseQa`: the seams flows and tools
//!   depend on, so tests can substitute their own implementations
//! - `ClientBuilder`: builds the HTTP client and retry executor

pub mod builder;
pub use builder::{AuthScheme, ClientBuilder};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{Result, ServiceError};
use crate::services::anthropic::{MessagesRequest, MessagesResponse};
use crate::services::sentry::{DiscoverQuery, EventRow};

/// Base trait for all service clients
#[async_trait]
pub trait ServiceClient: Send + Sync {
    /// The client name/identifier
    fn name(&self) -> &str;

    /// The base URL for the service
    fn base_url(&self) -> &str;

    /// Cheap reachability check
    async fn health_check(&self) -> Result<bool>;
}

/// Trait responsible for executing typed JSON requests
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    /// Execute a GET request
    async fn get<R>(&self, endpoint: &str, query: &[(String, String)]) -> Result<R>
    where
        R: DeserializeOwned + Send;

    /// Execute a POST request
    async fn post<T, R>(&self, endpoint: &str, body: &T) -> Result<R>
    where
        T: Serialize + Send + Sync,
        R: DeserializeOwned + Send;

    /// Execute a PUT request
    async fn put<T, R>(&self, endpoint: &str, body: &T) -> Result<R>
    where
        T: Serialize + Send + Sync,
        R: DeserializeOwned + Send;
}

/// Trait for clients that carry credentials
pub trait AuthenticatedClient: Send + Sync {
    /// Authentication type (e.g., "Bearer", "ApiKey")
    fn auth_type(&self) -> &str;

    /// Check if client has credentials configured
    fn is_authenticated(&self) -> bool;
}

/// Source of per-transaction production metrics
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Run one Discover query and return its rows
    async fn discover(&self, query: &DiscoverQuery) -> Result<Vec<EventRow>>;
}

/// Hosted language model reachable through the Messages API
#[async_trait]
pub trait Reasoner: Send + Sync {
    /// Model identifier used for requests
    fn model(&self) -> &str;

    /// Default token budget for single-shot analysis
    fn max_tokens(&self) -> u32 {
        2000
    }

    /// Send one Messages request
    async fn create_message(&self, request: &MessagesRequest) -> Result<MessagesResponse>;

    /// Single user prompt in, concatenated text out
    async fn analyze(&self, prompt: &str, temperature: f32) -> Result<String> {
        let request = MessagesRequest::from_prompt(self.model(), self.max_tokens(), prompt)
            .with_temperature(temperature);
        let response = self.create_message(&request).await?;
        let text = response.text();
        if text.trim().is_empty() {
            return Err(ServiceError::parsing("Model returned no text content"));
        }
        Ok(text)
    }
}

/// Remote question answering over a code repository
#[async_trait]
pub trait CodebaseQa: Send + Sync {
    /// Repository identifier questions are asked against (`owner/repo`)
    fn repository(&self) -> &str;

    /// Ask one natural-language question and return the raw answer
    async fn ask_question(&self, question: &str) -> Result<String>;
}
