//! Sentry API client implementation
//!
//! Covers the pieces of the Sentry REST API sentralert needs: Discover
//! queries for transaction/error metrics, project listing, and metric alert
//! rule management.

mod models;
pub use models::*;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, Method};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::OnceCell;

use crate::config::{SentryConfig, ServiceConfig};
use crate::core::{AuthenticatedClient, ClientBuilder, MetricsSource, RequestExecutor, ServiceClient};
use crate::error::{Result, ServiceError};
use crate::resilience::{RetryConfig, RetryExecutor};
use crate::services::common::{new_request_id, read_json};
use crate::services::UserAgent;

/// Sentry API client
pub struct SentryClient {
    http_client: Client,
    config: SentryConfig,
    retry: RetryExecutor,
    /// Numeric id of the configured project, looked up once
    project_id: OnceCell<String>,
}

impl SentryClient {
    /// Create a client from validated configuration
    pub fn new(config: SentryConfig) -> Result<Self> {
        config.validate()?;

        let builder = ClientBuilder::new()
            .bearer_auth(config.auth_token.clone())
            .timeout(Duration::from_secs(config.timeout_seconds))
            .retry_config(RetryConfig::default().with_max_retries(config.max_retries))
            .user_agent(UserAgent::for_client("sentry"));

        Ok(Self {
            http_client: builder.build_http_client()?,
            retry: builder.build_retry(),
            config,
            project_id: OnceCell::new(),
        })
    }

    pub fn config(&self) -> &SentryConfig {
        &self.config
    }

    /// Run a Discover query scoped to the configured organization
    pub async fn discover(&self, query: &DiscoverQuery) -> Result<Vec<EventRow>> {
        let endpoint = format!("organizations/{}/events/", self.config.org_slug);
        let project = self.discover_project().await?;
        let params = query.to_params(project);
        let response: DiscoverResponse = self.get(&endpoint, &params).await?;
        debug!(
            "Discover `{}` over {} returned {} rows",
            query.query,
            query.stats_period,
            response.data.len()
        );
        Ok(response.data)
    }

    /// List all projects of the organization
    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        let endpoint = format!("organizations/{}/projects/", self.config.org_slug);
        self.get(&endpoint, &[]).await
    }

    /// Discover filters projects by numeric id, while the configuration
    /// names a slug. Ids are passed through unchanged.
    async fn discover_project(&self) -> Result<Option<&str>> {
        let Some(project) = self.config.project.as_deref().filter(|p| !p.is_empty()) else {
            return Ok(None);
        };
        if project.chars().all(|c| c.is_ascii_digit()) {
            return Ok(Some(project));
        }

        let id = self
            .project_id
            .get_or_try_init(|| async {
                let id = self
                    .list_projects()
                    .await?
                    .into_iter()
                    .find(|p| p.slug == project)
                    .map(|p| p.id)
                    .ok_or_else(|| {
                        ServiceError::not_found(format!(
                            "Project {} not found in organization {}",
                            project, self.config.org_slug
                        ))
                    })?;
                debug!("Resolved Sentry project {} to id {}", project, id);
                Ok::<_, ServiceError>(id)
            })
            .await?;
        Ok(Some(id.as_str()))
    }

    /// Project alert rules are written to: the configured one, else the first
    pub async fn resolve_project(&self) -> Result<String> {
        if let Some(project) = &self.config.project {
            return Ok(project.clone());
        }
        self.list_projects()
            .await?
            .into_iter()
            .next()
            .map(|p| p.slug)
            .ok_or_else(|| ServiceError::not_found("No projects found in organization"))
    }

    pub async fn list_alert_rules(&self, project: &str) -> Result<Vec<AlertRule>> {
        let endpoint = format!("projects/{}/{}/alert-rules/", self.config.org_slug, project);
        self.get(&endpoint, &[]).await
    }

    pub async fn create_alert_rule(
        &self,
        project: &str,
        payload: &AlertRulePayload,
    ) -> Result<AlertRule> {
        let endpoint = format!("projects/{}/{}/alert-rules/", self.config.org_slug, project);
        self.post(&endpoint, payload).await
    }

    pub async fn update_alert_rule(
        &self,
        project: &str,
        rule_id: &str,
        payload: &AlertRulePayload,
    ) -> Result<AlertRule> {
        let endpoint = format!(
            "projects/{}/{}/alert-rules/{}/",
            self.config.org_slug, project, rule_id
        );
        self.put(&endpoint, payload).await
    }

    fn url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    async fn send_once<R>(
        &self,
        method: Method,
        endpoint: &str,
        query: &[(String, String)],
        body: Option<&serde_json::Value>,
    ) -> Result<R>
    where
        R: DeserializeOwned,
    {
        let request_id = new_request_id();
        let url = self.url(endpoint);
        debug!("Sentry request {} {} ({})", method, url, request_id);

        let started = Instant::now();
        let mut builder = self.http_client.request(method, &url).query(query);
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        debug!(
            "Sentry responded {} in {:?} ({})",
            response.status(),
            started.elapsed(),
            request_id
        );
        read_json("sentry", endpoint, &request_id, response).await
    }
}

#[async_trait]
impl RequestExecutor for SentryClient {
    async fn get<R>(&self, endpoint: &str, query: &[(String, String)]) -> Result<R>
    where
        R: DeserializeOwned + Send,
    {
        self.retry
            .execute(move || self.send_once(Method::GET, endpoint, query, None))
            .await
    }

    async fn post<T, R>(&self, endpoint: &str, body: &T) -> Result<R>
    where
        T: Serialize + Send + Sync,
        R: DeserializeOwned + Send,
    {
        let body = serde_json::to_value(body)?;
        let body = &body;
        self.retry
            .execute(move || self.send_once(Method::POST, endpoint, &[], Some(body)))
            .await
    }

    async fn put<T, R>(&self, endpoint: &str, body: &T) -> Result<R>
    where
        T: Serialize + Send + Sync,
        R: DeserializeOwned + Send,
    {
        let body = serde_json::to_value(body)?;
        let body = &body;
        self.retry
            .execute(move || self.send_once(Method::PUT, endpoint, &[], Some(body)))
            .await
    }
}

#[async_trait]
impl MetricsSource for SentryClient {
    async fn discover(&self, query: &DiscoverQuery) -> Result<Vec<EventRow>> {
        SentryClient::discover(self, query).await
    }
}

#[async_trait]
impl ServiceClient for SentryClient {
    fn name(&self) -> &str {
        "sentry"
    }

    fn base_url(&self) -> &str {
        &self.config.base_url
    }

    async fn health_check(&self) -> Result<bool> {
        match self.list_projects().await {
            Ok(_) => Ok(true),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                log::warn!("Sentry health check failed: {}", e);
                Ok(false)
            }
        }
    }
}

impl AuthenticatedClient for SentryClient {
    fn auth_type(&self) -> &str {
        "Bearer"
    }

    fn is_authenticated(&self) -> bool {
        !self.config.auth_token.is_empty()
    }
}
