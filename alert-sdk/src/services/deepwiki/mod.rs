//! DeepWiki client over the MCP SSE transport
//!
//! Each question opens a short-lived MCP session:
//!
//! 1. `GET` the SSE URL and wait for the `endpoint` event naming the POST URL
//! 2. `initialize` / `notifications/initialized` handshake
//! 3. `tools/call` of `ask_question`, answered on the SSE stream
//!
//! Each session runs under one timeout. A retryable failure (network,
//! timeout, 5xx) opens a fresh session, up to the configured retry count.

pub mod sse;
pub use sse::{SseDecoder, SseEvent, SseStream};

use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use log::{debug, info};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use serde_json::{json, Value};
use url::Url;

use crate::config::{DeepWikiConfig, ServiceConfig};
use crate::core::{ClientBuilder, CodebaseQa, ServiceClient};
use crate::error::{Result, ServiceError};
use crate::resilience::{RetryConfig, RetryExecutor};
use crate::services::common::{new_request_id, parse_error_response};
use crate::services::UserAgent;

const PROTOCOL_VERSION: &str = "2024-11-05";
const ASK_TOOL: &str = "ask_question";

/// DeepWiki MCP client
pub struct DeepWikiClient {
    http_client: Client,
    config: DeepWikiConfig,
    repository: String,
    retry: RetryExecutor,
}

impl DeepWikiClient {
    pub fn new(config: DeepWikiConfig) -> Result<Self> {
        config.validate()?;

        // The SSE response stays open for the whole session, so the session
        // timeout replaces the per-request one.
        let builder = ClientBuilder::new()
            .no_timeout()
            .compression(false)
            .retry_config(RetryConfig::default().with_max_retries(config.max_retries))
            .user_agent(UserAgent::for_client("deepwiki"));

        Ok(Self {
            http_client: builder.build_http_client()?,
            retry: builder.build_retry(),
            repository: config.repository(),
            config,
        })
    }

    pub fn config(&self) -> &DeepWikiConfig {
        &self.config
    }

    async fn session(&self, question: &str) -> Result<String> {
        let request_id = new_request_id();
        debug!("Opening DeepWiki MCP session {} ({})", self.config.mcp_url, request_id);

        let response = self
            .http_client
            .get(&self.config.mcp_url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(parse_error_response("deepwiki", "sse", &request_id, response).await);
        }

        let mut events = SseStream::new(Box::pin(response.bytes_stream()));

        let endpoint = wait_for_endpoint(&mut events).await?;
        let post_url = Url::parse(&self.config.mcp_url)?.join(endpoint.trim())?;
        debug!("DeepWiki session endpoint: {}", post_url);

        self.post_rpc(
            &post_url,
            &json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "initialize",
                "params": {
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "sentralert",
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                },
            }),
            &request_id,
        )
        .await?;
        await_response(&mut events, 1).await?;

        self.post_rpc(
            &post_url,
            &json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
            &request_id,
        )
        .await?;

        self.post_rpc(
            &post_url,
            &json!({
                "jsonrpc": "2.0",
                "id": 2,
                "method": "tools/call",
                "params": {
                    "name": ASK_TOOL,
                    "arguments": {
                        "repoName": self.repository,
                        "question": question,
                    },
                },
            }),
            &request_id,
        )
        .await?;
        let result = await_response(&mut events, 2).await?;

        tool_result_text(&result)
    }

    async fn post_rpc(&self, url: &Url, body: &Value, request_id: &str) -> Result<()> {
        let response = self
            .http_client
            .post(url.clone())
            .header(CONTENT_TYPE, "application/json")
            .json(body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(parse_error_response("deepwiki", url.path(), request_id, response).await);
        }
        Ok(())
    }
}

async fn wait_for_endpoint<S, B>(events: &mut SseStream<S>) -> Result<String>
where
    S: Stream<Item = std::result::Result<B, reqwest::Error>> + Unpin,
    B: AsRef<[u8]>,
{
    while let Some(event) = events.next_event().await? {
        if event.event == "endpoint" {
            return Ok(event.data);
        }
    }
    Err(ServiceError::protocol(
        "SSE stream closed before the endpoint event",
    ))
}

/// Wait for the JSON-RPC response carrying `id`, skipping anything else
async fn await_response<S, B>(events: &mut SseStream<S>, id: u64) -> Result<Value>
where
    S: Stream<Item = std::result::Result<B, reqwest::Error>> + Unpin,
    B: AsRef<[u8]>,
{
    while let Some(event) = events.next_event().await? {
        if event.event != "message" {
            continue;
        }
        let message: Value = match serde_json::from_str(&event.data) {
            Ok(message) => message,
            Err(e) => {
                debug!("Skipping non-JSON SSE message: {}", e);
                continue;
            }
        };
        if message.get("id").and_then(Value::as_u64) != Some(id) {
            continue;
        }
        if let Some(error) = message.get("error") {
            let text = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown JSON-RPC error");
            return Err(ServiceError::service(format!("DeepWiki request {} failed: {}", id, text)));
        }
        return Ok(message.get("result").cloned().unwrap_or(Value::Null));
    }
    Err(ServiceError::protocol(format!(
        "SSE stream closed before response {}",
        id
    )))
}

fn tool_result_text(result: &Value) -> Result<String> {
    let text = result
        .get("content")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();

    if result.get("isError").and_then(Value::as_bool).unwrap_or(false) {
        return Err(ServiceError::service(format!("DeepWiki tool error: {}", text)));
    }
    if text.trim().is_empty() {
        return Err(ServiceError::parsing("DeepWiki returned no text content"));
    }
    Ok(text)
}

#[async_trait]
impl CodebaseQa for DeepWikiClient {
    fn repository(&self) -> &str {
        &self.repository
    }

    async fn ask_question(&self, question: &str) -> Result<String> {
        info!("Asking DeepWiki about {}", self.repository);
        let budget = Duration::from_secs(self.config.timeout_seconds);
        self.retry
            .execute(|| async move {
                tokio::time::timeout(budget, self.session(question))
                    .await
                    .map_err(|_| {
                        ServiceError::timeout(format!("DeepWiki session exceeded {:?}", budget))
                    })?
            })
            .await
    }
}

#[async_trait]
impl ServiceClient for DeepWikiClient {
    fn name(&self) -> &str {
        "deepwiki"
    }

    fn base_url(&self) -> &str {
        &self.config.mcp_url
    }

    async fn health_check(&self) -> Result<bool> {
        let budget = Duration::from_secs(self.config.timeout_seconds);
        let check = async {
            let response = self
                .http_client
                .get(&self.config.mcp_url)
                .header(ACCEPT, "text/event-stream")
                .send()
                .await?;
            if !response.status().is_success() {
                return Ok(false);
            }
            let mut events = SseStream::new(Box::pin(response.bytes_stream()));
            Ok::<_, ServiceError>(wait_for_endpoint(&mut events).await.is_ok())
        };
        match tokio::time::timeout(budget, check).await {
            Ok(result) => result,
            Err(_) => Ok(false),
        }
    }
}
