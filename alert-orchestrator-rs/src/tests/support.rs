//! Shared test doubles

use std::collections::VecDeque;
use std::sync::Mutex;

use alert_sdk::anthropic::{ContentBlock, MessagesRequest, MessagesResponse, StopReason, Usage};
use alert_sdk::sentry::{DiscoverQuery, EventRow};
use alert_sdk::{CodebaseQa, MetricsSource, Reasoner, ServiceError};
use async_trait::async_trait;
use mockall::mock;
use serde_json::{json, Value};

use crate::flows::ProposalContext;

mock! {
    pub Metrics {}

    #[async_trait]
    impl MetricsSource for Metrics {
        async fn discover(&self, query: &DiscoverQuery) -> alert_sdk::Result<Vec<EventRow>>;
    }
}

/// Reasoner that replays canned responses and records every request
#[derive(Default)]
pub struct ScriptedReasoner {
    responses: Mutex<VecDeque<alert_sdk::Result<MessagesResponse>>>,
    requests: Mutex<Vec<MessagesRequest>>,
}

impl ScriptedReasoner {
    pub fn new<I>(responses: I) -> Self
    where
        I: IntoIterator<Item = alert_sdk::Result<MessagesResponse>>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<MessagesRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    fn model(&self) -> &str {
        "claude-test"
    }

    async fn create_message(&self, request: &MessagesRequest) -> alert_sdk::Result<MessagesResponse> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ServiceError::service("no scripted response left")))
    }
}

/// Codebase Q&A that is never reachable
pub struct UnreachableCodebase;

#[async_trait]
impl CodebaseQa for UnreachableCodebase {
    fn repository(&self) -> &str {
        "acme/shop-api"
    }

    async fn ask_question(&self, _question: &str) -> alert_sdk::Result<String> {
        Err(ServiceError::network("connection refused"))
    }
}

pub fn text_response(text: &str) -> alert_sdk::Result<MessagesResponse> {
    Ok(MessagesResponse {
        id: "msg_text".to_string(),
        model: "claude-test".to_string(),
        content: vec![ContentBlock::text(text)],
        stop_reason: Some(StopReason::EndTurn),
        usage: Usage::default(),
    })
}

pub fn tool_use_response(calls: &[(&str, &str, Value)]) -> alert_sdk::Result<MessagesResponse> {
    let mut content = vec![ContentBlock::text("Let me look at the service.")];
    content.extend(calls.iter().map(|(id, name, input)| ContentBlock::ToolUse {
        id: id.to_string(),
        name: name.to_string(),
        input: input.clone(),
    }));

    Ok(MessagesResponse {
        id: "msg_tools".to_string(),
        model: "claude-test".to_string(),
        content,
        stop_reason: Some(StopReason::ToolUse),
        usage: Usage::default(),
    })
}

pub fn row(value: Value) -> EventRow {
    match value {
        Value::Object(map) => map,
        other => panic!("row must be an object: {}", other),
    }
}

pub fn context() -> ProposalContext {
    ProposalContext::new("production", "oncall@example.com")
}

pub fn transaction_row(name: &str, p95: f64, failure_rate: f64) -> EventRow {
    row(json!({
        "transaction": name,
        "p95(transaction.duration)": p95,
        "failure_rate()": failure_rate,
        "count()": 1200,
    }))
}
