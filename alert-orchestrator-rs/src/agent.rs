//! Tool-using service analysis agent
//!
//! The hosted model drives the loop: each round it either asks for tool calls
//! or ends its turn with a JSON analysis. Tool calls run one at a time through
//! the `ToolRegistry` and every call is recorded in the execution trace.

use std::sync::Arc;

use agent_tools_rs::ToolRegistry;
use alert_sdk::anthropic::{ContentBlock, Message, MessagesRequest, StopReason};
use alert_sdk::util::extract_json_block;
use alert_sdk::Reasoner;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::Result;
use crate::flows::{FlowKind, FlowReport, ProposalContext, SkippedItem};
use crate::proposal::{
    dataset_for_aggregate, lenient, AlertProposal, Flow, Severity, ThresholdType, Thresholds,
    METRIC_ALERT_KIND,
};

pub const DEFAULT_AGENT_MAX_TOKENS: u32 = 4096;

const DEFAULT_TIME_WINDOW: u32 = 5;

const SYNTHETIC_NOTE: &str = "[Note: codebase insights for this run came from synthetic fallback data, not the live repository index. Verify before applying.]";

const COMPREHENSIVE_PROMPT: &str = r#"You are a service analysis agent. Your task is to analyze a production service by combining codebase insights with actual production metrics to propose intelligent monitoring alerts.

Follow this process:

1. **Discover the codebase**: Use query_deepwiki_codebase to understand:
   - What API endpoints exist
   - What services and dependencies are present
   - Any potential issues identified in the code

2. **Analyze production behavior**: Use query_sentry_traces to examine:
   - Which endpoints are currently monitored vs unmonitored
   - Performance characteristics (p50, p95 latency)
   - Error rates and failure patterns
   - Recent error events

3. **Synthesize insights**: Compare codebase analysis with production data to identify:
   - Critical unmonitored endpoints (especially payment, checkout, refund)
   - Endpoints with concerning performance patterns
   - Services calling external APIs without proper monitoring
   - Database operations without timeout alerts

4. **Propose alerts**: For each issue found, propose a Sentry metric alert with:
   - Clear justification based on both code and production data
   - Appropriate thresholds based on actual metrics
   - Proper severity level
   - Specific metric to monitor (p95, failure_rate, error_count, etc.)

**Output Format**: Provide your final analysis as a JSON object with this structure:
```json
{
  "analysis_summary": "Brief summary of findings",
  "alerts": [
    {
      "endpoint": "POST /api/checkout",
      "alert_name": "Checkout failure rate critical",
      "justification": "Codebase shows external payment API call without error handling. Production data shows 2.5% failure rate.",
      "alert_config": {
        "aggregate": "failure_rate()",
        "warning_threshold": 0.01,
        "critical_threshold": 0.02,
        "severity": "CRITICAL",
        "time_window": 5
      }
    }
  ],
  "insights": {
    "unmonitored_count": 3,
    "critical_endpoints": ["POST /api/checkout", "POST /api/refund"],
    "recommendations": ["Add timeout monitoring for PaymentService calls"]
  }
}
```

Begin your analysis now."#;

const QUICK_PROMPT: &str = r#"Perform a quick service analysis:

1. Query deepwiki for critical endpoints (payment, checkout, refund)
2. Query Sentry for their current monitoring status
3. Propose alerts for any unmonitored critical endpoints

Provide response in JSON format with an "alerts" array; each alert has "endpoint", "alert_name", "justification" and an "alert_config" object with "aggregate", "warning_threshold", "critical_threshold", "severity" and "time_window"."#;

/// What the agent is asked to look at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisType {
    Comprehensive,
    /// One endpoint, e.g. `POST /api/checkout`
    EndpointSpecific(String),
    Quick,
}

impl AnalysisType {
    pub fn prompt(&self) -> String {
        match self {
            AnalysisType::Comprehensive => COMPREHENSIVE_PROMPT.to_string(),
            AnalysisType::EndpointSpecific(endpoint) => format!(
                "Analyze the specific endpoint: {}\n\n\
                 1. Use query_deepwiki_codebase to understand this endpoint's implementation\n\
                 2. Use query_sentry_traces to get its production metrics\n\
                 3. Propose appropriate monitoring alerts based on the analysis\n\n\
                 Provide response in JSON format with alert configuration: an \"alerts\" array \
                 whose entries have \"endpoint\", \"alert_name\", \"justification\" and \
                 \"alert_config\" ({{aggregate, warning_threshold, critical_threshold, severity, time_window}}).",
                endpoint
            ),
            AnalysisType::Quick => QUICK_PROMPT.to_string(),
        }
    }
}

/// One tool invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionTraceEntry {
    pub iteration: u32,
    pub tool: String,
    pub input: Value,
    pub output: Value,
}

/// Everything one agent run produced
#[derive(Debug, Clone, Default, Serialize)]
pub struct AgentReport {
    pub suggestions: Vec<AlertProposal>,
    pub insights: Value,
    pub analysis_summary: Option<String>,
    pub execution_trace: Vec<ExecutionTraceEntry>,
    /// Alerts in the final answer that could not be turned into proposals
    pub skipped: Vec<SkippedItem>,
    pub used_synthetic_data: bool,
    pub error: Option<String>,
    pub raw_response: Option<String>,
}

impl AgentReport {
    fn failed(error: impl Into<String>, execution_trace: Vec<ExecutionTraceEntry>) -> Self {
        Self {
            error: Some(error.into()),
            execution_trace,
            ..Default::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Deserialize)]
struct FinalAnswer {
    #[serde(default)]
    analysis_summary: Option<String>,
    /// Kept raw so one malformed alert only skips itself
    #[serde(alias = "suggestions")]
    alerts: Vec<Value>,
    #[serde(default)]
    insights: Value,
}

#[derive(Debug, Deserialize)]
struct ProposedAlert {
    endpoint: Option<String>,
    alert_name: Option<String>,
    justification: Option<String>,
    #[serde(default)]
    alert_config: AlertConfig,
}

#[derive(Debug, Default, Deserialize)]
struct AlertConfig {
    aggregate: Option<String>,
    #[serde(default, deserialize_with = "lenient::f64_opt")]
    warning_threshold: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64_opt")]
    critical_threshold: Option<f64>,
    severity: Option<String>,
    #[serde(default, deserialize_with = "lenient::u32_opt")]
    time_window: Option<u32>,
    #[serde(default, deserialize_with = "lenient::threshold_type_opt")]
    threshold_type: Option<ThresholdType>,
}

fn to_proposal(
    alert: Value,
    context: &ProposalContext,
) -> std::result::Result<AlertProposal, String> {
    let alert: ProposedAlert =
        serde_json::from_value(alert).map_err(|e| format!("unreadable alert: {}", e))?;
    let endpoint = alert
        .endpoint
        .filter(|e| !e.trim().is_empty())
        .ok_or("alert names no endpoint")?;
    let name = alert
        .alert_name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| format!("alert for {} has no name", endpoint))?;
    let justification = alert
        .justification
        .filter(|j| !j.trim().is_empty())
        .ok_or_else(|| format!("{}: no justification", name))?;

    let config = alert.alert_config;
    let aggregate = config
        .aggregate
        .filter(|a| !a.trim().is_empty())
        .ok_or_else(|| format!("{}: no aggregate", name))?;
    let (Some(warning), Some(critical)) = (config.warning_threshold, config.critical_threshold) else {
        return Err(format!("{}: thresholds missing", name));
    };
    let severity = match config.severity {
        Some(severity) => severity.parse::<Severity>().map_err(|e| format!("{}: {}", name, e))?,
        None => Severity::High,
    };

    let dataset = dataset_for_aggregate(&aggregate);
    Ok(AlertProposal {
        kind: METRIC_ALERT_KIND.to_string(),
        flow: Flow::ServiceAnalysisAgent,
        name: name.trim().to_string(),
        dataset: dataset.to_string(),
        query: context.endpoint_query(dataset, endpoint.trim()),
        aggregate,
        time_window: config.time_window.unwrap_or(DEFAULT_TIME_WINDOW),
        threshold_type: config.threshold_type.unwrap_or_default(),
        environment: context.environment.clone(),
        thresholds: Thresholds { warning, critical },
        resolve_threshold: None,
        justification: justification.trim().to_string(),
        severity,
        actions: context.actions(),
    })
}

/// Drives the model/tool loop
pub struct AgentRunner {
    reasoner: Arc<dyn Reasoner>,
    registry: Arc<ToolRegistry>,
    context: ProposalContext,
    max_iterations: u32,
    max_tokens: u32,
}

impl AgentRunner {
    pub fn new(reasoner: Arc<dyn Reasoner>, registry: Arc<ToolRegistry>, context: ProposalContext) -> Self {
        Self {
            reasoner,
            registry,
            context,
            max_iterations: crate::config::DEFAULT_MAX_ITERATIONS,
            max_tokens: DEFAULT_AGENT_MAX_TOKENS,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    /// Run the loop until the model ends its turn or the iteration budget runs out
    ///
    /// Only failures of the model API itself are returned as errors; a bad
    /// final answer is reported in `AgentReport::error`.
    pub async fn run(&self, analysis: &AnalysisType) -> Result<AgentReport> {
        let tools = self.registry.definitions();
        let mut messages = vec![Message::user(analysis.prompt())];
        let mut trace = Vec::new();
        let mut synthetic = false;

        for iteration in 1..=self.max_iterations {
            let request = MessagesRequest::new(self.reasoner.model(), self.max_tokens, messages.clone())
                .with_tools(tools.clone());
            let response = self.reasoner.create_message(&request).await?;

            match response.stop_reason {
                Some(StopReason::EndTurn) => {
                    info!("Agent finished after {} iterations", iteration);
                    return Ok(self.finish(&response.text(), trace, synthetic));
                }
                Some(StopReason::ToolUse) => {}
                other => {
                    return Ok(AgentReport::failed(
                        format!("Unexpected stop reason: {:?}", other),
                        trace,
                    ));
                }
            }

            let mut results = Vec::new();
            for (id, name, input) in response.tool_uses() {
                info!("Agent calling tool: {}", name);
                debug!("Tool input: {}", input);

                let (output, content, is_error) = match self.registry.invoke(name, input).await {
                    Ok(output) => {
                        synthetic |= output.is_synthetic();
                        let content = output.to_json_string();
                        (output.content, content, false)
                    }
                    Err(e) => {
                        warn!("Tool {} failed: {}", name, e);
                        let output = json!({ "error": e.to_string() });
                        let content = output.to_string();
                        (output, content, true)
                    }
                };

                results.push(ContentBlock::tool_result(id, content, is_error));
                trace.push(ExecutionTraceEntry {
                    iteration,
                    tool: name.to_string(),
                    input: input.clone(),
                    output,
                });
            }

            if results.is_empty() {
                return Ok(AgentReport::failed(
                    "Model asked for tools without naming any",
                    trace,
                ));
            }

            let echoed: Vec<ContentBlock> = response
                .content
                .into_iter()
                .filter(|b| !matches!(b, ContentBlock::Unknown))
                .collect();
            messages.push(Message::assistant_blocks(echoed));
            messages.push(Message::user_blocks(results));
        }

        warn!("Agent stopped after {} iterations", self.max_iterations);
        Ok(AgentReport::failed("Max iterations reached", trace))
    }

    fn finish(&self, text: &str, trace: Vec<ExecutionTraceEntry>, synthetic: bool) -> AgentReport {
        let answer: FinalAnswer = match serde_json::from_str(extract_json_block(text)) {
            Ok(answer) => answer,
            Err(e) => {
                warn!("Failed to parse agent response: {}", e);
                return AgentReport {
                    error: Some(format!("Failed to parse response: {}", e)),
                    raw_response: Some(text.to_string()),
                    execution_trace: trace,
                    used_synthetic_data: synthetic,
                    ..Default::default()
                };
            }
        };

        let mut report = AgentReport {
            insights: answer.insights,
            analysis_summary: answer.analysis_summary,
            execution_trace: trace,
            used_synthetic_data: synthetic,
            ..Default::default()
        };

        for (index, alert) in answer.alerts.into_iter().enumerate() {
            match to_proposal(alert, &self.context) {
                Ok(proposal) => report.suggestions.push(proposal),
                Err(reason) => report
                    .skipped
                    .push(SkippedItem::new(format!("alert {}", index + 1), reason)),
            }
        }

        if synthetic {
            warn!(
                "Agent used synthetic codebase data; annotating {} suggestions",
                report.suggestions.len()
            );
            for proposal in &mut report.suggestions {
                proposal.justification = format!("{} {}", proposal.justification, SYNTHETIC_NOTE);
            }
        }
        report
    }

    /// Run the agent as one orchestrator flow
    pub async fn run_flow(&self, analysis: &AnalysisType) -> Result<FlowReport> {
        let agent = self.run(analysis).await?;
        let mut report = FlowReport::new(FlowKind::Agent);

        info!(
            "Agent made {} tool calls and proposed {} alerts",
            agent.execution_trace.len(),
            agent.suggestions.len()
        );
        if let Some(error) = agent.error {
            report.skip("agent analysis", error);
        }
        for skipped in agent.skipped {
            report.skip(skipped.item, skipped.reason);
        }
        for proposal in agent.suggestions {
            report.accept(proposal);
        }
        Ok(report)
    }
}
