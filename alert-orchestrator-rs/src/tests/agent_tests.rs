//! Agent loop with the real tool registry and scripted model turns

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use agent_tools_rs::tools::{DEEPWIKI_TOOL, SENTRY_TRACES_TOOL};
    use agent_tools_rs::{register_agent_tools, ToolRegistry};
    use alert_sdk::anthropic::{ContentBlock, MessagesResponse, Role, StopReason, Usage};
    use serde_json::json;

    use crate::agent::{AgentRunner, AnalysisType};
    use crate::flows::FlowKind;
    use crate::proposal::{Flow, Severity, ThresholdType, Thresholds};
    use crate::tests::support::{
        context, text_response, tool_use_response, transaction_row, MockMetrics, ScriptedReasoner,
        UnreachableCodebase,
    };

    const FINAL_ANSWER: &str = r#"Here is my analysis.

```json
{
  "analysis_summary": "Checkout calls the payment provider without monitoring.",
  "alerts": [
    {
      "endpoint": "POST /api/checkout",
      "alert_name": "Checkout failure rate critical",
      "justification": "Payment calls have no error handling and production shows a 2.5% failure rate.",
      "alert_config": {
        "aggregate": "failure_rate()",
        "warning_threshold": 0.01,
        "critical_threshold": 0.02,
        "severity": "CRITICAL",
        "time_window": 5
      }
    },
    {
      "endpoint": "POST /api/refund",
      "alert_name": "Refund errors",
      "justification": "Refunds are unmonitored.",
      "alert_config": {"aggregate": "count()"}
    }
  ],
  "insights": {"unmonitored_count": 2, "critical_endpoints": ["POST /api/checkout", "POST /api/refund"]}
}
```"#;

    fn registry() -> Arc<ToolRegistry> {
        let mut metrics = MockMetrics::new();
        metrics
            .expect_discover()
            .returning(|_| Ok(vec![transaction_row("POST /api/checkout", 840.0, 0.025)]));

        let registry = ToolRegistry::new();
        register_agent_tools(&registry, Arc::new(UnreachableCodebase), Arc::new(metrics)).unwrap();
        Arc::new(registry)
    }

    fn exploring_turn() -> alert_sdk::Result<MessagesResponse> {
        tool_use_response(&[
            ("toolu_1", DEEPWIKI_TOOL, json!({"query": "What API endpoints exist?"})),
            (
                "toolu_2",
                SENTRY_TRACES_TOOL,
                json!({"endpoint_path": "POST /api/checkout", "stats_period": "24h"}),
            ),
        ])
    }

    #[tokio::test]
    async fn test_tool_loop_produces_annotated_suggestions() {
        let reasoner = Arc::new(ScriptedReasoner::new([exploring_turn(), text_response(FINAL_ANSWER)]));
        let runner = AgentRunner::new(reasoner.clone(), registry(), context());

        let report = runner.run(&AnalysisType::Comprehensive).await.unwrap();

        assert!(!report.is_error());
        assert_eq!(
            report.analysis_summary.as_deref(),
            Some("Checkout calls the payment provider without monitoring.")
        );
        assert_eq!(report.insights["unmonitored_count"], 2);

        // The DeepWiki tool fell back to sample data
        assert!(report.used_synthetic_data);
        assert_eq!(report.execution_trace.len(), 2);
        assert_eq!(report.execution_trace[0].tool, DEEPWIKI_TOOL);
        assert_eq!(report.execution_trace[0].iteration, 1);
        assert_eq!(report.execution_trace[0].output["metadata"]["synthetic"], true);
        assert_eq!(
            report.execution_trace[1].output["transactions"][0]["metrics"]["failure_rate"],
            0.025
        );

        assert_eq!(report.suggestions.len(), 1);
        let checkout = &report.suggestions[0];
        assert_eq!(checkout.flow, Flow::ServiceAnalysisAgent);
        assert_eq!(checkout.severity, Severity::Critical);
        assert_eq!(checkout.dataset, "transactions");
        assert_eq!(
            checkout.query,
            "event.type:transaction transaction:\"POST /api/checkout\" environment:production"
        );
        assert!(checkout.justification.starts_with("Payment calls have no error handling"));
        assert!(checkout.justification.contains("synthetic fallback data"));

        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].reason.contains("thresholds missing"));

        let requests = reasoner.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].tools.len(), 2);

        let followup = &requests[1].messages;
        assert_eq!(followup.len(), 3);
        assert_eq!(followup[1].role, Role::Assistant);
        assert_eq!(followup[2].role, Role::User);
        let result_ids: Vec<&str> = followup[2]
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolResult { tool_use_id, is_error, .. } => {
                    assert_eq!(*is_error, None);
                    Some(tool_use_id.as_str())
                }
                _ => None,
            })
            .collect();
        assert_eq!(result_ids, vec!["toolu_1", "toolu_2"]);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_reported_to_the_model() {
        let reasoner = Arc::new(ScriptedReasoner::new([
            tool_use_response(&[("toolu_9", "drop_database", json!({}))]),
            text_response(r#"{"alerts": []}"#),
        ]));
        let runner = AgentRunner::new(reasoner.clone(), registry(), context());

        let report = runner.run(&AnalysisType::Quick).await.unwrap();

        assert!(!report.is_error());
        assert!(report.suggestions.is_empty());
        assert!(!report.used_synthetic_data);
        assert!(report.execution_trace[0].output["error"]
            .as_str()
            .unwrap()
            .contains("drop_database"));

        let requests = reasoner.requests();
        match &requests[1].messages[2].content[0] {
            ContentBlock::ToolResult { tool_use_id, is_error, .. } => {
                assert_eq!(tool_use_id, "toolu_9");
                assert_eq!(*is_error, Some(true));
            }
            other => panic!("expected a tool result, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_max_iterations_reached() {
        let reasoner = Arc::new(ScriptedReasoner::new([exploring_turn(), exploring_turn(), exploring_turn()]));
        let runner = AgentRunner::new(reasoner.clone(), registry(), context()).with_max_iterations(2);

        let report = runner
            .run(&AnalysisType::EndpointSpecific("POST /api/checkout".to_string()))
            .await
            .unwrap();

        assert_eq!(report.error.as_deref(), Some("Max iterations reached"));
        assert_eq!(report.execution_trace.len(), 4);
        assert_eq!(report.execution_trace[3].iteration, 2);
        assert_eq!(reasoner.requests().len(), 2);

        let prompt = serde_json::to_string(&reasoner.requests()[0].messages[0]).unwrap();
        assert!(prompt.contains("Analyze the specific endpoint: POST /api/checkout"));
    }

    #[tokio::test]
    async fn test_malformed_final_answer() {
        let reasoner = Arc::new(ScriptedReasoner::new([text_response(
            "Checkout looks risky but I am not sure what to alert on.",
        )]));
        let runner = AgentRunner::new(reasoner, registry(), context());

        let report = runner.run(&AnalysisType::Quick).await.unwrap();

        assert!(report.error.as_deref().unwrap().starts_with("Failed to parse response"));
        assert_eq!(
            report.raw_response.as_deref(),
            Some("Checkout looks risky but I am not sure what to alert on.")
        );
        assert!(report.suggestions.is_empty());
    }

    #[tokio::test]
    async fn test_unexpected_stop_reason() {
        let truncated = MessagesResponse {
            id: "msg_cut".to_string(),
            model: "claude-test".to_string(),
            content: vec![ContentBlock::text("{\"alerts\": [")],
            stop_reason: Some(StopReason::MaxTokens),
            usage: Usage::default(),
        };
        let reasoner = Arc::new(ScriptedReasoner::new([Ok(truncated)]));
        let runner = AgentRunner::new(reasoner, registry(), context());

        let report = runner.run(&AnalysisType::Comprehensive).await.unwrap();
        assert!(report.error.as_deref().unwrap().starts_with("Unexpected stop reason"));
    }

    #[tokio::test]
    async fn test_model_failure_is_an_error() {
        let reasoner = Arc::new(ScriptedReasoner::new([Err(alert_sdk::ServiceError::authentication(
            "invalid x-api-key",
        ))]));
        let runner = AgentRunner::new(reasoner, registry(), context());

        let error = runner.run(&AnalysisType::Quick).await.unwrap_err();
        assert!(error.is_fatal());
    }

    #[tokio::test]
    async fn test_run_flow_reports_agent_errors_as_skips() {
        let reasoner = Arc::new(ScriptedReasoner::new([exploring_turn(), text_response(FINAL_ANSWER)]));
        let runner = AgentRunner::new(reasoner, registry(), context());

        let report = runner.run_flow(&AnalysisType::Comprehensive).await.unwrap();
        assert_eq!(report.flow, FlowKind::Agent);
        assert_eq!(report.proposals.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].item, "alert 2");

        let reasoner = Arc::new(ScriptedReasoner::new([text_response("no json here")]));
        let report = AgentRunner::new(reasoner, registry(), context())
            .run_flow(&AnalysisType::Quick)
            .await
            .unwrap();
        assert!(report.proposals.is_empty());
        assert_eq!(report.skipped[0].item, "agent analysis");
    }

    #[tokio::test]
    async fn test_malformed_alert_only_skips_itself() {
        let answer = r#"{
  "analysis_summary": "Two endpoints need alerts.",
  "alerts": [
    {
      "endpoint": "POST /api/checkout",
      "alert_name": "Checkout latency",
      "justification": "Checkout p95 is 840ms.",
      "alert_config": {
        "aggregate": "p95(transaction.duration)",
        "warning_threshold": "800",
        "critical_threshold": 1200.0,
        "severity": "high",
        "time_window": 5.0,
        "threshold_type": "ABOVE"
      }
    },
    {
      "endpoint": "POST /api/refund",
      "alert_name": "Refund failures",
      "justification": "Refunds are unmonitored.",
      "alert_config": {
        "aggregate": "failure_rate()",
        "warning_threshold": "abc",
        "critical_threshold": 0.05
      }
    },
    {
      "endpoint": "GET /api/orders/{id}",
      "alert_name": "Order lookups slow",
      "justification": "Order reads hit the database without a timeout.",
      "alert_config": {
        "aggregate": "p95(transaction.duration)",
        "warning_threshold": 300,
        "critical_threshold": 600,
        "time_window": 15,
        "threshold_type": "Below"
      }
    }
  ]
}"#;
        let reasoner = Arc::new(ScriptedReasoner::new([text_response(answer)]));
        let runner = AgentRunner::new(reasoner, registry(), context());

        let report = runner.run(&AnalysisType::Comprehensive).await.unwrap();

        assert!(!report.is_error());
        let names: Vec<&str> = report.suggestions.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Checkout latency", "Order lookups slow"]);

        let checkout = &report.suggestions[0];
        assert_eq!(checkout.thresholds, Thresholds { warning: 800.0, critical: 1200.0 });
        assert_eq!(checkout.time_window, 5);
        assert_eq!(checkout.threshold_type, ThresholdType::Above);
        assert_eq!(checkout.severity, Severity::High);

        let orders = &report.suggestions[1];
        assert_eq!(orders.time_window, 15);
        assert_eq!(orders.threshold_type, ThresholdType::Below);

        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].item, "alert 2");
        assert!(report.skipped[0].reason.contains("unreadable alert"));
    }

    #[tokio::test]
    async fn test_rejected_tool_input_is_traced_and_reported() {
        let reasoner = Arc::new(ScriptedReasoner::new([
            tool_use_response(&[
                (
                    "toolu_3",
                    SENTRY_TRACES_TOOL,
                    json!({"endpoint_path": "POST /api/checkout", "stats_period": "forever"}),
                ),
                (
                    "toolu_4",
                    SENTRY_TRACES_TOOL,
                    json!({"endpoint_path": "POST /api/checkout", "include_errors": "yes"}),
                ),
            ]),
            text_response(r#"{"alerts": []}"#),
        ]));
        let runner = AgentRunner::new(reasoner.clone(), registry(), context());

        let report = runner.run(&AnalysisType::Quick).await.unwrap();

        assert!(!report.is_error());
        assert_eq!(report.execution_trace.len(), 2);

        let period = &report.execution_trace[0];
        assert_eq!(period.tool, SENTRY_TRACES_TOOL);
        assert_eq!(period.input["stats_period"], "forever");
        assert!(period.output["error"].as_str().unwrap().contains("stats_period"));

        let include_errors = &report.execution_trace[1];
        assert_eq!(include_errors.input["include_errors"], "yes");
        assert!(include_errors.output["error"]
            .as_str()
            .unwrap()
            .contains("include_errors must be of type boolean"));

        let requests = reasoner.requests();
        let results: Vec<(&str, &str)> = requests[1].messages[2]
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolResult { tool_use_id, content, is_error } => {
                    assert_eq!(*is_error, Some(true));
                    Some((tool_use_id.as_str(), content.as_str()))
                }
                _ => None,
            })
            .collect();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "toolu_3");
        assert!(results[0].1.contains("Invalid tool input"));
        assert_eq!(results[1].0, "toolu_4");
        assert!(results[1].1.contains("include_errors"));
    }
}
