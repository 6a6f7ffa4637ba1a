//! Historical flow against a mocked metrics source

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use alert_sdk::sentry::{DiscoverQuery, EventRow};
    use alert_sdk::ServiceError;
    use serde_json::json;

    use crate::error::FlowError;
    use crate::flows::historical::{HistoricalFlow, ThresholdRules};
    use crate::proposal::Severity;
    use crate::tests::support::{
        context, row, text_response, transaction_row, MockMetrics, ScriptedReasoner,
    };

    fn is_current(q: &DiscoverQuery) -> bool {
        q.stats_period == "1h" && q.query.starts_with("event.type:transaction")
    }

    fn is_baseline(q: &DiscoverQuery) -> bool {
        q.stats_period == "7d"
    }

    fn is_errors(q: &DiscoverQuery) -> bool {
        q.query.starts_with("event.type:error")
    }

    fn metrics(current: Vec<EventRow>, baseline: Vec<EventRow>, errors: Vec<EventRow>) -> MockMetrics {
        let mut metrics = MockMetrics::new();
        metrics
            .expect_discover()
            .withf(|q| is_current(q))
            .times(1)
            .returning(move |_| Ok(current.clone()));
        metrics
            .expect_discover()
            .withf(|q| is_baseline(q))
            .times(1)
            .returning(move |_| Ok(baseline.clone()));
        metrics
            .expect_discover()
            .withf(|q| is_errors(q))
            .times(1)
            .returning(move |_| Ok(errors.clone()));
        metrics
    }

    fn baseline_row(name: &str, p95: f64) -> EventRow {
        row(json!({"transaction": name, "p95(transaction.duration)": p95, "count()": 9000}))
    }

    fn error_row(name: &str, count: u64) -> EventRow {
        row(json!({"transaction": name, "count()": count}))
    }

    #[tokio::test]
    async fn test_run_assembles_current_baseline_and_errors() {
        let metrics = metrics(
            vec![
                transaction_row("POST /api/checkout", 900.0, 0.01),
                transaction_row("GET /api/orders", 120.0, 0.0),
                row(json!({"transaction": "GET /broken", "failure_rate()": 0.2})),
            ],
            vec![
                baseline_row("POST /api/checkout", 500.0),
                baseline_row("GET /api/orders", 110.0),
            ],
            vec![
                error_row("GET /api/orders", 40),
                error_row("GET /api/orders", 30),
                error_row("POST /api/checkout", 3),
            ],
        );

        let flow = HistoricalFlow::new(Arc::new(metrics), ThresholdRules::default(), context());
        let report = flow.run().await.unwrap();

        let names: Vec<&str> = report.proposals.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "POST /api/checkout p95 latency regression",
                "GET /api/orders error rate spike",
            ]
        );

        let errors = &report.proposals[1];
        assert_eq!(errors.dataset, "events");
        assert_eq!(errors.severity, Severity::Medium);
        assert_eq!(
            errors.query,
            "event.type:error transaction:\"GET /api/orders\" environment:production"
        );
        assert!(errors.justification.contains("70 errors"));

        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].item, "GET /broken");
        assert!(report.skipped[0].reason.contains("p95(transaction.duration)"));
    }

    #[tokio::test]
    async fn test_baseline_failure_is_not_fatal() {
        let mut metrics = MockMetrics::new();
        metrics
            .expect_discover()
            .withf(|q| is_current(q))
            .returning(|_| Ok(vec![transaction_row("POST /api/refund", 2400.0, 0.08)]));
        metrics
            .expect_discover()
            .withf(|q| is_baseline(q))
            .returning(|_| Err(ServiceError::timeout("request timed out")));
        metrics
            .expect_discover()
            .withf(|q| is_errors(q))
            .returning(|_| Ok(Vec::new()));

        let flow = HistoricalFlow::new(Arc::new(metrics), ThresholdRules::default(), context());
        let report = flow.run().await.unwrap();

        // Without a baseline only the failure-rate rule can fire
        assert_eq!(report.proposals.len(), 1);
        assert_eq!(report.proposals[0].name, "POST /api/refund high failure rate");
        assert_eq!(report.proposals[0].severity, Severity::Critical);
        assert!(report.skipped.iter().any(|s| s.item == "baseline metrics"));
    }

    #[tokio::test]
    async fn test_authentication_failure_aborts() {
        let mut metrics = MockMetrics::new();
        metrics
            .expect_discover()
            .times(1)
            .returning(|_| Err(ServiceError::authentication("Invalid token")));

        let flow = HistoricalFlow::new(Arc::new(metrics), ThresholdRules::default(), context());
        let error = flow.run().await.unwrap_err();

        assert!(matches!(error, FlowError::Authentication(_)));
        assert!(error.is_fatal());
    }

    #[tokio::test]
    async fn test_review_drops_rejected_regression() {
        let metrics = metrics(
            vec![transaction_row("POST /api/checkout", 900.0, 0.0)],
            vec![baseline_row("POST /api/checkout", 500.0)],
            Vec::new(),
        );
        let reasoner = Arc::new(ScriptedReasoner::new([text_response(
            r#"{"alert_name": "Checkout slowdown", "is_legitimate": false}"#,
        )]));

        let flow = HistoricalFlow::new(Arc::new(metrics), ThresholdRules::default(), context())
            .with_reasoner(reasoner.clone());
        let report = flow.run().await.unwrap();

        assert!(report.proposals.is_empty());
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].item, "POST /api/checkout");

        let requests = reasoner.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].temperature, Some(0.0));
        let prompt = serde_json::to_string(&requests[0].messages).unwrap();
        assert!(prompt.contains("Regression: 80.0%"));
    }

    #[tokio::test]
    async fn test_review_rewrites_but_keeps_severity() {
        let metrics = metrics(
            vec![transaction_row("POST /api/checkout", 900.0, 0.0)],
            vec![baseline_row("POST /api/checkout", 500.0)],
            Vec::new(),
        );
        let reasoner = Arc::new(ScriptedReasoner::new([text_response(
            "```json\n{\"alert_name\": \"Checkout p95 regression\", \
             \"justification\": \"Checkout slowed after the payment SDK upgrade.\", \
             \"severity\": \"CRITICAL\", \"warning_threshold_ms\": 750, \
             \"critical_threshold_ms\": 950, \"is_legitimate\": true}\n```",
        )]));

        let flow = HistoricalFlow::new(Arc::new(metrics), ThresholdRules::default(), context())
            .with_reasoner(reasoner);
        let report = flow.run().await.unwrap();

        assert_eq!(report.proposals.len(), 1);
        let proposal = &report.proposals[0];
        assert_eq!(proposal.name, "Checkout p95 regression");
        assert_eq!(proposal.justification, "Checkout slowed after the payment SDK upgrade.");
        assert_eq!(proposal.thresholds.warning, 750.0);
        assert_eq!(proposal.thresholds.critical, 950.0);
        assert_eq!(proposal.severity, Severity::High);
    }

    #[tokio::test]
    async fn test_review_failure_keeps_rule_output() {
        let metrics = metrics(
            vec![transaction_row("POST /api/checkout", 900.0, 0.0)],
            vec![baseline_row("POST /api/checkout", 500.0)],
            Vec::new(),
        );
        let reasoner = Arc::new(ScriptedReasoner::new([Err(ServiceError::rate_limit(
            "overloaded",
        ))]));

        let flow = HistoricalFlow::new(Arc::new(metrics), ThresholdRules::default(), context())
            .with_reasoner(reasoner);
        let report = flow.run().await.unwrap();

        assert_eq!(report.proposals.len(), 1);
        assert_eq!(report.proposals[0].name, "POST /api/checkout p95 latency regression");
        assert!(report.skipped.is_empty());
    }
}
