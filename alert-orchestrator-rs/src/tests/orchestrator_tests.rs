//! End-to-end orchestrator runs with test doubles behind `Services`

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use alert_sdk::config::MemoryConfigProvider;
    use tempfile::TempDir;

    use crate::config::AppConfig;
    use crate::flows::FlowKind;
    use crate::orchestrator::{Orchestrator, Services};
    use crate::proposal::AlertProposal;
    use crate::tests::support::{transaction_row, MockMetrics};
    use crate::writer::load_existing;

    fn config(output: &TempDir, extra: &[(&str, &str)]) -> AppConfig {
        let mut provider = MemoryConfigProvider::new();
        provider.set("sentralert_output_dir", output.path().join("alerts").display());
        provider.set("sentralert_enrich", false);
        for (key, value) in extra {
            provider.set(*key, value);
        }
        AppConfig::from_provider(&provider)
    }

    fn failing_endpoints() -> MockMetrics {
        let mut metrics = MockMetrics::new();
        metrics.expect_discover().returning(|query| {
            if query.stats_period == "1h" && query.query.starts_with("event.type:transaction") {
                Ok(vec![
                    transaction_row("POST /api/checkout", 300.0, 0.09),
                    transaction_row("POST /api/refund", 200.0, 0.12),
                ])
            } else {
                Ok(Vec::new())
            }
        });
        metrics
    }

    #[tokio::test]
    async fn test_partial_failure_still_writes_proposals() {
        let output = TempDir::new().unwrap();
        let services = Services::default().with_metrics(Arc::new(failing_endpoints()));
        let orchestrator = Orchestrator::new(config(&output, &[]), services);

        let report = orchestrator.run(&[]).await.unwrap();

        assert_eq!(report.selected, vec![FlowKind::Historical, FlowKind::Service]);
        assert_eq!(report.reports.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].flow, FlowKind::Service);
        assert!(report.failures[0].error.contains("SERVICE_SOURCE_PATH"));
        assert_eq!(report.exit_code(), 0);

        assert_eq!(report.written.len(), 2);
        let on_disk = load_existing(&orchestrator.config().output_dir);
        let names: Vec<&str> = on_disk.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["POST /api/checkout high failure rate", "POST /api/refund high failure rate"]
        );
        let expected: Vec<&AlertProposal> = report.proposals().collect();
        assert_eq!(on_disk.iter().collect::<Vec<_>>(), expected);
    }

    #[tokio::test]
    async fn test_all_flows_failing_exits_non_zero() {
        let output = TempDir::new().unwrap();
        let mut services = Services::default();
        services.mark_unavailable("sentry", "SENTRY_AUTH_TOKEN is required");
        let orchestrator = Orchestrator::new(config(&output, &[]), services);

        let report = orchestrator
            .run(&[FlowKind::Historical, FlowKind::Historical, FlowKind::Agent])
            .await
            .unwrap();

        assert_eq!(report.selected, vec![FlowKind::Historical, FlowKind::Agent]);
        assert!(report.all_failed());
        assert_eq!(report.exit_code(), 1);
        assert_eq!(
            report.failures[0].error,
            "Configuration error: sentry client unavailable: SENTRY_AUTH_TOKEN is required"
        );
        assert!(report.written.is_empty());
        assert!(!orchestrator.config().output_dir.exists());
    }

    #[tokio::test]
    async fn test_demo_mode_adds_fixture() {
        let output = TempDir::new().unwrap();
        let orchestrator = Orchestrator::new(
            config(&output, &[("sentralert_demo_mode", "true")]),
            Services::default(),
        );

        let report = orchestrator.run(&[FlowKind::Historical]).await.unwrap();

        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.written.len(), 1);
        assert!(report.written[0].ends_with("demo-checkout-p50-latency-above-50ms.yaml"));

        let yaml = fs::read_to_string(&report.written[0]).unwrap();
        assert!(yaml.contains("DEMO FIXTURE"));
        assert!(yaml.contains("kind: sentry.metric_alert"));
    }

    #[tokio::test]
    async fn test_services_from_empty_provider() {
        let services = Services::from_provider(&MemoryConfigProvider::new());
        assert!(services.metrics.is_none());
        assert!(services.reasoner.is_none());
        // DeepWiki needs no credentials and has a default repository
        assert!(services.codebase.is_some());

        let output = TempDir::new().unwrap();
        let report = Orchestrator::new(config(&output, &[]), services)
            .run(&[FlowKind::Agent])
            .await
            .unwrap();
        assert!(report.failures[0].error.contains("sentry client unavailable"));
    }
}
