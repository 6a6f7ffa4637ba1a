//! Applying reviewed YAML files against a WireMock Sentry

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use alert_sdk::config::SentryConfig;
    use alert_sdk::sentry::SentryClient;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::apply::apply_directory;
    use crate::error::FlowError;
    use crate::proposal::{AlertProposal, Severity};
    use crate::tests::support::context;
    use crate::writer::ProposalWriter;

    const RULES: &str = "/api/0/projects/acme/backend/alert-rules/";

    fn create_test_client(mock_server: &MockServer, project: Option<&str>) -> SentryClient {
        SentryClient::new(SentryConfig {
            auth_token: "mock_sentry_token".to_string(),
            org_slug: "acme".to_string(),
            project: project.map(str::to_string),
            base_url: format!("{}/api/0", mock_server.uri()),
            timeout_seconds: 5,
            max_retries: 0,
        })
        .expect("Failed to build Sentry client")
    }

    fn proposal(name: &str, transaction: &str) -> AlertProposal {
        let generated_on = chrono::NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let mut proposal = crate::demo::over_sensitive_alert(&context(), generated_on);
        proposal.name = name.to_string();
        proposal.aggregate = "failure_rate()".to_string();
        proposal.query = context().transaction_query(transaction);
        proposal.thresholds.warning = 0.02;
        proposal.thresholds.critical = 0.05;
        proposal.time_window = 5;
        proposal.severity = Severity::High;
        proposal.justification = format!("{} handles money.", transaction);
        proposal
    }

    fn alerts_dir(proposals: &[AlertProposal]) -> TempDir {
        let dir = TempDir::new().unwrap();
        ProposalWriter::new(dir.path()).write_all(proposals).unwrap();
        dir
    }

    fn write(dir: &Path, name: &str, contents: &str) {
        fs::write(dir.join(name), contents).unwrap();
    }

    #[tokio::test]
    async fn test_creates_new_and_updates_existing_rules() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(RULES))
            .and(header("Authorization", "Bearer mock_sentry_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "17", "name": "Checkout failure rate", "status": 0}
            ])))
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("PUT"))
            .and(path("/api/0/projects/acme/backend/alert-rules/17/"))
            .and(body_string_contains("\"alertThreshold\":0.05"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": "17", "name": "Checkout failure rate"})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path(RULES))
            .and(body_string_contains("\"projects\":[\"backend\"]"))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(json!({"id": "42", "name": "Refund failure rate"})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let dir = alerts_dir(&[
            proposal("Checkout failure rate", "POST /api/checkout"),
            proposal("Refund failure rate", "POST /api/refund"),
        ]);
        write(dir.path(), "issue-alert.yaml", "kind: sentry.issue_alert\nname: Any new issue\n");
        write(dir.path(), "notes.txt", "not an alert");

        let client = create_test_client(&mock_server, Some("backend"));
        let summary = apply_directory(&client, dir.path()).await.unwrap();

        assert_eq!(summary.project.as_deref(), Some("backend"));
        assert_eq!(summary.updated, vec!["Checkout failure rate"]);
        assert_eq!(summary.created, vec!["Refund failure rate"]);
        assert_eq!(summary.processed(), 2);
        assert_eq!(summary.skipped.len(), 1);
        assert_eq!(summary.skipped[0].item, "issue-alert.yaml");
        assert_eq!(summary.skipped[0].reason, "not a metric alert");
    }

    #[tokio::test]
    async fn test_rejected_file_does_not_stop_the_rest() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/0/organizations/acme/projects/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "1", "slug": "backend"},
                {"id": "2", "slug": "frontend"}
            ])))
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path(RULES))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path(RULES))
            .and(body_string_contains("Checkout failure rate"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({"detail": "Invalid aggregate for dataset"})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path(RULES))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(json!({"id": "43", "name": "Refund failure rate"})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let dir = alerts_dir(&[
            proposal("Checkout failure rate", "POST /api/checkout"),
            proposal("Refund failure rate", "POST /api/refund"),
        ]);
        write(dir.path(), "broken.yml", "kind: sentry.metric_alert\nname: [unterminated\n");

        let client = create_test_client(&mock_server, None);
        let summary = apply_directory(&client, dir.path()).await.unwrap();

        assert_eq!(summary.project.as_deref(), Some("backend"));
        assert_eq!(summary.created, vec!["Refund failure rate"]);
        assert!(summary.updated.is_empty());

        let skipped: Vec<&str> = summary.skipped.iter().map(|s| s.item.as_str()).collect();
        assert_eq!(skipped, vec!["broken.yml", "checkout-failure-rate.yaml"]);
        assert!(summary.skipped[1].reason.contains("Invalid aggregate"));
    }

    #[tokio::test]
    async fn test_authentication_failure_aborts() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(RULES))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"detail": "Invalid token"})),
            )
            .mount(&mock_server)
            .await;

        let dir = alerts_dir(&[proposal("Checkout failure rate", "POST /api/checkout")]);
        let client = create_test_client(&mock_server, Some("backend"));

        let error = apply_directory(&client, dir.path()).await.unwrap_err();
        assert!(matches!(error, FlowError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_missing_and_empty_directories() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server, Some("backend"));

        let error = apply_directory(&client, Path::new("/no/such/alerts")).await.unwrap_err();
        assert!(matches!(error, FlowError::Configuration(_)));

        // No requests are made for an empty directory
        let empty = TempDir::new().unwrap();
        let summary = apply_directory(&client, empty.path()).await.unwrap();
        assert_eq!(summary.processed(), 0);
        assert!(summary.project.is_none());
    }
}
