//! Demo-mode fixture
//!
//! A deliberately bad proposal, so a walkthrough of the review step has
//! something to reject.

use chrono::NaiveDate;

use crate::flows::ProposalContext;
use crate::proposal::{AlertProposal, Flow, Severity, ThresholdType, Thresholds, METRIC_ALERT_KIND};

const DEMO_TRANSACTION: &str = "POST /api/checkout";

/// Over-sensitive checkout alert labelled as such in its justification
pub fn over_sensitive_alert(context: &ProposalContext, generated_on: NaiveDate) -> AlertProposal {
    AlertProposal {
        kind: METRIC_ALERT_KIND.to_string(),
        flow: Flow::Historical,
        name: "Demo checkout p50 latency above 50ms".to_string(),
        dataset: "transactions".to_string(),
        aggregate: "p50(transaction.duration)".to_string(),
        query: context.transaction_query(DEMO_TRANSACTION),
        time_window: 1,
        threshold_type: ThresholdType::Above,
        environment: context.environment.clone(),
        thresholds: Thresholds {
            warning: 30.0,
            critical: 50.0,
        },
        resolve_threshold: None,
        justification: format!(
            "DEMO FIXTURE generated {}: deliberately over-sensitive. A 50ms p50 threshold over a \
             1-minute window would page on normal checkout traffic. Reject this proposal during review.",
            generated_on.format("%Y-%m-%d")
        ),
        severity: Severity::Critical,
        actions: context.actions(),
    }
}
