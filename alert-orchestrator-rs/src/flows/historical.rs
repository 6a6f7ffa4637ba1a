//! Historical flow
//!
//! Pulls a 7-day baseline and the last hour of transaction metrics from
//! Sentry, folds them into one `MetricSnapshot` per transaction and runs three
//! independent threshold rules over every snapshot:
//!
//! - latency regression against the weekly p95 baseline
//! - error spike over the last hour
//! - failure rate over the last hour
//!
//! Latency proposals can optionally be reviewed by the model, which may rename
//! them, rewrite the justification, adjust thresholds or reject the
//! regression as not significant. Severity always comes from the rule.

use std::collections::HashMap;
use std::sync::Arc;

use alert_sdk::sentry::{row_f64, row_str, DiscoverQuery, EventRow};
use alert_sdk::util::extract_json_block;
use alert_sdk::{MetricsSource, Reasoner};
use log::{debug, info, warn};
use serde::Deserialize;

use crate::error::{FlowError, Result};
use crate::flows::{FlowKind, FlowReport, ProposalContext};
use crate::proposal::{
    lenient, AlertProposal, Flow, Severity, ThresholdType, Thresholds, METRIC_ALERT_KIND,
};

const TRANSACTION: &str = "transaction";
const P95: &str = "p95(transaction.duration)";
const FAILURE_RATE: &str = "failure_rate()";
const COUNT: &str = "count()";

const BASELINE_PERIOD: &str = "7d";
const CURRENT_PERIOD: &str = "1h";

const REVIEW_TEMPERATURE: f32 = 0.0;

/// Point-in-time metrics of one transaction
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSnapshot {
    pub transaction_name: String,
    pub p95_duration_ms: f64,
    /// None when the baseline window has no row for the transaction
    pub baseline_p95_duration_ms: Option<f64>,
    pub error_count_per_hour: f64,
    /// Between 0 and 1
    pub failure_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    LatencyRegression,
    ErrorSpike,
    FailureRate,
}

/// Constants of the three rules
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdRules {
    /// Fires when p95 exceeds baseline by this factor
    pub latency_ratio: f64,
    /// Above this factor the regression is CRITICAL
    pub latency_critical_ratio: f64,
    /// p95 must also exceed this many milliseconds
    pub latency_floor_ms: f64,
    pub latency_resolve_ratio: f64,
    pub error_count_per_hour: f64,
    pub error_thresholds: Thresholds,
    pub failure_rate: f64,
    pub failure_thresholds: Thresholds,
    /// Window, in minutes, of latency and failure-rate rules
    pub time_window: u32,
    /// Window, in minutes, of the error spike rule
    pub error_time_window: u32,
}

impl Default for ThresholdRules {
    fn default() -> Self {
        Self {
            latency_ratio: 1.4,
            latency_critical_ratio: 2.0,
            latency_floor_ms: 500.0,
            latency_resolve_ratio: 1.1,
            error_count_per_hour: 50.0,
            error_thresholds: Thresholds {
                warning: 30.0,
                critical: 50.0,
            },
            failure_rate: 0.05,
            failure_thresholds: Thresholds {
                warning: 0.03,
                critical: 0.05,
            },
            time_window: 5,
            error_time_window: 60,
        }
    }
}

impl ThresholdRules {
    pub fn latency_fires(&self, snapshot: &MetricSnapshot) -> bool {
        match snapshot.baseline_p95_duration_ms {
            Some(baseline) => {
                snapshot.p95_duration_ms > baseline * self.latency_ratio
                    && snapshot.p95_duration_ms > self.latency_floor_ms
            }
            None => false,
        }
    }

    /// Value the latency thresholds scale from; a zero baseline falls back
    /// to the floor so the warning threshold lands on it
    fn latency_anchor(&self, baseline: f64) -> f64 {
        if baseline > 0.0 {
            baseline
        } else {
            self.latency_floor_ms / self.latency_ratio
        }
    }

    pub fn error_spike_fires(&self, snapshot: &MetricSnapshot) -> bool {
        snapshot.error_count_per_hour > self.error_count_per_hour
    }

    pub fn failure_rate_fires(&self, snapshot: &MetricSnapshot) -> bool {
        snapshot.failure_rate > self.failure_rate
    }

    fn latency_severity(&self, snapshot: &MetricSnapshot) -> Severity {
        let baseline = snapshot.baseline_p95_duration_ms.unwrap_or_default();
        if snapshot.p95_duration_ms > baseline * self.latency_critical_ratio {
            Severity::Critical
        } else {
            Severity::High
        }
    }

    fn error_severity(&self, count: f64) -> Severity {
        if count > self.error_count_per_hour * 4.0 {
            Severity::Critical
        } else if count > self.error_count_per_hour * 2.0 {
            Severity::High
        } else {
            Severity::Medium
        }
    }

    /// Every rule that fires for one snapshot, with its proposal
    pub fn evaluate_snapshot(
        &self,
        snapshot: &MetricSnapshot,
        context: &ProposalContext,
    ) -> Vec<(RuleKind, AlertProposal)> {
        let mut fired = Vec::new();
        if self.latency_fires(snapshot) {
            fired.push((RuleKind::LatencyRegression, self.latency_proposal(snapshot, context)));
        }
        if self.error_spike_fires(snapshot) {
            fired.push((RuleKind::ErrorSpike, self.error_proposal(snapshot, context)));
        }
        if self.failure_rate_fires(snapshot) {
            fired.push((RuleKind::FailureRate, self.failure_proposal(snapshot, context)));
        }
        fired
    }

    pub fn evaluate(
        &self,
        snapshots: &[MetricSnapshot],
        context: &ProposalContext,
    ) -> Vec<AlertProposal> {
        snapshots
            .iter()
            .flat_map(|s| self.evaluate_snapshot(s, context))
            .map(|(_, proposal)| proposal)
            .collect()
    }

    fn latency_proposal(&self, s: &MetricSnapshot, context: &ProposalContext) -> AlertProposal {
        let baseline = s.baseline_p95_duration_ms.unwrap_or_default();
        let anchor = self.latency_anchor(baseline);

        AlertProposal {
            kind: METRIC_ALERT_KIND.to_string(),
            flow: Flow::Historical,
            name: format!("{} p95 latency regression", s.transaction_name),
            dataset: "transactions".to_string(),
            aggregate: P95.to_string(),
            query: context.transaction_query(&s.transaction_name),
            time_window: self.time_window,
            threshold_type: ThresholdType::Above,
            environment: context.environment.clone(),
            thresholds: Thresholds {
                warning: (anchor * self.latency_ratio).round(),
                critical: (anchor * self.latency_critical_ratio).round(),
            },
            resolve_threshold: Some((anchor * self.latency_resolve_ratio).round()),
            justification: format!(
                "p95 latency of {} is {:.0}ms over the last hour against a 7-day baseline of {:.0}ms, a {} regression above the {:.0}ms floor.",
                s.transaction_name,
                s.p95_duration_ms,
                baseline,
                regression_label(s.p95_duration_ms, baseline),
                self.latency_floor_ms
            ),
            severity: self.latency_severity(s),
            actions: context.actions(),
        }
    }

    fn error_proposal(&self, s: &MetricSnapshot, context: &ProposalContext) -> AlertProposal {
        AlertProposal {
            kind: METRIC_ALERT_KIND.to_string(),
            flow: Flow::Historical,
            name: format!("{} error rate spike", s.transaction_name),
            dataset: "events".to_string(),
            aggregate: COUNT.to_string(),
            query: context.endpoint_query("events", &s.transaction_name),
            time_window: self.error_time_window,
            threshold_type: ThresholdType::Above,
            environment: context.environment.clone(),
            thresholds: self.error_thresholds,
            resolve_threshold: None,
            justification: format!(
                "Detected {:.0} errors in the last hour for {}, which exceeds the normal baseline of {:.0} per hour.",
                s.error_count_per_hour, s.transaction_name, self.error_count_per_hour
            ),
            severity: self.error_severity(s.error_count_per_hour),
            actions: context.actions(),
        }
    }

    fn failure_proposal(&self, s: &MetricSnapshot, context: &ProposalContext) -> AlertProposal {
        AlertProposal {
            kind: METRIC_ALERT_KIND.to_string(),
            flow: Flow::Historical,
            name: format!("{} high failure rate", s.transaction_name),
            dataset: "transactions".to_string(),
            aggregate: FAILURE_RATE.to_string(),
            query: context.transaction_query(&s.transaction_name),
            time_window: self.time_window,
            threshold_type: ThresholdType::Above,
            environment: context.environment.clone(),
            thresholds: self.failure_thresholds,
            resolve_threshold: None,
            justification: format!(
                "Current failure rate of {} is {:.1}%, which is critically high for a user-facing endpoint.",
                s.transaction_name,
                s.failure_rate * 100.0
            ),
            severity: Severity::Critical,
            actions: context.actions(),
        }
    }
}

/// Build snapshots from the current, baseline and error rows
///
/// Rows missing a required field are recorded as skipped in `report`.
pub fn assemble_snapshots(
    current: &[EventRow],
    baseline: &[EventRow],
    errors: &[EventRow],
    report: &mut FlowReport,
) -> Vec<MetricSnapshot> {
    let baselines: HashMap<&str, f64> = baseline
        .iter()
        .filter_map(|row| Some((row_str(row, TRANSACTION)?, row_f64(row, P95)?)))
        .collect();

    let mut error_counts: HashMap<&str, f64> = HashMap::new();
    for row in errors {
        if let (Some(tx), Some(count)) = (row_str(row, TRANSACTION), row_f64(row, COUNT)) {
            *error_counts.entry(tx).or_default() += count;
        }
    }

    let mut snapshots = Vec::with_capacity(current.len());
    for (index, row) in current.iter().enumerate() {
        let Some(name) = row_str(row, TRANSACTION).filter(|n| !n.is_empty()) else {
            report.skip(format!("row {}", index), "missing transaction name");
            continue;
        };
        let Some(p95) = row_f64(row, P95) else {
            report.skip(name, format!("missing {}", P95));
            continue;
        };
        let Some(failure_rate) = row_f64(row, FAILURE_RATE) else {
            report.skip(name, format!("missing {}", FAILURE_RATE));
            continue;
        };
        if !(0.0..=1.0).contains(&failure_rate) {
            report.skip(name, format!("failure rate out of range: {}", failure_rate));
            continue;
        }

        snapshots.push(MetricSnapshot {
            transaction_name: name.to_string(),
            p95_duration_ms: p95,
            baseline_p95_duration_ms: baselines.get(name).copied(),
            error_count_per_hour: error_counts.get(name).copied().unwrap_or(0.0),
            failure_rate,
        });
    }
    snapshots
}

/// Model review of a latency proposal
#[derive(Debug, Default, Deserialize)]
struct LatencyReview {
    alert_name: Option<String>,
    justification: Option<String>,
    severity: Option<String>,
    #[serde(default, deserialize_with = "lenient::f64_opt")]
    warning_threshold_ms: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64_opt")]
    critical_threshold_ms: Option<f64>,
    is_legitimate: Option<bool>,
}

/// Relative regression as a percentage, `n/a` against a zero baseline
fn regression_label(now: f64, base: f64) -> String {
    if base > 0.0 {
        format!("{:.1}%", (now / base - 1.0) * 100.0)
    } else {
        "n/a".to_string()
    }
}

fn review_prompt(snapshot: &MetricSnapshot) -> String {
    let base = snapshot.baseline_p95_duration_ms.unwrap_or_default();
    let now = snapshot.p95_duration_ms;
    format!(
        r#"Analyze this latency regression:

TRANSACTION: {tx}
- Baseline p95 (7d): {base:.0}ms
- Current p95 (1h): {now:.0}ms
- Regression: {pct}

Respond with valid JSON only:
{{
  "alert_name": "brief descriptive name",
  "justification": "2-3 sentences explaining why this alert is needed",
  "severity": "LOW/MEDIUM/HIGH/CRITICAL",
  "warning_threshold_ms": <number>,
  "critical_threshold_ms": <number>,
  "is_legitimate": true/false
}}

Only mark is_legitimate=true if regression > 30% and current latency > 500ms.
"#,
        tx = snapshot.transaction_name,
        base = base,
        now = now,
        pct = regression_label(now, base),
    )
}

/// Apply a review; `None` when the model rejected the regression
fn apply_review(mut proposal: AlertProposal, review: LatencyReview) -> Option<AlertProposal> {
    if review.is_legitimate == Some(false) {
        return None;
    }

    if let Some(name) = review.alert_name.filter(|n| !n.trim().is_empty()) {
        proposal.name = name.trim().to_string();
    }
    if let Some(justification) = review.justification.filter(|j| !j.trim().is_empty()) {
        proposal.justification = justification.trim().to_string();
    }
    if let (Some(warning), Some(critical)) = (review.warning_threshold_ms, review.critical_threshold_ms) {
        if warning.is_finite() && critical.is_finite() && warning > 0.0 && warning <= critical {
            proposal.thresholds = Thresholds { warning, critical };
        }
    }
    if let Some(severity) = review.severity {
        if !severity.eq_ignore_ascii_case(&proposal.severity.to_string()) {
            debug!(
                "Keeping rule severity {} for {} (model suggested {})",
                proposal.severity, proposal.name, severity
            );
        }
    }
    Some(proposal)
}

/// The historical flow over a metrics source
pub struct HistoricalFlow {
    metrics: Arc<dyn MetricsSource>,
    reasoner: Option<Arc<dyn Reasoner>>,
    rules: ThresholdRules,
    context: ProposalContext,
}

impl HistoricalFlow {
    pub fn new(metrics: Arc<dyn MetricsSource>, rules: ThresholdRules, context: ProposalContext) -> Self {
        Self {
            metrics,
            reasoner: None,
            rules,
            context,
        }
    }

    /// Review latency proposals with the model
    pub fn with_reasoner(mut self, reasoner: Arc<dyn Reasoner>) -> Self {
        self.reasoner = Some(reasoner);
        self
    }

    pub async fn run(&self) -> Result<FlowReport> {
        let mut report = FlowReport::new(FlowKind::Historical);

        let snapshots = self.fetch_snapshots(&mut report).await?;
        info!(
            "Evaluating {} transaction snapshots in {}",
            snapshots.len(),
            self.context.environment
        );

        for snapshot in &snapshots {
            for (rule, proposal) in self.rules.evaluate_snapshot(snapshot, &self.context) {
                debug!("{:?} fired for {}", rule, snapshot.transaction_name);
                let proposal = match (rule, &self.reasoner) {
                    (RuleKind::LatencyRegression, Some(reasoner)) => {
                        match self.review(reasoner.as_ref(), snapshot, proposal).await? {
                            Some(reviewed) => reviewed,
                            None => {
                                report.skip(
                                    snapshot.transaction_name.clone(),
                                    "latency regression judged not significant",
                                );
                                continue;
                            }
                        }
                    }
                    _ => proposal,
                };
                info!("Proposed: {} ({})", proposal.name, proposal.severity);
                report.accept(proposal);
            }
        }

        Ok(report)
    }

    async fn fetch_snapshots(&self, report: &mut FlowReport) -> Result<Vec<MetricSnapshot>> {
        let transactions = format!("event.type:transaction environment:{}", self.context.environment);

        let current_query = DiscoverQuery::new(transactions.clone(), CURRENT_PERIOD)
            .fields([TRANSACTION, P95, FAILURE_RATE, COUNT]);
        let current = self.metrics.discover(&current_query).await?;

        let baseline_query =
            DiscoverQuery::new(transactions, BASELINE_PERIOD).fields([TRANSACTION, P95, COUNT]);
        let baseline = self.optional_rows(&baseline_query, "baseline metrics", report).await?;

        let errors_query = DiscoverQuery::new(
            format!("event.type:error environment:{}", self.context.environment),
            CURRENT_PERIOD,
        )
        .fields([TRANSACTION, COUNT]);
        let errors = self.optional_rows(&errors_query, "error counts", report).await?;

        Ok(assemble_snapshots(&current, &baseline, &errors, report))
    }

    /// Rows of a query the flow can do without; fatal errors still abort
    async fn optional_rows(
        &self,
        query: &DiscoverQuery,
        label: &str,
        report: &mut FlowReport,
    ) -> Result<Vec<EventRow>> {
        match self.metrics.discover(query).await {
            Ok(rows) => Ok(rows),
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(e) => {
                report.skip(label, e);
                Ok(Vec::new())
            }
        }
    }

    async fn review(
        &self,
        reasoner: &dyn Reasoner,
        snapshot: &MetricSnapshot,
        proposal: AlertProposal,
    ) -> Result<Option<AlertProposal>> {
        let text = match reasoner.analyze(&review_prompt(snapshot), REVIEW_TEMPERATURE).await {
            Ok(text) => text,
            Err(e) if e.is_fatal() => return Err(FlowError::from(e)),
            Err(e) => {
                warn!(
                    "Latency review failed for {}, keeping rule output: {}",
                    snapshot.transaction_name, e
                );
                return Ok(Some(proposal));
            }
        };

        match serde_json::from_str::<LatencyReview>(extract_json_block(&text)) {
            Ok(review) => Ok(apply_review(proposal, review)),
            Err(e) => {
                warn!(
                    "Failed to parse latency review for {}, keeping rule output: {}",
                    snapshot.transaction_name, e
                );
                Ok(Some(proposal))
            }
        }
    }
}
