//! Alert proposals
//!
//! An `AlertProposal` is one candidate Sentry metric alert rule. Every flow
//! produces them, the writer serializes each one to its own YAML file, and
//! `apply` turns them back into Sentry API payloads.

use std::fmt;
use std::str::FromStr;

use alert_sdk::sentry::{AlertRulePayload, AlertTrigger, TriggerAction};
use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};

/// The only kind of rule sentralert drafts
pub const METRIC_ALERT_KIND: &str = "sentry.metric_alert";

/// Flow a proposal came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flow {
    Historical,
    Service,
    ServiceAnalysisAgent,
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Flow::Historical => "historical",
            Flow::Service => "service",
            Flow::ServiceAnalysisAgent => "service_analysis_agent",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        };
        f.write_str(name)
    }
}

impl FromStr for Severity {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "LOW" => Ok(Severity::Low),
            "MEDIUM" => Ok(Severity::Medium),
            "HIGH" => Ok(Severity::High),
            "CRITICAL" => Ok(Severity::Critical),
            other => Err(FlowError::InvalidProposal(format!(
                "unknown severity: {}",
                other
            ))),
        }
    }
}

/// Direction of the threshold comparison
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdType {
    #[default]
    Above,
    Below,
}

impl ThresholdType {
    /// Sentry's numeric encoding
    pub fn as_sentry(self) -> u8 {
        match self {
            ThresholdType::Above => 0,
            ThresholdType::Below => 1,
        }
    }
}

impl FromStr for ThresholdType {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "above" => Ok(ThresholdType::Above),
            "below" => Ok(ThresholdType::Below),
            other => Err(FlowError::InvalidProposal(format!(
                "unknown threshold type: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub warning: f64,
    pub critical: f64,
}

/// Notification attached to both triggers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertAction {
    #[serde(rename = "type")]
    pub action_type: String,
    pub target_type: String,
    pub target_identifier: String,
}

impl AlertAction {
    pub fn email(address: impl Into<String>) -> Self {
        Self {
            action_type: "email".to_string(),
            target_type: "specific".to_string(),
            target_identifier: address.into(),
        }
    }
}

/// One candidate metric alert rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertProposal {
    pub kind: String,
    pub flow: Flow,
    pub name: String,
    pub dataset: String,
    pub aggregate: String,
    pub query: String,
    /// Minutes
    pub time_window: u32,
    #[serde(default)]
    pub threshold_type: ThresholdType,
    pub environment: String,
    pub thresholds: Thresholds,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolve_threshold: Option<f64>,
    pub justification: String,
    pub severity: Severity,
    #[serde(default)]
    pub actions: Vec<AlertAction>,
}

impl AlertProposal {
    /// Check the invariants every proposal must satisfy before leaving a flow
    pub fn validate(&self) -> Result<()> {
        if self.kind != METRIC_ALERT_KIND {
            return Err(FlowError::InvalidProposal(format!(
                "{}: unsupported kind {}",
                self.name, self.kind
            )));
        }
        if self.name.trim().is_empty() {
            return Err(FlowError::InvalidProposal("name is empty".to_string()));
        }
        if self.justification.trim().is_empty() {
            return Err(FlowError::InvalidProposal(format!(
                "{}: justification is empty",
                self.name
            )));
        }
        if !self.thresholds.warning.is_finite() || !self.thresholds.critical.is_finite() {
            return Err(FlowError::InvalidProposal(format!(
                "{}: thresholds must be finite numbers",
                self.name
            )));
        }
        if self.aggregate.trim().is_empty() || self.time_window == 0 {
            return Err(FlowError::InvalidProposal(format!(
                "{}: aggregate and time window are required",
                self.name
            )));
        }
        Ok(())
    }

    /// Sentry API body; the critical trigger goes first
    pub fn to_rule_payload(&self, project: &str) -> AlertRulePayload {
        let actions: Vec<TriggerAction> = self
            .actions
            .iter()
            .filter(|a| {
                a.action_type == "email" && matches!(a.target_type.as_str(), "specific" | "team")
            })
            .map(|a| TriggerAction {
                action_type: a.action_type.clone(),
                target_type: a.target_type.clone(),
                target_identifier: a.target_identifier.clone(),
            })
            .collect();

        let trigger = |label: &str, threshold: f64| AlertTrigger {
            label: label.to_string(),
            alert_threshold: threshold,
            actions: actions.clone(),
        };

        AlertRulePayload {
            name: self.name.clone(),
            dataset: rule_dataset(&self.dataset).to_string(),
            query: self.query.clone(),
            aggregate: self.aggregate.clone(),
            time_window: self.time_window,
            threshold_type: self.threshold_type.as_sentry(),
            triggers: vec![
                trigger("critical", self.thresholds.critical),
                trigger("warning", self.thresholds.warning),
            ],
            projects: vec![project.to_string()],
            environment: Some(self.environment.clone()).filter(|e| !e.is_empty()),
        }
    }
}

fn rule_dataset(dataset: &str) -> &str {
    match dataset {
        "transactions" | "events" | "errors" | "sessions" => dataset,
        _ => "transactions",
    }
}

/// Dataset an aggregate is computed over
pub fn dataset_for_aggregate(aggregate: &str) -> &'static str {
    let aggregate = aggregate.to_lowercase();
    if aggregate.contains("transaction.duration")
        || aggregate.starts_with("failure_rate")
        || aggregate.starts_with("apdex")
    {
        "transactions"
    } else {
        "events"
    }
}

/// File-name slug of an alert name
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "alert".to_string()
    } else {
        slug.to_string()
    }
}

/// Field deserializers for model-written JSON, where numbers may arrive as
/// floats or numeric strings and enum names in any case
pub(crate) mod lenient {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    use super::ThresholdType;

    fn number(value: &Value) -> Option<f64> {
        let n = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        n.filter(|n| n.is_finite())
    }

    pub fn f64_opt<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        match Option::<Value>::deserialize(d)? {
            None | Some(Value::Null) => Ok(None),
            Some(value) => number(&value)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("expected a number, got {}", value))),
        }
    }

    pub fn u32_opt<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
        match Option::<Value>::deserialize(d)? {
            None | Some(Value::Null) => Ok(None),
            Some(value) => number(&value)
                .filter(|n| n.fract() == 0.0 && *n >= 0.0 && *n <= f64::from(u32::MAX))
                .map(|n| Some(n as u32))
                .ok_or_else(|| {
                    D::Error::custom(format!("expected a whole number, got {}", value))
                }),
        }
    }

    pub fn threshold_type_opt<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<ThresholdType>, D::Error> {
        match Option::<Value>::deserialize(d)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => s.parse().map(Some).map_err(D::Error::custom),
            Some(value) => Err(D::Error::custom(format!(
                "expected a threshold type, got {}",
                value
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AlertProposal {
        AlertProposal {
            kind: METRIC_ALERT_KIND.to_string(),
            flow: Flow::Historical,
            name: "GET /checkout p95 latency regression".to_string(),
            dataset: "transactions".to_string(),
            aggregate: "p95(transaction.duration)".to_string(),
            query: "event.type:transaction transaction:\"GET /checkout\" environment:production"
                .to_string(),
            time_window: 5,
            threshold_type: ThresholdType::Above,
            environment: "production".to_string(),
            thresholds: Thresholds {
                warning: 700.0,
                critical: 1000.0,
            },
            resolve_threshold: Some(550.0),
            justification: "p95 is 80% above its weekly baseline.".to_string(),
            severity: Severity::High,
            actions: vec![AlertAction::email("team@example.com")],
        }
    }

    #[test]
    fn test_yaml_round_trip() {
        let proposal = sample();
        let yaml = serde_yaml::to_string(&proposal).unwrap();

        assert!(yaml.contains("kind: sentry.metric_alert"));
        assert!(yaml.contains("flow: historical"));
        assert!(yaml.contains("timeWindow: 5"));
        assert!(yaml.contains("thresholdType: above"));
        assert!(yaml.contains("severity: HIGH"));
        assert!(yaml.contains("targetIdentifier: team@example.com"));

        let parsed: AlertProposal = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, proposal);
    }

    #[test]
    fn test_agent_flow_name() {
        let yaml = "service_analysis_agent";
        let flow: Flow = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(flow, Flow::ServiceAnalysisAgent);
        assert_eq!(flow.to_string(), yaml);
    }

    #[test]
    fn test_validate() {
        assert!(sample().validate().is_ok());

        let mut empty = sample();
        empty.justification = "  ".to_string();
        assert!(matches!(empty.validate(), Err(FlowError::InvalidProposal(_))));

        let mut nan = sample();
        nan.thresholds.critical = f64::NAN;
        assert!(nan.validate().is_err());
    }

    #[test]
    fn test_severity_parsing() {
        assert_eq!("critical".parse::<Severity>().unwrap(), Severity::Critical);
        assert_eq!(" High ".parse::<Severity>().unwrap(), Severity::High);
        assert!("severe".parse::<Severity>().is_err());
        assert!(Severity::Critical > Severity::Medium);
    }

    #[test]
    fn test_rule_payload_orders_critical_first() {
        let payload = sample().to_rule_payload("backend");

        assert_eq!(payload.triggers[0].label, "critical");
        assert_eq!(payload.triggers[0].alert_threshold, 1000.0);
        assert_eq!(payload.triggers[1].label, "warning");
        assert_eq!(payload.triggers[1].actions[0].target_identifier, "team@example.com");
        assert_eq!(payload.threshold_type, 0);
        assert_eq!(payload.projects, vec!["backend".to_string()]);
        assert_eq!(payload.environment.as_deref(), Some("production"));
    }

    #[test]
    fn test_dataset_for_aggregate() {
        assert_eq!(dataset_for_aggregate("p95(transaction.duration)"), "transactions");
        assert_eq!(dataset_for_aggregate("failure_rate()"), "transactions");
        assert_eq!(dataset_for_aggregate("count()"), "events");
    }

    #[test]
    fn test_slugify() {
        assert_eq!(
            slugify("POST /api/checkout p95 latency"),
            "post-api-checkout-p95-latency"
        );
        assert_eq!(slugify("Refund  errors!"), "refund-errors");
        assert_eq!(slugify("///"), "alert");
    }
}
