//! Sentry API data models

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One row of a Discover result, keyed by field name (`transaction`,
/// `p95(transaction.duration)`, `count()`, ...)
pub type EventRow = Map<String, Value>;

/// A Discover (`/organizations/{org}/events/`) query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoverQuery {
    pub fields: Vec<String>,
    pub query: String,
    pub stats_period: String,
    pub per_page: u32,
}

impl DiscoverQuery {
    pub fn new(query: impl Into<String>, stats_period: impl Into<String>) -> Self {
        Self {
            fields: Vec::new(),
            query: query.into(),
            stats_period: stats_period.into(),
            per_page: 100,
        }
    }

    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.fields.push(field.into());
        self
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Query string parameters in the order Sentry expects them
    pub fn to_params(&self, project: Option<&str>) -> Vec<(String, String)> {
        let mut params = vec![
            ("statsPeriod".to_string(), self.stats_period.clone()),
            ("query".to_string(), self.query.clone()),
            ("per_page".to_string(), self.per_page.to_string()),
        ];
        if let Some(project) = project {
            params.push(("project".to_string(), project.to_string()));
        }
        params.extend(self.fields.iter().map(|f| ("field".to_string(), f.clone())));
        params
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct DiscoverResponse {
    #[serde(default)]
    pub data: Vec<EventRow>,
}

/// String value of a row field
pub fn row_str<'a>(row: &'a EventRow, key: &str) -> Option<&'a str> {
    row.get(key).and_then(Value::as_str)
}

/// Numeric value of a row field; Sentry sometimes returns numbers as strings
pub fn row_f64(row: &EventRow, key: &str) -> Option<f64> {
    match row.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Organization project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub slug: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// A metric alert rule as returned by Sentry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Action attached to an alert trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerAction {
    #[serde(rename = "type")]
    pub action_type: String,
    pub target_type: String,
    pub target_identifier: String,
}

/// Warning or critical trigger of a metric alert rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertTrigger {
    pub label: String,
    pub alert_threshold: f64,
    pub actions: Vec<TriggerAction>,
}

/// Body for creating or updating a metric alert rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRulePayload {
    pub name: String,
    pub dataset: String,
    pub query: String,
    pub aggregate: String,
    pub time_window: u32,
    /// 0 = above, 1 = below
    pub threshold_type: u8,
    pub triggers: Vec<AlertTrigger>,
    pub projects: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}
