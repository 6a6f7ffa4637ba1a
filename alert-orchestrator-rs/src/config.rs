//! Application configuration
//!
//! Resolved through the SDK's `ConfigProvider`, so command-line overrides,
//! `.env` values and the process environment share one lookup path.

use std::path::PathBuf;

use alert_sdk::config::{ConfigProvider, ConfigProviderExt};

use crate::flows::historical::ThresholdRules;
use crate::flows::service::DEFAULT_CRITICAL_KEYWORDS;

pub const DEFAULT_ENVIRONMENT: &str = "production";
pub const DEFAULT_OUTPUT_DIR: &str = "alerts";
pub const DEFAULT_NOTIFY_EMAIL: &str = "team@example.com";
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// Settings shared by every flow
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Sentry environment the rules target
    pub environment: String,
    pub output_dir: PathBuf,
    /// Recipient of alert emails
    pub notify_email: String,
    /// Root of the source tree the service flow scans
    pub service_source_path: Option<PathBuf>,
    pub demo_mode: bool,
    /// Ask the model to refine historical latency proposals
    pub enrich: bool,
    pub rules: ThresholdRules,
    pub critical_keywords: Vec<String>,
    pub dormant_marker: String,
    pub source_extensions: Vec<String>,
    pub agent_max_iterations: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: DEFAULT_ENVIRONMENT.to_string(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            notify_email: DEFAULT_NOTIFY_EMAIL.to_string(),
            service_source_path: None,
            demo_mode: false,
            enrich: true,
            rules: ThresholdRules::default(),
            critical_keywords: DEFAULT_CRITICAL_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            dormant_marker: "DORMANT".to_string(),
            source_extensions: vec!["py".to_string()],
            agent_max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl AppConfig {
    pub fn from_provider<P: ConfigProvider + ?Sized>(provider: &P) -> Self {
        let defaults = Self::default();

        Self {
            environment: provider.get_string_or("sentralert_environment", &defaults.environment),
            output_dir: provider
                .get_optional("sentralert_output_dir")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            notify_email: provider.get_string_or("alerts_notify_email", &defaults.notify_email),
            service_source_path: provider.get_optional("service_source_path").map(PathBuf::from),
            demo_mode: provider.get_bool_or("sentralert_demo_mode", defaults.demo_mode),
            enrich: provider.get_bool_or("sentralert_enrich", defaults.enrich),
            rules: defaults.rules,
            critical_keywords: provider
                .get_optional("sentralert_critical_keywords")
                .map(|v| split_list(&v))
                .unwrap_or(defaults.critical_keywords),
            dormant_marker: provider.get_string_or("sentralert_dormant_marker", &defaults.dormant_marker),
            source_extensions: provider
                .get_optional("sentralert_source_extensions")
                .map(|v| split_list(&v))
                .unwrap_or(defaults.source_extensions),
            agent_max_iterations: provider
                .get_int_or("sentralert_agent_max_iterations", defaults.agent_max_iterations as i64)
                .max(1) as u32,
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().trim_start_matches('.').to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}
