//! Flow orchestration
//!
//! Runs the selected flows one after another, keeps whatever each one
//! produced, and writes the collected proposals as YAML. A flow that fails
//! does not stop the others.

use std::path::PathBuf;
use std::sync::Arc;

use agent_tools_rs::{register_agent_tools, ToolRegistry};
use alert_sdk::anthropic::AnthropicClient;
use alert_sdk::config::{AnthropicConfig, ConfigProvider, DeepWikiConfig, SentryConfig};
use alert_sdk::deepwiki::DeepWikiClient;
use alert_sdk::sentry::SentryClient;
use alert_sdk::{CodebaseQa, MetricsSource, Reasoner};
use chrono::Utc;
use log::{debug, error, info, warn};
use serde::Serialize;

use crate::agent::{AgentRunner, AnalysisType};
use crate::config::AppConfig;
use crate::demo;
use crate::error::{FlowError, Result};
use crate::flows::historical::HistoricalFlow;
use crate::flows::service::{CodebaseScanner, KeywordClassifier, ServiceFlow};
use crate::flows::{FlowKind, FlowReport, ProposalContext};
use crate::proposal::AlertProposal;
use crate::writer::{load_existing, ProposalWriter};

/// External clients a run may use
///
/// A client that could not be built is recorded with the reason, so only the
/// flows that need it fail.
#[derive(Default)]
pub struct Services {
    pub metrics: Option<Arc<dyn MetricsSource>>,
    pub reasoner: Option<Arc<dyn Reasoner>>,
    pub codebase: Option<Arc<dyn CodebaseQa>>,
    unavailable: Vec<(&'static str, String)>,
}

impl Services {
    pub fn from_provider<P: ConfigProvider + ?Sized>(provider: &P) -> Self {
        let mut services = Self::default();

        match SentryConfig::from_provider(provider).and_then(SentryClient::new) {
            Ok(client) => services.metrics = Some(Arc::new(client)),
            Err(e) => services.mark_unavailable("sentry", e),
        }
        match AnthropicConfig::from_provider(provider).and_then(AnthropicClient::new) {
            Ok(client) => services.reasoner = Some(Arc::new(client)),
            Err(e) => services.mark_unavailable("anthropic", e),
        }
        match DeepWikiConfig::from_provider(provider).and_then(DeepWikiClient::new) {
            Ok(client) => services.codebase = Some(Arc::new(client)),
            Err(e) => services.mark_unavailable("deepwiki", e),
        }
        services
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSource>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_reasoner(mut self, reasoner: Arc<dyn Reasoner>) -> Self {
        self.reasoner = Some(reasoner);
        self
    }

    pub fn with_codebase(mut self, codebase: Arc<dyn CodebaseQa>) -> Self {
        self.codebase = Some(codebase);
        self
    }

    pub fn mark_unavailable(&mut self, service: &'static str, reason: impl ToString) {
        self.unavailable.push((service, reason.to_string()));
    }

    fn missing(&self, service: &'static str) -> FlowError {
        let reason = self
            .unavailable
            .iter()
            .find(|(name, _)| *name == service)
            .map(|(_, reason)| reason.as_str())
            .unwrap_or("not configured");
        FlowError::Configuration(format!("{} client unavailable: {}", service, reason))
    }

    fn metrics(&self) -> Result<Arc<dyn MetricsSource>> {
        self.metrics.clone().ok_or_else(|| self.missing("sentry"))
    }

    fn reasoner(&self) -> Result<Arc<dyn Reasoner>> {
        self.reasoner.clone().ok_or_else(|| self.missing("anthropic"))
    }

    fn codebase(&self) -> Result<Arc<dyn CodebaseQa>> {
        self.codebase.clone().ok_or_else(|| self.missing("deepwiki"))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FlowFailure {
    pub flow: FlowKind,
    pub error: String,
}

/// Outcome of one orchestrator run
#[derive(Debug, Default, Serialize)]
pub struct RunReport {
    pub selected: Vec<FlowKind>,
    pub reports: Vec<FlowReport>,
    pub failures: Vec<FlowFailure>,
    pub written: Vec<PathBuf>,
}

impl RunReport {
    pub fn proposals(&self) -> impl Iterator<Item = &AlertProposal> {
        self.reports.iter().flat_map(|r| r.proposals.iter())
    }

    pub fn all_failed(&self) -> bool {
        !self.selected.is_empty() && self.failures.len() == self.selected.len()
    }

    /// Non-zero only when every selected flow failed
    pub fn exit_code(&self) -> i32 {
        if self.all_failed() {
            1
        } else {
            0
        }
    }

    pub fn log_summary(&self) {
        for report in &self.reports {
            info!(
                "{} flow: {} proposals, {} skipped",
                report.flow,
                report.proposals.len(),
                report.skipped.len()
            );
        }
        if !self.failures.is_empty() && !self.all_failed() {
            let failed: Vec<String> = self
                .failures
                .iter()
                .map(|f| format!("{} ({})", f.flow, f.error))
                .collect();
            warn!("Partial failure: {}", failed.join("; "));
        }
        info!("{} alert files written", self.written.len());
    }
}

pub struct Orchestrator {
    config: AppConfig,
    services: Services,
    analysis: AnalysisType,
}

impl Orchestrator {
    pub fn new(config: AppConfig, services: Services) -> Self {
        Self {
            config,
            services,
            analysis: AnalysisType::Comprehensive,
        }
    }

    /// Analysis the agent flow performs
    pub fn with_analysis(mut self, analysis: AnalysisType) -> Self {
        self.analysis = analysis;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn context(&self) -> ProposalContext {
        ProposalContext::new(&self.config.environment, &self.config.notify_email)
    }

    /// Run the given flows, or the default ones when `flows` is empty
    pub async fn run(&self, flows: &[FlowKind]) -> Result<RunReport> {
        let mut report = RunReport::default();
        for kind in if flows.is_empty() { &FlowKind::DEFAULT[..] } else { flows } {
            if !report.selected.contains(kind) {
                report.selected.push(*kind);
            }
        }

        for kind in report.selected.clone() {
            info!("Running {} flow", kind);
            match self.run_flow(kind).await {
                Ok(flow_report) => report.reports.push(flow_report),
                Err(e) => {
                    error!("{} flow failed: {}", kind, e);
                    report.failures.push(FlowFailure {
                        flow: kind,
                        error: e.to_string(),
                    });
                }
            }
        }

        let mut proposals: Vec<AlertProposal> = report.proposals().cloned().collect();
        if self.config.demo_mode {
            info!("Demo mode: adding an over-sensitive alert for review practice");
            proposals.push(demo::over_sensitive_alert(
                &self.context(),
                Utc::now().date_naive(),
            ));
        }

        if !proposals.is_empty() {
            report.written = ProposalWriter::new(&self.config.output_dir).write_all(&proposals)?;
        }
        Ok(report)
    }

    async fn run_flow(&self, kind: FlowKind) -> Result<FlowReport> {
        match kind {
            FlowKind::Historical => {
                let mut flow = HistoricalFlow::new(
                    self.services.metrics()?,
                    self.config.rules.clone(),
                    self.context(),
                );
                if self.config.enrich {
                    match self.services.reasoner() {
                        Ok(reasoner) => flow = flow.with_reasoner(reasoner),
                        Err(e) => warn!("Latency proposals will not be reviewed: {}", e),
                    }
                }
                flow.run().await
            }
            FlowKind::Service => {
                let root = self.config.service_source_path.clone().ok_or_else(|| {
                    FlowError::Configuration("SERVICE_SOURCE_PATH is not set".to_string())
                })?;
                let classifier = KeywordClassifier::new(
                    self.config.critical_keywords.clone(),
                    self.config.dormant_marker.clone(),
                );
                let scanner =
                    CodebaseScanner::new(Arc::new(classifier), self.config.source_extensions.clone());

                ServiceFlow::new(self.services.reasoner()?, scanner, self.context(), root)
                    .with_existing_alerts(load_existing(&self.config.output_dir))
                    .run()
                    .await
            }
            FlowKind::Agent => {
                let registry = ToolRegistry::new();
                register_agent_tools(&registry, self.services.codebase()?, self.services.metrics()?)?;
                debug!("Agent has {} tools available", registry.len());

                AgentRunner::new(self.services.reasoner()?, Arc::new(registry), self.context())
                    .with_max_iterations(self.config.agent_max_iterations)
                    .run_flow(&self.analysis)
                    .await
            }
        }
    }
}
