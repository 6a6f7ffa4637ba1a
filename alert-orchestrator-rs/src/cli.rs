//! Command-line interface of the `sentralert` binary

use std::path::PathBuf;

use alert_sdk::config::{CompositeConfigProvider, EnvConfigProvider, MemoryConfigProvider, SentryConfig};
use alert_sdk::sentry::SentryClient;
use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use log::{error, info, warn};

use crate::agent::AnalysisType;
use crate::apply::apply_directory;
use crate::config::AppConfig;
use crate::flows::FlowKind;
use crate::orchestrator::{Orchestrator, Services};

#[derive(Parser, Debug)]
#[command(name = "sentralert")]
#[command(about = "Draft Sentry metric alert rules from production metrics and source code")]
#[command(version)]
#[command(long_about = "
sentralert proposes Sentry metric alerts as YAML files for human review.

Without a subcommand the historical and service flows run.

Examples:
  sentralert                                   # Historical + service flows
  sentralert historical --environment staging  # Metric regressions only
  sentralert service --path ../shop-api        # Scan routes of a service
  sentralert agent --analysis quick            # Tool-using model analysis
  sentralert apply alerts/                     # Push reviewed YAML to Sentry
")]
pub struct Cli {
    /// Directory the YAML proposals are written to
    #[arg(long, global = true)]
    pub output_dir: Option<PathBuf>,

    /// Sentry environment to analyze
    #[arg(long, global = true)]
    pub environment: Option<String>,

    /// Add a deliberately over-sensitive alert for review practice
    #[arg(long, global = true)]
    pub demo: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Detect latency, error and failure-rate regressions in Sentry metrics
    Historical,

    /// Scan a service's routes and draft alerts for critical endpoints
    Service {
        /// Root of the source tree (defaults to SERVICE_SOURCE_PATH)
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Let the model explore the codebase and production traces with tools
    Agent {
        #[arg(long, value_enum, default_value = "comprehensive")]
        analysis: AnalysisKind,

        /// Endpoint for endpoint-specific analysis, e.g. "POST /api/checkout"
        #[arg(long)]
        endpoint: Option<String>,

        #[arg(long)]
        max_iterations: Option<u32>,
    },

    /// Create or update Sentry alert rules from a directory of YAML files
    Apply {
        dir: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnalysisKind {
    Comprehensive,
    EndpointSpecific,
    Quick,
}

impl AnalysisKind {
    pub fn into_analysis(self, endpoint: Option<String>) -> AnalysisType {
        match (self, endpoint) {
            (AnalysisKind::Comprehensive, _) => AnalysisType::Comprehensive,
            (AnalysisKind::EndpointSpecific, Some(endpoint)) => AnalysisType::EndpointSpecific(endpoint),
            (AnalysisKind::EndpointSpecific, None) => {
                warn!("endpoint-specific analysis needs --endpoint, running a quick analysis");
                AnalysisType::Quick
            }
            (AnalysisKind::Quick, _) => AnalysisType::Quick,
        }
    }
}

impl Cli {
    /// Command-line values first, then the environment
    pub fn config_provider(&self) -> CompositeConfigProvider {
        let mut overrides = MemoryConfigProvider::new();
        if let Some(dir) = &self.output_dir {
            overrides.set("sentralert_output_dir", dir.display());
        }
        if let Some(environment) = &self.environment {
            overrides.set("sentralert_environment", environment);
        }
        if self.demo {
            overrides.set("sentralert_demo_mode", true);
        }
        match &self.command {
            Some(Commands::Service { path: Some(path) }) => {
                overrides.set("service_source_path", path.display());
            }
            Some(Commands::Agent {
                max_iterations: Some(max),
                ..
            }) => {
                overrides.set("sentralert_agent_max_iterations", max);
            }
            _ => {}
        }

        let mut provider = CompositeConfigProvider::new();
        provider.add_provider(overrides);
        provider.add_provider(EnvConfigProvider::new());
        provider
    }
}

/// Execute the parsed command and return the process exit code
pub async fn run(cli: Cli) -> anyhow::Result<i32> {
    let provider = cli.config_provider();

    if let Some(Commands::Apply { dir }) = &cli.command {
        let config = SentryConfig::from_provider(&provider).context("Sentry is not configured")?;
        let client = SentryClient::new(config)?;
        let summary = apply_directory(&client, dir)
            .await
            .with_context(|| format!("applying alerts from {}", dir.display()))?;
        info!(
            "Processed {} alerts: {} created, {} updated, {} skipped",
            summary.processed(),
            summary.created.len(),
            summary.updated.len(),
            summary.skipped.len()
        );
        return Ok(0);
    }

    let (flows, analysis) = match cli.command {
        None => (Vec::new(), AnalysisType::Comprehensive),
        Some(Commands::Historical) => (vec![FlowKind::Historical], AnalysisType::Comprehensive),
        Some(Commands::Service { .. }) => (vec![FlowKind::Service], AnalysisType::Comprehensive),
        Some(Commands::Agent {
            analysis, endpoint, ..
        }) => (vec![FlowKind::Agent], analysis.into_analysis(endpoint)),
        Some(Commands::Apply { .. }) => unreachable!("handled above"),
    };

    let config = AppConfig::from_provider(&provider);
    info!(
        "Environment {}, writing proposals to {}",
        config.environment,
        config.output_dir.display()
    );

    let orchestrator =
        Orchestrator::new(config, Services::from_provider(&provider)).with_analysis(analysis);
    let report = orchestrator.run(&flows).await?;
    report.log_summary();

    if report.all_failed() {
        error!("Every selected flow failed");
    }
    Ok(report.exit_code())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alert_sdk::config::{ConfigProvider, ConfigProviderExt};

    #[test]
    fn test_parse_agent_command() {
        let cli = Cli::parse_from([
            "sentralert",
            "agent",
            "--analysis",
            "endpoint-specific",
            "--endpoint",
            "POST /api/refund",
            "--max-iterations",
            "4",
            "--environment",
            "staging",
        ]);

        let provider = cli.config_provider();
        assert_eq!(provider.get_string("sentralert_environment").unwrap(), "staging");
        assert_eq!(provider.get_int("sentralert_agent_max_iterations").unwrap(), 4);

        match cli.command {
            Some(Commands::Agent {
                analysis, endpoint, ..
            }) => assert_eq!(
                analysis.into_analysis(endpoint),
                AnalysisType::EndpointSpecific("POST /api/refund".to_string())
            ),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_no_subcommand_and_global_flags() {
        let cli = Cli::parse_from(["sentralert", "--demo", "-v", "--output-dir", "out"]);
        assert!(cli.command.is_none());
        assert!(cli.verbose);

        let provider = cli.config_provider();
        assert!(provider.get_bool("sentralert_demo_mode").unwrap());
        assert_eq!(provider.get_string("sentralert_output_dir").unwrap(), "out");
    }

    #[test]
    fn test_apply_takes_directory() {
        let cli = Cli::parse_from(["sentralert", "apply", "alerts"]);
        assert!(matches!(cli.command, Some(Commands::Apply { dir }) if dir == PathBuf::from("alerts")));
    }

    #[test]
    fn test_endpoint_analysis_without_endpoint_falls_back() {
        assert_eq!(AnalysisKind::EndpointSpecific.into_analysis(None), AnalysisType::Quick);
    }
}
