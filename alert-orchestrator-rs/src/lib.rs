//! # sentralert
//!
//! Drafts Sentry metric alert rules for human review.
//!
//! - `flows::historical`: threshold rules over production metrics
//! - `flows::service`: route scanning of a Python service
//! - `agent`: a hosted model exploring the codebase and traces with tools
//! - `orchestrator`: runs the flows and writes one YAML file per proposal
//! - `apply`: pushes reviewed YAML files to Sentry

pub mod agent;
pub mod apply;
pub mod cli;
pub mod config;
pub mod demo;
pub mod error;
pub mod flows;
pub mod orchestrator;
pub mod proposal;
pub mod writer;

pub use agent::{AgentReport, AgentRunner, AnalysisType, ExecutionTraceEntry};
pub use config::AppConfig;
pub use error::{FlowError, Result};
pub use flows::{FlowKind, FlowReport, SkippedItem};
pub use orchestrator::{Orchestrator, RunReport, Services};
pub use proposal::{AlertProposal, Flow, Severity, ThresholdType, Thresholds};

#[cfg(test)]
mod tests;
