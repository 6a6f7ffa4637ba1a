//! Alert-generation flows
//!
//! - `historical`: threshold rules over Sentry transaction metrics
//! - `service`: route scanning of a source tree plus one model call per
//!   unmonitored critical endpoint
//!
//! The tool-using agent lives in `crate::agent`.

pub mod historical;
pub mod service;

use std::fmt;

use serde::Serialize;

use crate::proposal::{AlertAction, AlertProposal};

/// Selectable flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    Historical,
    Service,
    Agent,
}

impl FlowKind {
    /// Flows run when none is selected
    pub const DEFAULT: [FlowKind; 2] = [FlowKind::Historical, FlowKind::Service];
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlowKind::Historical => "historical",
            FlowKind::Service => "service",
            FlowKind::Agent => "agent",
        };
        f.write_str(name)
    }
}

/// Something a flow passed over, with the reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedItem {
    pub item: String,
    pub reason: String,
}

impl SkippedItem {
    pub fn new(item: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self {
            item: item.into(),
            reason: reason.to_string(),
        }
    }
}

/// Outcome of one flow that ran to completion
#[derive(Debug, Clone, Serialize)]
pub struct FlowReport {
    pub flow: FlowKind,
    pub proposals: Vec<AlertProposal>,
    pub skipped: Vec<SkippedItem>,
}

impl FlowReport {
    pub fn new(flow: FlowKind) -> Self {
        Self {
            flow,
            proposals: Vec::new(),
            skipped: Vec::new(),
        }
    }

    /// Record a skipped item and log it
    pub fn skip(&mut self, item: impl Into<String>, reason: impl fmt::Display) {
        let skipped = SkippedItem::new(item, reason);
        log::warn!("[{}] skipped {}: {}", self.flow, skipped.item, skipped.reason);
        self.skipped.push(skipped);
    }

    /// Keep a proposal only if it is well formed
    pub fn accept(&mut self, proposal: AlertProposal) {
        match proposal.validate() {
            Ok(()) => self.proposals.push(proposal),
            Err(e) => {
                let name = proposal.name.clone();
                self.skip(name, e);
            }
        }
    }
}

/// Values every proposal of a run shares
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalContext {
    pub environment: String,
    pub notify_email: String,
}

impl ProposalContext {
    pub fn new(environment: impl Into<String>, notify_email: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            notify_email: notify_email.into(),
        }
    }

    pub fn actions(&self) -> Vec<AlertAction> {
        vec![AlertAction::email(self.notify_email.clone())]
    }

    /// Query selecting one transaction in the configured environment
    pub fn transaction_query(&self, transaction: &str) -> String {
        format!(
            "event.type:transaction transaction:\"{}\" environment:{}",
            transaction, self.environment
        )
    }

    /// Query for one transaction, picking error events for `events` rules
    pub fn endpoint_query(&self, dataset: &str, transaction: &str) -> String {
        if dataset == "events" {
            format!(
                "event.type:error transaction:\"{}\" environment:{}",
                transaction, self.environment
            )
        } else {
            self.transaction_query(transaction)
        }
    }
}
