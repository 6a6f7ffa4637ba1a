//! Push reviewed proposals to Sentry
//!
//! Reads the YAML files of a directory and creates or updates the matching
//! metric alert rules, matched by name. Files that are not metric alerts are
//! skipped; a failing file does not stop the others. Authentication failures
//! abort the run.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use alert_sdk::sentry::SentryClient;
use log::{info, warn};
use serde::Serialize;

use crate::error::{FlowError, Result};
use crate::flows::SkippedItem;
use crate::proposal::{AlertProposal, METRIC_ALERT_KIND};
use crate::writer::yaml_files;

#[derive(Debug, Default, Serialize)]
pub struct ApplySummary {
    pub project: Option<String>,
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub skipped: Vec<SkippedItem>,
}

impl ApplySummary {
    pub fn processed(&self) -> usize {
        self.created.len() + self.updated.len()
    }
}

enum Applied {
    Created(String),
    Updated(String),
    Ignored(String),
}

pub async fn apply_directory(client: &SentryClient, dir: &Path) -> Result<ApplySummary> {
    if !dir.is_dir() {
        return Err(FlowError::Configuration(format!(
            "alerts directory not found: {}",
            dir.display()
        )));
    }

    let mut summary = ApplySummary::default();
    let files = yaml_files(dir)?;
    if files.is_empty() {
        warn!("No YAML files found in {}", dir.display());
        return Ok(summary);
    }

    let project = client.resolve_project().await?;
    let mut existing: HashMap<String, String> = client
        .list_alert_rules(&project)
        .await?
        .into_iter()
        .map(|rule| (rule.name, rule.id))
        .collect();
    info!(
        "Applying {} files to project {} ({} existing rules)",
        files.len(),
        project,
        existing.len()
    );

    for path in &files {
        let label = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        match apply_file(client, &project, path, &mut existing).await {
            Ok(Applied::Created(name)) => {
                info!("Created alert: {}", name);
                summary.created.push(name);
            }
            Ok(Applied::Updated(name)) => {
                info!("Updated alert: {}", name);
                summary.updated.push(name);
            }
            Ok(Applied::Ignored(reason)) => {
                info!("Skipping {}: {}", label, reason);
                summary.skipped.push(SkippedItem::new(label, reason));
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("Error processing {}: {}", label, e);
                summary.skipped.push(SkippedItem::new(label, e));
            }
        }
    }

    summary.project = Some(project);
    Ok(summary)
}

async fn apply_file(
    client: &SentryClient,
    project: &str,
    path: &Path,
    existing: &mut HashMap<String, String>,
) -> Result<Applied> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => return Ok(Applied::Ignored(format!("unreadable: {}", e))),
    };

    let document: serde_yaml::Value = serde_yaml::from_str(&text)?;
    if document.get("kind").and_then(|k| k.as_str()) != Some(METRIC_ALERT_KIND) {
        return Ok(Applied::Ignored("not a metric alert".to_string()));
    }

    let proposal: AlertProposal = serde_yaml::from_value(document)?;
    proposal.validate()?;
    let payload = proposal.to_rule_payload(project);

    match existing.get(&proposal.name) {
        Some(rule_id) => {
            client.update_alert_rule(project, rule_id, &payload).await?;
            Ok(Applied::Updated(proposal.name))
        }
        None => {
            let rule = client.create_alert_rule(project, &payload).await?;
            existing.insert(proposal.name.clone(), rule.id);
            Ok(Applied::Created(proposal.name))
        }
    }
}
