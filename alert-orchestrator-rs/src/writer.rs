//! YAML output
//!
//! One file per proposal, named after the slug of the alert name. Names that
//! collide within a run get `-2`, `-3`, ... suffixes.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::Serialize;

use crate::error::Result;
use crate::proposal::{slugify, AlertProposal};

/// On-disk shape of a proposal: the proposal plus the flow that drafted it
#[derive(Serialize)]
struct ProposalFile<'a> {
    #[serde(flatten)]
    proposal: &'a AlertProposal,
    proposed_by: String,
}

pub struct ProposalWriter {
    output_dir: PathBuf,
}

impl ProposalWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write every proposal and return the paths in input order
    pub fn write_all(&self, proposals: &[AlertProposal]) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(&self.output_dir)?;

        let mut used = HashSet::new();
        let mut written = Vec::with_capacity(proposals.len());
        for proposal in proposals {
            let stem = unique_stem(&slugify(&proposal.name), &mut used);
            let path = self.output_dir.join(format!("{}.yaml", stem));

            let yaml = serde_yaml::to_string(&ProposalFile {
                proposal,
                proposed_by: proposal.flow.to_string(),
            })?;
            fs::write(&path, yaml)?;
            debug!("Wrote {}", path.display());
            written.push(path);
        }

        info!(
            "Wrote {} alert proposals to {}",
            written.len(),
            self.output_dir.display()
        );
        Ok(written)
    }
}

fn unique_stem(base: &str, used: &mut HashSet<String>) -> String {
    let mut candidate = base.to_string();
    let mut suffix = 2;
    while !used.insert(candidate.clone()) {
        candidate = format!("{}-{}", base, suffix);
        suffix += 1;
    }
    candidate
}

/// YAML files directly inside `dir`, sorted by name
pub fn yaml_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map_or(false, |e| e == "yaml" || e == "yml")
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Proposals already on disk; a missing directory means none
pub fn load_existing(dir: &Path) -> Vec<AlertProposal> {
    if !dir.is_dir() {
        return Vec::new();
    }
    let files = match yaml_files(dir) {
        Ok(files) => files,
        Err(e) => {
            warn!("Could not list {}: {}", dir.display(), e);
            return Vec::new();
        }
    };

    files
        .iter()
        .filter_map(|path| {
            let text = fs::read_to_string(path).ok()?;
            match serde_yaml::from_str::<AlertProposal>(&text) {
                Ok(proposal) => Some(proposal),
                Err(e) => {
                    debug!("Ignoring {}: {}", path.display(), e);
                    None
                }
            }
        })
        .collect()
}
