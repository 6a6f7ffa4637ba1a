//! Service flow
//!
//! Scans a Python web service for FastAPI/Flask route decorators, classifies
//! each endpoint with an `EndpointClassifier`, and asks the model to draft one
//! alert for every critical endpoint that no existing alert monitors.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use alert_sdk::util::extract_json_block;
use alert_sdk::Reasoner;
use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::{FlowError, Result};
use crate::flows::{FlowKind, FlowReport, ProposalContext, SkippedItem};
use crate::proposal::{
    dataset_for_aggregate, lenient, AlertProposal, Flow, Severity, ThresholdType, Thresholds,
    METRIC_ALERT_KIND,
};

pub const DEFAULT_CRITICAL_KEYWORDS: [&str; 8] = [
    "payment",
    "order",
    "refund",
    "checkout",
    "billing",
    "charge",
    "invoice",
    "subscription",
];

const DRAFT_TEMPERATURE: f32 = 0.0;
const DEFAULT_AGGREGATE: &str = "p95(transaction.duration)";
const DEFAULT_TIME_WINDOW: u32 = 5;

static DECORATOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*@[A-Za-z_][\w.]*\.(get|post|put|delete|patch|head|options|route|api_route)\s*\((.*)$",
    )
    .expect("static regex")
});

static PATH_ARG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*(?:\w+\s*=\s*)?(?:"([^"]*)"|'([^']*)')"#).expect("static regex")
});

static METHODS_ARG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"methods\s*=\s*[\[(]([^\])]*)[\])]").expect("static regex"));

static QUOTED_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"["']([A-Za-z]+)["']"#).expect("static regex"));

static FUNCTION_DEF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:async\s+)?def\s+([A-Za-z_]\w*)\s*\(").expect("static regex")
});

static DOCSTRING_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\s*[rRuU]?("""|''')(.*)$"#).expect("static regex"));

/// Where a route is declared
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceLocation {
    pub file: PathBuf,
    /// 1-based line of the decorator
    pub line: usize,
}

/// A classified route
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub path: String,
    pub method: String,
    pub function_name: String,
    pub docstring: Option<String>,
    pub is_dormant: bool,
    pub is_critical_keyword_match: bool,
    pub matched_keywords: Vec<String>,
    pub source_location: SourceLocation,
}

impl Endpoint {
    /// Transaction name Sentry records for the route
    pub fn transaction_name(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

/// Heuristics deciding which endpoints deserve an alert
pub trait EndpointClassifier: Send + Sync {
    /// Critical keywords found in the path or handler name
    fn critical_keywords(&self, path: &str, function_name: &str) -> Vec<String>;

    fn is_dormant(&self, docstring: Option<&str>) -> bool;
}

/// Keyword table with a dormant marker
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    keywords: Vec<String>,
    dormant_marker: String,
}

impl KeywordClassifier {
    pub fn new(keywords: Vec<String>, dormant_marker: impl Into<String>) -> Self {
        Self {
            keywords: keywords.into_iter().map(|k| k.to_lowercase()).collect(),
            dormant_marker: dormant_marker.into(),
        }
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new(
            DEFAULT_CRITICAL_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            "DORMANT",
        )
    }
}

impl EndpointClassifier for KeywordClassifier {
    fn critical_keywords(&self, path: &str, function_name: &str) -> Vec<String> {
        let haystack = format!("{} {}", path, function_name).to_lowercase();
        self.keywords
            .iter()
            .filter(|k| haystack.contains(k.as_str()))
            .cloned()
            .collect()
    }

    fn is_dormant(&self, docstring: Option<&str>) -> bool {
        !self.dormant_marker.is_empty()
            && docstring.map_or(false, |doc| doc.contains(&self.dormant_marker))
    }
}

/// A route declaration before classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RouteDeclaration {
    pub path: String,
    pub methods: Vec<String>,
    pub function_name: String,
    pub docstring: Option<String>,
    pub line: usize,
}

fn paren_balance(line: &str) -> i32 {
    line.chars().fold(0, |depth, c| match c {
        '(' => depth + 1,
        ')' => depth - 1,
        _ => depth,
    })
}

fn strip_comment(line: &str) -> &str {
    line.split('#').next().unwrap_or(line)
}

fn read_docstring(lines: &[&str], start: usize) -> Option<String> {
    let first = (start..lines.len()).find(|&i| !lines[i].trim().is_empty())?;
    let caps = DOCSTRING_START.captures(lines[first])?;
    let delimiter = caps.get(1)?.as_str();
    let rest = caps.get(2).map_or("", |m| m.as_str());

    if let Some(end) = rest.find(delimiter) {
        return Some(rest[..end].trim().to_string());
    }

    let mut collected = vec![rest.trim()];
    for line in &lines[first + 1..] {
        if let Some(end) = line.find(delimiter) {
            collected.push(line[..end].trim());
            break;
        }
        collected.push(line.trim());
    }
    Some(collected.join("\n").trim().to_string())
}

/// Extract route declarations from one Python source file
///
/// Returns the routes and, for every decorator that could not be understood,
/// its 1-based line with the reason.
pub(crate) fn parse_routes(source: &str) -> (Vec<RouteDeclaration>, Vec<(usize, String)>) {
    let lines: Vec<&str> = source.lines().collect();
    let mut routes = Vec::new();
    let mut malformed = Vec::new();

    for (index, line) in lines.iter().enumerate() {
        let Some(caps) = DECORATOR.captures(line) else {
            continue;
        };
        let line_no = index + 1;
        let verb = caps[1].to_lowercase();
        let mut args = caps.get(2).map_or("", |m| m.as_str());

        // Skip to the end of a decorator spanning several lines
        let mut depth = 1 + paren_balance(args);
        let mut next = index + 1;
        if args.trim().is_empty() && next < lines.len() {
            args = lines[next];
        }
        while depth > 0 && next < lines.len() {
            depth += paren_balance(strip_comment(lines[next]));
            next += 1;
        }

        let Some(path_caps) = PATH_ARG.captures(args) else {
            malformed.push((line_no, "route decorator without a literal path".to_string()));
            continue;
        };
        let path = path_caps
            .get(1)
            .or_else(|| path_caps.get(2))
            .map_or("", |m| m.as_str());
        let path = if path.is_empty() { "/" } else { path }.to_string();

        let methods = if verb == "route" || verb == "api_route" {
            let declared: Vec<String> = METHODS_ARG
                .captures(args)
                .map(|m| {
                    QUOTED_WORD
                        .captures_iter(&m[1])
                        .map(|q| q[1].to_uppercase())
                        .collect()
                })
                .unwrap_or_default();
            if declared.is_empty() {
                vec!["GET".to_string()]
            } else {
                declared
            }
        } else {
            vec![verb.to_uppercase()]
        };

        let mut def = None;
        for (offset, candidate) in lines[next.min(lines.len())..].iter().enumerate() {
            let trimmed = candidate.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('@') {
                continue;
            }
            def = FUNCTION_DEF
                .captures(candidate)
                .map(|c| (next + offset, c[1].to_string()));
            break;
        }
        let Some((def_index, function_name)) = def else {
            malformed.push((line_no, "route decorator not followed by a function".to_string()));
            continue;
        };

        let docstring = (def_index..lines.len())
            .find(|&i| strip_comment(lines[i]).trim_end().ends_with(':'))
            .and_then(|i| read_docstring(&lines, i + 1));

        routes.push(RouteDeclaration {
            path,
            methods,
            function_name,
            docstring,
            line: line_no,
        });
    }

    (routes, malformed)
}

/// Result of scanning a source tree
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub endpoints: Vec<Endpoint>,
    pub skipped: Vec<SkippedItem>,
    pub files_scanned: usize,
}

/// Walks a source tree and classifies its routes
pub struct CodebaseScanner {
    classifier: Arc<dyn EndpointClassifier>,
    extensions: Vec<String>,
}

fn should_skip_dir(name: &str) -> bool {
    name.starts_with('.')
        || matches!(
            name,
            "__pycache__" | "node_modules" | "venv" | "env" | "site-packages" | "build" | "dist"
        )
}

impl CodebaseScanner {
    pub fn new(classifier: Arc<dyn EndpointClassifier>, extensions: Vec<String>) -> Self {
        Self {
            classifier,
            extensions,
        }
    }

    fn wants(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map_or(false, |ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
    }

    pub fn scan(&self, root: &Path) -> Result<ScanOutcome> {
        if !root.exists() {
            return Err(FlowError::Configuration(format!(
                "source path does not exist: {}",
                root.display()
            )));
        }

        let mut outcome = ScanOutcome::default();
        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0
                    || !e.file_type().is_dir()
                    || e.file_name().to_str().map_or(true, |n| !should_skip_dir(n))
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let item = e
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| root.display().to_string());
                    outcome.skipped.push(SkippedItem::new(item, e));
                    continue;
                }
            };
            if !entry.file_type().is_file() || !self.wants(entry.path()) {
                continue;
            }

            match fs::read_to_string(entry.path()) {
                Ok(source) => self.scan_source(entry.path(), &source, &mut outcome),
                Err(e) => outcome
                    .skipped
                    .push(SkippedItem::new(entry.path().display().to_string(), e)),
            }
        }

        debug!(
            "Scanned {} files under {}: {} endpoints",
            outcome.files_scanned,
            root.display(),
            outcome.endpoints.len()
        );
        Ok(outcome)
    }

    /// Classify the routes of one already-read file
    pub fn scan_source(&self, file: &Path, source: &str, outcome: &mut ScanOutcome) {
        outcome.files_scanned += 1;
        let (routes, malformed) = parse_routes(source);

        for (line, reason) in malformed {
            outcome
                .skipped
                .push(SkippedItem::new(format!("{}:{}", file.display(), line), reason));
        }

        for route in routes {
            let matched_keywords = self
                .classifier
                .critical_keywords(&route.path, &route.function_name);
            let is_dormant = self.classifier.is_dormant(route.docstring.as_deref());

            for method in &route.methods {
                outcome.endpoints.push(Endpoint {
                    path: route.path.clone(),
                    method: method.clone(),
                    function_name: route.function_name.clone(),
                    docstring: route.docstring.clone(),
                    is_dormant,
                    is_critical_keyword_match: !matched_keywords.is_empty(),
                    matched_keywords: matched_keywords.clone(),
                    source_location: SourceLocation {
                        file: file.to_path_buf(),
                        line: route.line,
                    },
                });
            }
        }
    }
}

/// True when an existing alert's query names the endpoint's path
pub fn is_monitored(endpoint: &Endpoint, existing: &[AlertProposal]) -> bool {
    existing.iter().any(|alert| names_path(&alert.query, &endpoint.path))
}

fn names_path(query: &str, path: &str) -> bool {
    query.match_indices(path).any(|(start, _)| {
        query[start + path.len()..]
            .chars()
            .next()
            .map_or(true, |c| !(c.is_alphanumeric() || matches!(c, '/' | '_' | '-')))
    })
}

/// Model answer for one endpoint
#[derive(Debug, Default, Deserialize)]
struct EndpointDraft {
    alert_name: Option<String>,
    justification: Option<String>,
    severity: Option<String>,
    aggregate: Option<String>,
    #[serde(default, deserialize_with = "lenient::f64_opt")]
    warning_threshold: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64_opt")]
    critical_threshold: Option<f64>,
    #[serde(default, deserialize_with = "lenient::u32_opt")]
    time_window: Option<u32>,
    #[serde(default, deserialize_with = "lenient::threshold_type_opt")]
    threshold_type: Option<ThresholdType>,
}

fn draft_prompt(endpoint: &Endpoint, environment: &str) -> String {
    let keywords = if endpoint.matched_keywords.is_empty() {
        "none".to_string()
    } else {
        endpoint.matched_keywords.join(", ")
    };
    format!(
        r#"Draft a Sentry metric alert for this API endpoint:

ENDPOINT: {method} {path}
- Handler: {function} ({file}:{line})
- Critical keywords matched: {keywords}
- Marked dormant: {dormant}
- Docstring: {doc}
- Environment: {environment}

Dormant endpoints are expected to see little or no traffic, so unexpected
activity or errors on them matter as much as slowness on busy endpoints.

Respond with valid JSON only:
{{
  "alert_name": "brief descriptive name",
  "justification": "2-3 sentences explaining why this alert is needed",
  "severity": "LOW/MEDIUM/HIGH/CRITICAL",
  "aggregate": "p95(transaction.duration) | failure_rate() | count()",
  "warning_threshold": <number>,
  "critical_threshold": <number>,
  "time_window": <minutes>
}}
"#,
        method = endpoint.method,
        path = endpoint.path,
        function = endpoint.function_name,
        file = endpoint.source_location.file.display(),
        line = endpoint.source_location.line,
        keywords = keywords,
        dormant = if endpoint.is_dormant { "yes" } else { "no" },
        doc = endpoint.docstring.as_deref().unwrap_or("(none)"),
        environment = environment,
    )
}

fn build_proposal(
    endpoint: &Endpoint,
    draft: EndpointDraft,
    context: &ProposalContext,
) -> std::result::Result<AlertProposal, String> {
    let justification = draft
        .justification
        .filter(|j| !j.trim().is_empty())
        .ok_or("model response has no justification")?;
    let severity: Severity = draft
        .severity
        .ok_or("model response has no severity")?
        .parse()
        .map_err(|e: FlowError| e.to_string())?;
    let (Some(warning), Some(critical)) = (draft.warning_threshold, draft.critical_threshold) else {
        return Err("model response is missing thresholds".to_string());
    };

    let transaction = endpoint.transaction_name();
    let aggregate = draft
        .aggregate
        .filter(|a| !a.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_AGGREGATE.to_string());
    let dataset = dataset_for_aggregate(&aggregate);
    let query = context.endpoint_query(dataset, &transaction);

    Ok(AlertProposal {
        kind: METRIC_ALERT_KIND.to_string(),
        flow: Flow::Service,
        name: draft
            .alert_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("{} monitoring", transaction)),
        dataset: dataset.to_string(),
        aggregate,
        query,
        time_window: draft.time_window.unwrap_or(DEFAULT_TIME_WINDOW),
        threshold_type: draft.threshold_type.unwrap_or_default(),
        environment: context.environment.clone(),
        thresholds: Thresholds { warning, critical },
        resolve_threshold: None,
        justification: justification.trim().to_string(),
        severity,
        actions: context.actions(),
    })
}

/// The service flow over one source tree
pub struct ServiceFlow {
    reasoner: Arc<dyn Reasoner>,
    scanner: CodebaseScanner,
    context: ProposalContext,
    source_root: PathBuf,
    existing: Vec<AlertProposal>,
}

impl ServiceFlow {
    pub fn new(
        reasoner: Arc<dyn Reasoner>,
        scanner: CodebaseScanner,
        context: ProposalContext,
        source_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            reasoner,
            scanner,
            context,
            source_root: source_root.into(),
            existing: Vec::new(),
        }
    }

    /// Alerts already on disk; endpoints they cover are not drafted again
    pub fn with_existing_alerts(mut self, existing: Vec<AlertProposal>) -> Self {
        self.existing = existing;
        self
    }

    pub async fn run(&self) -> Result<FlowReport> {
        let mut report = FlowReport::new(FlowKind::Service);

        let outcome = self.scanner.scan(&self.source_root)?;
        for skipped in outcome.skipped {
            report.skip(skipped.item, skipped.reason);
        }

        let critical: Vec<&Endpoint> = outcome
            .endpoints
            .iter()
            .filter(|e| e.is_critical_keyword_match)
            .collect();
        info!(
            "Found {} endpoints in {} files, {} critical",
            outcome.endpoints.len(),
            outcome.files_scanned,
            critical.len()
        );

        let mut seen = HashSet::new();
        for endpoint in critical {
            let transaction = endpoint.transaction_name();
            if !seen.insert(transaction.clone()) {
                continue;
            }
            if is_monitored(endpoint, &self.existing) {
                info!("{} already has an alert", transaction);
                continue;
            }

            let prompt = draft_prompt(endpoint, &self.context.environment);
            let text = match self.reasoner.analyze(&prompt, DRAFT_TEMPERATURE).await {
                Ok(text) => text,
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    report.skip(transaction, e);
                    continue;
                }
            };

            let draft = match serde_json::from_str::<EndpointDraft>(extract_json_block(&text)) {
                Ok(draft) => draft,
                Err(e) => {
                    report.skip(transaction, format!("unparseable model response: {}", e));
                    continue;
                }
            };

            match build_proposal(endpoint, draft, &self.context) {
                Ok(proposal) => {
                    info!("Proposed: {} ({})", proposal.name, proposal.severity);
                    report.accept(proposal);
                }
                Err(reason) => report.skip(transaction, reason),
            }
        }

        Ok(report)
    }
}
