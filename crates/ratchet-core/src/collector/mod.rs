//! Signal collector: turns analyzer diagnostics into [`EscapeSite`]s.

pub mod diagnostics;
pub mod locate;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::error::CollectionError;
use crate::domain::site::{EscapeSite, SourceSpan};
use crate::metrics::METRICS;
use crate::workspace::{relative_to, Workspace};

pub use diagnostics::{parse_output, RawDiagnostic};

/// Raw result of one analyzer invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzerOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl AnalyzerOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}

/// The external linter/compiler that reports escape annotations.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Run the analyzer over the whole source tree once.
    async fn run(&self) -> Result<AnalyzerOutput, CollectionError>;
}

/// What counts as an escape site and how much context to keep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Diagnostic rule ids that report escape annotations.
    pub escape_rules: Vec<String>,
    /// Marker text expected at the reported position.
    pub marker: String,
    /// Lines kept on each side of the marker line.
    pub context_lines: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            escape_rules: vec![
                "@typescript-eslint/no-explicit-any".to_string(),
                "no-explicit-any".to_string(),
            ],
            marker: "any".to_string(),
            context_lines: 3,
        }
    }
}

pub struct SignalCollector {
    analyzer: Arc<dyn Analyzer>,
    workspace: Arc<dyn Workspace>,
    config: CollectorConfig,
}

impl SignalCollector {
    pub fn new(
        analyzer: Arc<dyn Analyzer>,
        workspace: Arc<dyn Workspace>,
        config: CollectorConfig,
    ) -> Self {
        Self {
            analyzer,
            workspace,
            config,
        }
    }

    /// Invoke the analyzer once and return deduplicated sites ordered by
    /// (path, position).
    pub async fn collect(&self) -> Result<Vec<EscapeSite>, CollectionError> {
        let output = self.analyzer.run().await?;
        let diagnostics = parse_output(&output.stdout)?;

        if output.exit_code != 0 && diagnostics.is_empty() {
            return Err(CollectionError::AnalyzerFailed {
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }

        let sites = self.sites_from_diagnostics(&diagnostics)?;
        METRICS.add_sites_collected(sites.len() as u64);
        info!(
            diagnostics = diagnostics.len(),
            sites = sites.len(),
            "escape sites collected"
        );
        Ok(sites)
    }

    /// Current number of escape sites.
    pub async fn count(&self) -> Result<usize, CollectionError> {
        Ok(self.collect().await?.len())
    }

    fn is_escape_rule(&self, rule: Option<&str>) -> bool {
        rule.is_some_and(|r| self.config.escape_rules.iter().any(|e| e == r))
    }

    /// Build sites from parsed diagnostics, reading each file once.
    pub fn sites_from_diagnostics(
        &self,
        diagnostics: &[RawDiagnostic],
    ) -> Result<Vec<EscapeSite>, CollectionError> {
        let root = self.workspace.root().to_path_buf();
        let mut by_file: BTreeMap<PathBuf, Vec<&RawDiagnostic>> = BTreeMap::new();
        for diag in diagnostics {
            if self.is_escape_rule(diag.rule_id.as_deref()) {
                by_file
                    .entry(relative_to(&root, &diag.file))
                    .or_default()
                    .push(diag);
            }
        }

        let mut sites = Vec::new();
        for (path, diags) in by_file {
            let content = self
                .workspace
                .read(&path)
                .map_err(|source| CollectionError::Source {
                    path: path.clone(),
                    source,
                })?;
            let mut seen = HashSet::new();
            let mut in_file = Vec::new();
            for diag in diags {
                match self.build_site(&path, &content, diag) {
                    Some(site) => {
                        if seen.insert(site.span.start) {
                            in_file.push(site);
                        } else {
                            debug!(site = %site.location(), "duplicate diagnostic dropped");
                        }
                    }
                    None => warn!(
                        file = %path.display(),
                        line = diag.line,
                        column = diag.column,
                        "diagnostic does not point at an escape marker; ignored"
                    ),
                }
            }

            in_file.sort_by_key(|site| site.span.start);
            let mut occurrences: HashMap<_, usize> = HashMap::new();
            for mut site in in_file {
                let nth = occurrences.entry(site.content_hash).or_default();
                site.content_hash = EscapeSite::nth_occurrence(site.content_hash, *nth);
                *nth += 1;
                sites.push(site);
            }
        }

        sites.sort_by(|a, b| a.path.cmp(&b.path).then(a.span.start.cmp(&b.span.start)));
        Ok(sites)
    }

    fn build_site(&self, path: &Path, content: &str, diag: &RawDiagnostic) -> Option<EscapeSite> {
        let marker = &self.config.marker;
        let located = locate::locate(content, diag.line, diag.column)?;
        if !locate::marker_at(content, located.start, marker) {
            return None;
        }

        let prefix = &content[located.line_start..located.start];
        let kind = locate::infer_construct(prefix);
        let (context, context_start_line) =
            locate::context_window(content, diag.line, self.config.context_lines);

        Some(EscapeSite {
            content_hash: EscapeSite::compute_hash(path, kind, &located.line_text, diag.column),
            path: path.to_path_buf(),
            span: SourceSpan {
                start: located.start,
                end: located.start + marker.len(),
                line: diag.line,
                column: diag.column,
            },
            kind,
            marker: marker.clone(),
            line_text: located.line_text,
            context,
            context_start_line,
            rule_id: diag.rule_id.clone().unwrap_or_default(),
        })
    }
}
