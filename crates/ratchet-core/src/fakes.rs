//! In-memory fakes for the capability traits (testing only)
//!
//! Provides `MemoryWorkspace`, `MemoryBlobStore`, `ScanningAnalyzer`,
//! `FailingAnalyzer` and `ScriptedTypeChecker`, enough to run whole campaigns
//! without a filesystem, a linter or a compiler.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;

use crate::cas::{self, BlobStore, CasError, Digest};
use crate::collector::{Analyzer, AnalyzerOutput};
use crate::domain::error::CollectionError;
use crate::safety::{CheckerError, TypeChecker, Validation};
use crate::workspace::Workspace;

// ---------------------------------------------------------------------------
// MemoryWorkspace
// ---------------------------------------------------------------------------

/// Source tree held in a `BTreeMap<relative path, content>`.
#[derive(Debug)]
pub struct MemoryWorkspace {
    root: PathBuf,
    files: Mutex<BTreeMap<PathBuf, String>>,
    writes: AtomicUsize,
}

impl Default for MemoryWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryWorkspace {
    pub fn new() -> Self {
        Self {
            root: PathBuf::from("/workspace"),
            files: Mutex::new(BTreeMap::new()),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn with_file(self, path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        self.insert(path, content);
        self
    }

    pub fn insert(&self, path: impl Into<PathBuf>, content: impl Into<String>) {
        self.files.lock().unwrap().insert(path.into(), content.into());
    }

    pub fn get(&self, path: impl AsRef<Path>) -> Option<String> {
        self.files.lock().unwrap().get(path.as_ref()).cloned()
    }

    /// Copy of every file, for byte-for-byte comparisons.
    pub fn files(&self) -> BTreeMap<PathBuf, String> {
        self.files.lock().unwrap().clone()
    }

    /// Number of `write` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn key(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.root).unwrap_or(path).to_path_buf()
    }
}

fn not_found(path: &Path) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("{} not in memory workspace", path.display()),
    )
}

impl Workspace for MemoryWorkspace {
    fn root(&self) -> &Path {
        &self.root
    }

    fn read(&self, path: &Path) -> std::io::Result<String> {
        self.files
            .lock()
            .unwrap()
            .get(&self.key(path))
            .cloned()
            .ok_or_else(|| not_found(path))
    }

    fn write(&self, path: &Path, content: &str) -> std::io::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.files
            .lock()
            .unwrap()
            .insert(self.key(path), content.to_string());
        Ok(())
    }

    fn remove(&self, path: &Path) -> std::io::Result<()> {
        self.files.lock().unwrap().remove(&self.key(path));
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.lock().unwrap().contains_key(&self.key(path))
    }
}

// ---------------------------------------------------------------------------
// MemoryBlobStore
// ---------------------------------------------------------------------------

/// Content-addressed store backed by a `HashMap<Digest, bytes>`.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<Digest, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, data: &[u8]) -> cas::Result<Digest> {
        let digest = Digest::compute(data);
        self.blobs.lock().unwrap().insert(digest, data.to_vec());
        Ok(digest)
    }

    fn get(&self, digest: &Digest) -> cas::Result<Vec<u8>> {
        self.blobs
            .lock()
            .unwrap()
            .get(digest)
            .cloned()
            .ok_or(CasError::NotFound(*digest))
    }

    fn exists(&self, digest: &Digest) -> cas::Result<bool> {
        Ok(self.blobs.lock().unwrap().contains_key(digest))
    }
}

// ---------------------------------------------------------------------------
// Analyzers
// ---------------------------------------------------------------------------

/// Reports every whole-word `any` in the code part of each line (before a
/// `//` comment) as ESLint JSON, the way `eslint --format json` would.
pub struct ScanningAnalyzer {
    workspace: Arc<MemoryWorkspace>,
    rule_id: String,
    runs: AtomicUsize,
}

impl ScanningAnalyzer {
    pub fn new(workspace: Arc<MemoryWorkspace>) -> Self {
        Self {
            workspace,
            rule_id: "@typescript-eslint/no-explicit-any".to_string(),
            runs: AtomicUsize::new(0),
        }
    }

    /// Number of times the analyzer has been run.
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// Current number of `any` markers, without going through a run.
    pub fn current_count(&self) -> usize {
        self.scan().iter().map(|(_, m)| m.len()).sum()
    }

    fn scan(&self) -> Vec<(PathBuf, Vec<(u32, u32)>)> {
        let re = Regex::new(r"\bany\b").unwrap();
        self.workspace
            .files()
            .into_iter()
            .map(|(path, content)| {
                let mut hits = Vec::new();
                for (idx, line) in content.lines().enumerate() {
                    let code = line.split("//").next().unwrap_or_default();
                    for m in re.find_iter(code) {
                        let column = code[..m.start()].chars().count() as u32 + 1;
                        hits.push((idx as u32 + 1, column));
                    }
                }
                (path, hits)
            })
            .filter(|(_, hits)| !hits.is_empty())
            .collect()
    }
}

#[async_trait]
impl Analyzer for ScanningAnalyzer {
    async fn run(&self) -> Result<AnalyzerOutput, CollectionError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let results: Vec<_> = self
            .scan()
            .into_iter()
            .map(|(path, hits)| {
                let messages: Vec<_> = hits
                    .into_iter()
                    .map(|(line, column)| {
                        json!({
                            "ruleId": self.rule_id,
                            "severity": 2,
                            "message": "Unexpected any. Specify a different type.",
                            "line": line,
                            "column": column,
                        })
                    })
                    .collect();
                json!({ "filePath": path.to_string_lossy(), "messages": messages })
            })
            .collect();
        let exit_code = if results.is_empty() { 0 } else { 1 };
        Ok(AnalyzerOutput {
            exit_code,
            stdout: serde_json::Value::Array(results).to_string(),
            stderr: String::new(),
        })
    }
}

/// Analyzer that exits with an error and no diagnostics.
pub struct FailingAnalyzer {
    pub exit_code: i32,
    pub stderr: String,
}

impl FailingAnalyzer {
    pub fn new(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stderr: stderr.into(),
        }
    }
}

#[async_trait]
impl Analyzer for FailingAnalyzer {
    async fn run(&self) -> Result<AnalyzerOutput, CollectionError> {
        Ok(AnalyzerOutput {
            exit_code: self.exit_code,
            stdout: String::new(),
            stderr: self.stderr.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// ScriptedTypeChecker
// ---------------------------------------------------------------------------

type CheckFn = dyn Fn(&MemoryWorkspace) -> Validation + Send + Sync;

/// Type checker whose verdict is computed by a closure over the workspace.
pub struct ScriptedTypeChecker {
    workspace: Arc<MemoryWorkspace>,
    check: Box<CheckFn>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedTypeChecker {
    pub fn new(
        workspace: Arc<MemoryWorkspace>,
        check: impl Fn(&MemoryWorkspace) -> Validation + Send + Sync + 'static,
    ) -> Self {
        Self {
            workspace,
            check: Box::new(check),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Checker that always passes.
    pub fn passing(workspace: Arc<MemoryWorkspace>) -> Self {
        Self::new(workspace, |_| Validation::pass())
    }

    /// Sleep for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TypeChecker for ScriptedTypeChecker {
    async fn check(&self) -> Result<Validation, CheckerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok((self.check)(&self.workspace))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::parse_output;

    #[test]
    fn memory_workspace_strips_root_prefix() {
        let ws = MemoryWorkspace::new().with_file("src/a.ts", "x");
        assert_eq!(ws.read(Path::new("/workspace/src/a.ts")).unwrap(), "x");
        assert!(ws.exists(Path::new("src/a.ts")));
        ws.remove(Path::new("src/a.ts")).unwrap();
        assert!(ws.read(Path::new("src/a.ts")).is_err());
    }

    #[tokio::test]
    async fn scanning_analyzer_skips_comments_and_substrings() {
        let ws = Arc::new(MemoryWorkspace::new().with_file(
            "src/a.ts",
            "// any here is ignored\nconst company: any = 1; // any\nlet many = 2;\n",
        ));
        let analyzer = ScanningAnalyzer::new(ws);
        let out = analyzer.run().await.unwrap();
        assert_eq!(out.exit_code, 1);
        let diags = parse_output(&out.stdout).unwrap();
        assert_eq!(diags.len(), 1);
        assert_eq!((diags[0].line, diags[0].column), (2, 16));
        assert_eq!(analyzer.runs(), 1);
    }
}
