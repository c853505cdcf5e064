use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use ratchet_core::fakes::{FailingAnalyzer, MemoryWorkspace, ScanningAnalyzer};
use ratchet_core::{
    Analyzer, AnalyzerOutput, CollectionError, CollectorConfig, ConstructKind, SignalCollector,
};

struct StaticAnalyzer(AnalyzerOutput);

#[async_trait]
impl Analyzer for StaticAnalyzer {
    async fn run(&self) -> Result<AnalyzerOutput, CollectionError> {
        Ok(self.0.clone())
    }
}

const API_TS: &str = "\
import { load } from './load';

export function handle(payload: any): any {
  try {
    return load(payload as any as Request);
  } catch (err: any) {
    return null;
  }
}
";

fn workspace() -> Arc<MemoryWorkspace> {
    Arc::new(
        MemoryWorkspace::new()
            .with_file("src/api.ts", API_TS)
            .with_file("src/types.ts", "export const cache: Record<string, any> = {};\n"),
    )
}

#[tokio::test]
async fn collects_sites_with_inferred_constructs() {
    let ws = workspace();
    let collector = SignalCollector::new(
        Arc::new(ScanningAnalyzer::new(ws.clone())),
        ws.clone(),
        CollectorConfig::default(),
    );

    let sites = collector.collect().await.unwrap();
    let kinds: Vec<_> = sites.iter().map(|s| (s.path.clone(), s.kind)).collect();
    assert_eq!(
        kinds,
        vec![
            (PathBuf::from("src/api.ts"), ConstructKind::Parameter),
            (PathBuf::from("src/api.ts"), ConstructKind::ReturnType),
            (PathBuf::from("src/api.ts"), ConstructKind::Cast),
            (PathBuf::from("src/api.ts"), ConstructKind::CatchBinding),
            (PathBuf::from("src/types.ts"), ConstructKind::GenericArgument),
        ]
    );

    for site in &sites {
        let content = ws.get(&site.path).unwrap();
        assert_eq!(&content[site.span.start..site.span.end], "any");
        assert!(site.context.len() <= 7);
    }
    assert_eq!(collector.count().await.unwrap(), 5);
}

#[tokio::test]
async fn analyzer_error_exit_is_collection_error() {
    let ws = workspace();
    let collector = SignalCollector::new(
        Arc::new(FailingAnalyzer::new(2, "Oops! Something went wrong!")),
        ws,
        CollectorConfig::default(),
    );
    match collector.collect().await {
        Err(CollectionError::AnalyzerFailed { exit_code, stderr }) => {
            assert_eq!(exit_code, 2);
            assert!(stderr.contains("Oops"));
        }
        other => panic!("expected AnalyzerFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn unix_text_output_with_absolute_paths_is_relativized() {
    let ws = workspace();
    let stdout = "\
/workspace/src/types.ts:1:36: Unexpected any. Specify a different type. [Error/@typescript-eslint/no-explicit-any]
/workspace/src/types.ts:1:36: Unexpected any. Specify a different type. [Error/@typescript-eslint/no-explicit-any]
/workspace/src/types.ts:1:1: Missing return type. [Warning/@typescript-eslint/explicit-module-boundary-types]
";
    let analyzer = StaticAnalyzer(AnalyzerOutput {
        exit_code: 1,
        stdout: stdout.to_string(),
        stderr: String::new(),
    });
    let collector = SignalCollector::new(Arc::new(analyzer), ws, CollectorConfig::default());
    let sites = collector.collect().await.unwrap();
    assert_eq!(sites.len(), 1, "duplicates and foreign rules are dropped");
    assert_eq!(sites[0].path, PathBuf::from("src/types.ts"));
    assert_eq!(sites[0].kind, ConstructKind::GenericArgument);
}

#[tokio::test]
async fn stale_positions_are_dropped() {
    let ws = workspace();
    let stdout = r#"[{"filePath": "src/api.ts", "messages": [
        {"ruleId": "@typescript-eslint/no-explicit-any", "severity": 2, "line": 1, "column": 1, "message": "stale"}
    ]}]"#;
    let analyzer = StaticAnalyzer(AnalyzerOutput {
        exit_code: 1,
        stdout: stdout.to_string(),
        stderr: String::new(),
    });
    let collector = SignalCollector::new(Arc::new(analyzer), ws, CollectorConfig::default());
    assert!(collector.collect().await.unwrap().is_empty());
}

#[tokio::test]
async fn missing_source_file_is_collection_error() {
    let ws = Arc::new(MemoryWorkspace::new());
    let stdout = r#"[{"filePath": "src/gone.ts", "messages": [
        {"ruleId": "@typescript-eslint/no-explicit-any", "severity": 2, "line": 1, "column": 1, "message": "x"}
    ]}]"#;
    let analyzer = StaticAnalyzer(AnalyzerOutput::success(stdout));
    let collector = SignalCollector::new(Arc::new(analyzer), ws, CollectorConfig::default());
    assert!(matches!(
        collector.collect().await,
        Err(CollectionError::Source { .. })
    ));
}

const REPEATED_CATCH_TS: &str = "\
export function first() {
  try {
    run();
  } catch (err: any) {
    return 1;
  }
}

export function second() {
  try {
    run();
  } catch (err: any) {
    return 2;
  }
}
";

#[tokio::test]
async fn identical_lines_in_one_file_are_distinct_sites() {
    let ws = Arc::new(MemoryWorkspace::new().with_file("src/h.ts", REPEATED_CATCH_TS));
    let collector = SignalCollector::new(
        Arc::new(ScanningAnalyzer::new(ws.clone())),
        ws,
        CollectorConfig::default(),
    );

    let sites = collector.collect().await.unwrap();
    assert_eq!(sites.len(), 2);
    assert_eq!((sites[0].span.line, sites[1].span.line), (4, 12));
    assert!(sites.iter().all(|s| s.kind == ConstructKind::CatchBinding));
    assert_eq!(sites[0].line_text, sites[1].line_text);
    assert_ne!(sites[0].content_hash, sites[1].content_hash);
    assert_eq!(collector.count().await.unwrap(), 2);
}

#[tokio::test]
async fn site_hashes_are_stable_across_collections() {
    let ws = Arc::new(MemoryWorkspace::new().with_file("src/h.ts", REPEATED_CATCH_TS));
    let collector = SignalCollector::new(
        Arc::new(ScanningAnalyzer::new(ws.clone())),
        ws,
        CollectorConfig::default(),
    );

    let first: Vec<_> = collector.collect().await.unwrap().iter().map(|s| s.content_hash).collect();
    let second: Vec<_> = collector.collect().await.unwrap().iter().map(|s| s.content_hash).collect();
    assert_eq!(first, second);
}

#[tokio::test]
async fn unrecognized_analyzer_text_is_collection_error() {
    let ws = workspace();
    let analyzer = StaticAnalyzer(AnalyzerOutput::success("npm WARN exec The following package was not found\n"));
    let collector = SignalCollector::new(Arc::new(analyzer), ws, CollectorConfig::default());
    assert!(matches!(
        collector.collect().await,
        Err(CollectionError::Unparseable(_))
    ));
    assert!(matches!(
        collector.count().await,
        Err(CollectionError::Unparseable(_))
    ));
}
