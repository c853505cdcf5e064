use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ratchet_core::fakes::{MemoryBlobStore, MemoryWorkspace, ScanningAnalyzer, ScriptedTypeChecker};
use ratchet_core::{
    Batch, CasCheckpointStore, CheckpointError, CheckpointStore, CheckpointToken,
    ClassificationEngine, CollectorConfig, CommitRef, PlannedSite, RatchetError,
    ReplacementEngine, RunStateStore, SafetyProtocol, SignalCollector, Validation,
};

fn workspace(files: usize) -> Arc<MemoryWorkspace> {
    let ws = MemoryWorkspace::new();
    for i in 0..files {
        ws.insert(
            format!("src/f{i}.ts"),
            format!("export const v_{i}: any = {i};\nexport const label_{i} = 'f{i}';\n"),
        );
    }
    Arc::new(ws)
}

async fn planned(ws: &Arc<MemoryWorkspace>) -> Vec<PlannedSite> {
    let collector = SignalCollector::new(
        Arc::new(ScanningAnalyzer::new(ws.clone())),
        ws.clone(),
        CollectorConfig::default(),
    );
    let sites = collector.collect().await.unwrap();
    let engine = ClassificationEngine::builtin().unwrap();
    let replacer = ReplacementEngine::default();
    sites
        .into_iter()
        .filter_map(|site| {
            let classification = engine.classify(&site);
            let candidate = replacer.propose(&site, &classification).candidate()?.clone();
            Some(PlannedSite {
                site,
                classification,
                candidate,
            })
        })
        .collect()
}

fn protocol(
    ws: &Arc<MemoryWorkspace>,
    store: Arc<dyn CheckpointStore>,
    checker: Arc<ScriptedTypeChecker>,
    timeout: Duration,
) -> SafetyProtocol {
    SafetyProtocol::new(ws.clone(), store, checker, timeout)
}

fn cas_store(ws: &Arc<MemoryWorkspace>) -> Arc<dyn CheckpointStore> {
    Arc::new(CasCheckpointStore::new(ws.clone(), Arc::new(MemoryBlobStore::new())))
}

#[tokio::test]
async fn passing_batch_commits_every_edit_in_one_trial() {
    let ws = workspace(3);
    let items = planned(&ws).await;
    assert_eq!(items.len(), 3);
    let checker = Arc::new(ScriptedTypeChecker::passing(ws.clone()));
    let safety = protocol(&ws, cas_store(&ws), checker.clone(), Duration::from_secs(5));

    let result = safety.apply_batch(&Batch::new(1, items, 15).unwrap()).await.unwrap();
    assert_eq!(result.applied.len(), 3);
    assert!(result.rejected.is_empty());
    assert_eq!(result.checkpoints.len(), 1);
    assert_eq!(checker.calls(), 1);
    assert_eq!(
        ws.get("src/f1.ts").unwrap(),
        "export const v_1: number = 1;\nexport const label_1 = 'f1';\n"
    );
}

#[tokio::test]
async fn failed_batch_leaves_tree_byte_identical() {
    let ws = workspace(4);
    let before = ws.files();
    let items = planned(&ws).await;
    let checker = Arc::new(ScriptedTypeChecker::new(ws.clone(), |_| {
        Validation::fail("error TS2322: Type 'number' is not assignable")
    }));
    let safety = protocol(&ws, cas_store(&ws), checker.clone(), Duration::from_secs(5));

    let result = safety.apply_batch(&Batch::new(1, items, 15).unwrap()).await.unwrap();
    assert!(result.is_failure());
    assert_eq!(result.rejected.len(), 4);
    assert!(result.rejected.iter().all(|r| r.reason.contains("TS2322")));
    // 4, then halves of 2, then singletons.
    assert_eq!(checker.calls(), 7);
    assert_eq!(result.rollbacks(), 7);
    assert_eq!(ws.files(), before);
}

#[tokio::test]
async fn bisection_isolates_the_single_bad_edit() {
    let ws = workspace(8);
    let items = planned(&ws).await;
    assert_eq!(items.len(), 8);
    let checker = Arc::new(ScriptedTypeChecker::new(ws.clone(), |ws| {
        match ws.get("src/f3.ts") {
            Some(c) if c.contains("v_3: number") => Validation::fail("src/f3.ts(1,14): error TS2322"),
            _ => Validation::pass(),
        }
    }));
    let safety = protocol(&ws, cas_store(&ws), checker.clone(), Duration::from_secs(5));

    let result = safety.apply_batch(&Batch::new(2, items, 15).unwrap()).await.unwrap();
    assert_eq!(result.batch_number, 2);
    assert_eq!(result.applied.len(), 7);
    assert_eq!(result.rejected.len(), 1);
    assert_eq!(result.rejected[0].path, PathBuf::from("src/f3.ts"));
    // [0..8] fail, [0..4] fail, [0,1] pass, [2,3] fail, [2] pass, [3] fail, [4..8] pass
    assert_eq!(checker.calls(), 7);
    assert_eq!(result.rollbacks(), 4);

    assert!(ws.get("src/f3.ts").unwrap().contains("v_3: any"));
    for i in [0, 1, 2, 4, 5, 6, 7] {
        let content = ws.get(format!("src/f{i}.ts")).unwrap();
        assert!(content.contains(&format!("v_{i}: number")), "{content}");
    }
}

#[tokio::test]
async fn checker_timeout_counts_as_failure() {
    let ws = workspace(1);
    let before = ws.files();
    let items = planned(&ws).await;
    let checker = Arc::new(ScriptedTypeChecker::passing(ws.clone()).with_delay(Duration::from_secs(5)));
    let safety = protocol(&ws, cas_store(&ws), checker, Duration::from_millis(50));

    let result = safety.apply_batch(&Batch::new(1, items, 15).unwrap()).await.unwrap();
    assert!(result.applied.is_empty());
    assert_eq!(result.rejected.len(), 1);
    assert!(result.rejected[0].reason.contains("timed out"));
    assert_eq!(ws.files(), before);
}

#[tokio::test]
async fn stale_edit_is_rejected_without_validation() {
    let ws = workspace(2);
    let items = planned(&ws).await;
    ws.insert("src/f0.ts", "// moved\nexport const v_0: any = 0;\n");
    let checker = Arc::new(ScriptedTypeChecker::passing(ws.clone()));
    let safety = protocol(&ws, cas_store(&ws), checker.clone(), Duration::from_secs(5));

    let result = safety.apply_batch(&Batch::new(1, items, 15).unwrap()).await.unwrap();
    assert_eq!(result.rejected.len(), 1);
    assert_eq!(result.rejected[0].path, PathBuf::from("src/f0.ts"));
    assert!(result.rejected[0].reason.starts_with("stale edit"));
    assert_eq!(result.applied.len(), 1);
    assert_eq!(checker.calls(), 1);
    assert_eq!(ws.get("src/f0.ts").unwrap(), "// moved\nexport const v_0: any = 0;\n");
}

/// Store whose restore primitive is broken.
struct BrokenRestore(CasCheckpointStore);

impl CheckpointStore for BrokenRestore {
    fn snapshot(&self, files: &[PathBuf]) -> Result<CheckpointToken, CheckpointError> {
        self.0.snapshot(files)
    }

    fn restore(&self, token: &CheckpointToken) -> Result<(), CheckpointError> {
        Err(CheckpointError::Restore {
            checkpoint: token.id,
            reason: "disk full".to_string(),
        })
    }

    fn commit(&self, files: &[PathBuf], message: &str) -> Result<CommitRef, CheckpointError> {
        self.0.commit(files, message)
    }
}

#[tokio::test]
async fn restore_failure_is_a_checkpoint_integrity_error() {
    let ws = workspace(2);
    let items = planned(&ws).await;
    let store = Arc::new(BrokenRestore(CasCheckpointStore::new(
        ws.clone(),
        Arc::new(MemoryBlobStore::new()),
    )));
    let checker = Arc::new(ScriptedTypeChecker::new(ws.clone(), |_| Validation::fail("boom")));
    let safety = protocol(&ws, store, checker, Duration::from_secs(5));

    match safety.apply_batch(&Batch::new(1, items, 15).unwrap()).await {
        Err(RatchetError::CheckpointIntegrity(CheckpointError::Restore { reason, .. })) => {
            assert_eq!(reason, "disk full");
        }
        other => panic!("expected CheckpointIntegrity, got {other:?}"),
    }
}

#[tokio::test]
async fn checkpoint_is_journaled_only_while_a_trial_is_open() {
    let dir = tempfile::tempdir().unwrap();
    let journal = RunStateStore::new(dir.path());
    let ws = workspace(2);
    let items = planned(&ws).await;

    let inflight = journal.inflight_path();
    let journaled = Arc::new(AtomicUsize::new(0));
    let seen = journaled.clone();
    let checker = Arc::new(ScriptedTypeChecker::new(ws.clone(), move |ws| {
        if inflight.exists() {
            seen.fetch_add(1, Ordering::SeqCst);
        }
        match ws.get("src/f1.ts") {
            Some(c) if c.contains("v_1: number") => Validation::fail("error TS2322"),
            _ => Validation::pass(),
        }
    }));
    let safety = protocol(&ws, cas_store(&ws), checker.clone(), Duration::from_secs(5))
        .with_journal(journal.clone());

    let result = safety.apply_batch(&Batch::new(1, items, 15).unwrap()).await.unwrap();
    assert_eq!(result.applied.len(), 1);
    assert_eq!(result.rejected.len(), 1);
    assert_eq!(checker.calls(), 3);
    assert_eq!(journaled.load(Ordering::SeqCst), 3);
    assert!(journal.load_inflight().unwrap().is_none());
}

#[tokio::test]
async fn interrupted_trial_is_restored_from_the_journal() {
    let dir = tempfile::tempdir().unwrap();
    let journal = RunStateStore::new(dir.path());
    let ws = workspace(1);
    let before = ws.files();
    let store = cas_store(&ws);

    let token = store.snapshot(&[PathBuf::from("src/f0.ts")]).unwrap();
    journal.record_inflight(&token).unwrap();
    ws.insert("src/f0.ts", "export const v_0: Brand = 0;\n");

    let checker = Arc::new(ScriptedTypeChecker::passing(ws.clone()));
    let safety = protocol(&ws, store, checker.clone(), Duration::from_secs(5))
        .with_journal(journal.clone());

    let restored = safety.recover_interrupted().unwrap();
    assert_eq!(restored.map(|t| t.id), Some(token.id));
    assert_eq!(ws.files(), before);
    assert!(journal.load_inflight().unwrap().is_none());
    assert!(safety.recover_interrupted().unwrap().is_none());
    assert_eq!(checker.calls(), 0);
}
