//! End-to-end campaign over a real directory with command-backed stages.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use ratchet_ci::{CommandAnalyzer, CommandGate, StageConfig};
use ratchet_core::{
    CampaignConfig, CampaignController, CampaignStatus, Capabilities, CasCheckpointStore,
    FsBlobStore, FsWorkspace, SiteOutcome,
};

/// Reports every `: any` annotation in unix lint format.
const AWK_LINT: &str = r#"awk '{ i = index($0, ": any"); if (i > 0) printf "%s:%d:%d: Unexpected any. Specify a different type. [Error/@typescript-eslint/no-explicit-any]\n", FILENAME, FNR, i + 2 }' src/*.ts"#;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

#[tokio::test]
async fn command_backed_campaign_keeps_good_edits_and_rejects_bad_ones() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(root, "src/a.ts", "export const good: any = 1;\n");
    write(root, "src/b.ts", "export const bad: any = 'x';\n");
    write(root, "src/c.ts", "export function f(x: any) {\n  return x;\n}\n");

    let state_dir = root.join(".ratchet");
    let workspace = Arc::new(FsWorkspace::new(root));
    let blobs = Arc::new(FsBlobStore::open(state_dir.join("cas")).unwrap());
    let caps = Capabilities {
        analyzer: Arc::new(CommandAnalyzer::new(StageConfig::shell("lint", AWK_LINT, 60), root)),
        workspace: workspace.clone(),
        store: Arc::new(CasCheckpointStore::new(workspace, blobs)),
        checker: Arc::new(CommandGate::new(
            vec![StageConfig::shell("tsc", "! grep -q 'bad: string' src/b.ts", 60)],
            root,
        )),
    };
    let config = CampaignConfig {
        state_dir: state_dir.clone(),
        validation_timeout_secs: 60,
        ..Default::default()
    };

    let mut controller = CampaignController::new(config, caps).unwrap();
    let summary = controller.run_campaign().await.unwrap();

    assert_eq!(summary.status, CampaignStatus::Completed);
    assert_eq!(summary.baseline, 3);
    assert_eq!(summary.final_count, Some(2));
    assert_eq!(summary.applied_count(), 1);
    assert_eq!(summary.rejected_count(), 1);
    assert_eq!(summary.skipped_count(), 1);

    assert_eq!(
        fs::read_to_string(root.join("src/a.ts")).unwrap(),
        "export const good: number = 1;\n"
    );
    assert_eq!(
        fs::read_to_string(root.join("src/b.ts")).unwrap(),
        "export const bad: any = 'x';\n"
    );

    let param = summary
        .sites
        .iter()
        .find(|s| s.path == Path::new("src/c.ts"))
        .unwrap();
    assert!(matches!(param.outcome, SiteOutcome::Skipped { .. }));

    assert!(state_dir.join("campaign.json").exists());
    assert!(state_dir
        .join("runs")
        .join(summary.run_id.to_string())
        .join("summary.json")
        .exists());
}
