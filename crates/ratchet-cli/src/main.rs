//! Ratchet - escape-annotation reduction campaigns
//!
//! The `ratchet` command finds `any`-style type escapes with a lint analyzer,
//! classifies them, and replaces the accidental ones in validated batches
//! without ever letting the escape count rise.
//!
//! ## Commands
//!
//! - `run`: Start a new campaign
//! - `resume`: Continue a paused or interrupted campaign
//! - `status`: Show the persisted campaign record
//! - `abandon`: Mark an unfinished campaign aborted
//! - `collect`: List escape sites without changing anything
//! - `classify`: Show verdicts and proposed replacements
//! - `report`: Print a verified campaign summary or its manual-review list

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn, Level};

use ratchet_ci::{BuiltinStage, CommandAnalyzer, CommandGate, StageConfig};
use ratchet_core::{
    is_git_repo, read_summary, render_manual_review, CampaignConfig, CampaignController,
    CampaignMode, CampaignStatus, CampaignSummary, CancelLatch, Capabilities, CasCheckpointStore,
    ClassificationEngine, FsBlobStore, FsWorkspace, GitCommitter, Proposal, ReplacementEngine,
    RuleSet, RunStateStore, SignalCollector,
};

#[derive(Parser)]
#[command(name = "ratchet")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Escape-annotation reduction campaigns", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Project root the analyzer and checker run in
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Configuration file (default: <root>/ratchet.toml when present)
    #[arg(short, long, global = true, env = "RATCHET_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new campaign
    Run {
        #[command(flatten)]
        overrides: Overrides,
    },

    /// Continue the unfinished campaign
    Resume {
        #[command(flatten)]
        overrides: Overrides,
    },

    /// Show the persisted campaign record
    Status,

    /// Mark the unfinished campaign aborted so a new one can start
    Abandon {
        /// Reason recorded on the campaign
        #[arg(short, long, default_value = "abandoned by operator")]
        reason: String,
    },

    /// List escape sites without changing anything
    Collect,

    /// Show verdicts and proposed replacements without changing anything
    Classify {
        /// Only show sites a campaign would edit
        #[arg(long)]
        actionable: bool,
    },

    /// Print a recorded campaign summary after verifying its digest
    Report {
        /// Run ID to report on
        run: String,

        /// Print the manual-review list instead of the JSON summary
        #[arg(long)]
        manual: bool,
    },
}

/// Command-line overrides for campaign settings.
#[derive(clap::Args, Debug, Default, Clone)]
struct Overrides {
    /// Maximum sites per batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Batching mode (normal, conservative, emergency)
    #[arg(long)]
    mode: Option<CampaignMode>,

    /// Minimum classification confidence for a site to be edited
    #[arg(long)]
    threshold: Option<f64>,

    /// Fixed regression baseline instead of the count at start
    #[arg(long)]
    baseline: Option<usize>,

    /// Commit every validated step to git
    #[arg(long)]
    git_commit: bool,
}

impl Overrides {
    fn apply(&self, config: &mut CampaignConfig) {
        if let Some(n) = self.batch_size {
            config.batch_size = n;
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(t) = self.threshold {
            config.confidence_threshold = t;
        }
        if let Some(b) = self.baseline {
            config.regression_baseline = Some(b);
        }
        if self.git_commit {
            config.git_commit = true;
        }
    }
}

/// `ratchet.toml`: campaign settings plus the analyzer and checker stages.
#[derive(Debug, Deserialize)]
#[serde(default)]
struct FileConfig {
    #[serde(flatten)]
    campaign: CampaignConfig,

    /// Lint command whose output is collected.
    analyzer: StageConfig,

    /// Checker commands run after every trial, in order.
    checker: Vec<StageConfig>,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            campaign: CampaignConfig::default(),
            analyzer: StageConfig::from_builtin(BuiltinStage::EslintJson, 600),
            checker: vec![StageConfig::from_builtin(BuiltinStage::Tsc, 0)],
        }
    }
}

impl FileConfig {
    fn load(root: &Path, explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => root.join("ratchet.toml"),
        };
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config: {:?}", path))?;
            Self::parse(&text).with_context(|| format!("Invalid config: {:?}", path))?
        } else if explicit.is_some() {
            anyhow::bail!("Config file not found: {:?}", path);
        } else {
            Self::default()
        };
        if config.campaign.state_dir.is_relative() {
            config.campaign.state_dir = root.join(&config.campaign.state_dir);
        }
        Ok(config)
    }

    fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    ratchet_core::init_tracing(cli.json, level);

    // Analyzers report absolute paths; the root must match them.
    let root = cli
        .root
        .canonicalize()
        .with_context(|| format!("Project root not found: {:?}", cli.root))?;
    let mut file = FileConfig::load(&root, cli.config.as_deref())?;

    match cli.command {
        Commands::Run { overrides } => {
            overrides.apply(&mut file.campaign);
            cmd_campaign(&root, file, false).await
        }
        Commands::Resume { overrides } => {
            overrides.apply(&mut file.campaign);
            cmd_campaign(&root, file, true).await
        }
        Commands::Status => cmd_status(&file.campaign.state_dir),
        Commands::Abandon { reason } => cmd_abandon(&file.campaign.state_dir, &reason),
        Commands::Collect => cmd_collect(&root, &file).await,
        Commands::Classify { actionable } => cmd_classify(&root, &file, actionable).await,
        Commands::Report { run, manual } => cmd_report(&file.campaign.state_dir, &run, manual),
    }
}

fn collector(root: &Path, file: &FileConfig) -> SignalCollector {
    SignalCollector::new(
        Arc::new(CommandAnalyzer::new(file.analyzer.clone(), root)),
        Arc::new(FsWorkspace::new(root)),
        file.campaign.collector_config(),
    )
}

fn capabilities(root: &Path, file: &FileConfig) -> Result<Capabilities> {
    let workspace = Arc::new(FsWorkspace::new(root));
    let cas_dir = file.campaign.state_dir.join("cas");
    let blobs = FsBlobStore::open(&cas_dir)
        .with_context(|| format!("Failed to open checkpoint store at {:?}", cas_dir))?;
    let mut store = CasCheckpointStore::new(workspace.clone(), Arc::new(blobs));
    if file.campaign.git_commit {
        if !is_git_repo(root) {
            anyhow::bail!("--git-commit requires {:?} to be a git repository", root);
        }
        store = store.with_git(GitCommitter::new(root));
    }

    Ok(Capabilities {
        analyzer: Arc::new(CommandAnalyzer::new(file.analyzer.clone(), root)),
        workspace,
        store: Arc::new(store),
        checker: Arc::new(CommandGate::new(file.checker.clone(), root)),
    })
}

/// Run or resume a campaign; Ctrl-C pauses at the next batch boundary.
async fn cmd_campaign(root: &Path, file: FileConfig, resume: bool) -> Result<ExitCode> {
    let caps = capabilities(root, &file)?;
    let latch = CancelLatch::new();
    let mut controller = CampaignController::new(file.campaign, caps)
        .context("Invalid campaign configuration")?
        .with_cancel(latch.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; pausing after the current batch");
            latch.request();
        }
    });

    let summary = if resume {
        controller.resume().await.context("Failed to resume campaign")?
    } else {
        controller.run_campaign().await.context("Campaign failed to start")?
    };

    print_summary(&summary, &controller.state().run_dir(summary.run_id));
    Ok(match summary.status {
        CampaignStatus::Completed | CampaignStatus::Paused => ExitCode::SUCCESS,
        CampaignStatus::Running | CampaignStatus::Aborted => ExitCode::from(2),
    })
}

fn print_summary(summary: &CampaignSummary, run_dir: &Path) {
    let status = match summary.status {
        CampaignStatus::Completed => "✓ COMPLETED",
        CampaignStatus::Paused => "‖ PAUSED",
        CampaignStatus::Aborted => "✗ ABORTED",
        CampaignStatus::Running => "… RUNNING",
    };
    println!("Run ID: {}", summary.run_id);
    println!("Status: {}", status);
    if let Some(reason) = &summary.abort_reason {
        println!("Reason: {}", reason);
    }
    println!(
        "Escapes: {} -> {}",
        summary.baseline,
        summary
            .final_count
            .map(|c| c.to_string())
            .unwrap_or_else(|| "?".to_string())
    );
    println!("Batches: {}", summary.batches_completed);
    println!();
    println!("  applied:  {}", summary.applied_count());
    println!("  rejected: {}", summary.rejected_count());
    println!("  manual:   {}", summary.manual_count());
    println!("  skipped:  {}", summary.skipped_count());
    println!();
    println!("Artifacts: {:?}", run_dir);
}

fn cmd_status(state_dir: &Path) -> Result<ExitCode> {
    let store = RunStateStore::new(state_dir);
    let Some(record) = store.load().context("Failed to read campaign record")? else {
        println!("No campaign recorded in {:?}", state_dir);
        return Ok(ExitCode::SUCCESS);
    };

    println!("Run ID: {}", record.run_id);
    println!("Status: {:?}", record.status);
    println!("Started: {}", record.started_at.to_rfc3339());
    println!("Updated: {}", record.updated_at.to_rfc3339());
    println!("Baseline: {}", record.baseline);
    if let Some(count) = record.last_count {
        println!("Last count: {}", count);
    }
    println!("Batches completed: {}", record.batches_completed);
    println!(
        "Processed {} (applied {}, rejected {}), manual {}, skipped {}",
        record.processed, record.applied, record.rejected, record.manual, record.skipped
    );
    if let Some(reason) = &record.abort_reason {
        println!("Abort reason: {}", reason);
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_abandon(state_dir: &Path, reason: &str) -> Result<ExitCode> {
    let record = RunStateStore::new(state_dir)
        .abandon(reason)
        .context("Failed to abandon campaign")?;
    info!(run_id = %record.run_id, "campaign abandoned");
    println!("Abandoned campaign {}", record.run_id);
    Ok(ExitCode::SUCCESS)
}

async fn cmd_collect(root: &Path, file: &FileConfig) -> Result<ExitCode> {
    let sites = collector(root, file)
        .collect()
        .await
        .context("Failed to collect escape sites")?;
    for site in &sites {
        println!("{} {}", site.location(), site.kind);
    }
    println!();
    println!("Total: {} escape site(s)", sites.len());
    Ok(ExitCode::SUCCESS)
}

async fn cmd_classify(root: &Path, file: &FileConfig, actionable_only: bool) -> Result<ExitCode> {
    let campaign = &file.campaign;
    let sites = collector(root, file)
        .collect()
        .await
        .context("Failed to collect escape sites")?;
    let rules = RuleSet::with_overrides(campaign.rules.clone()).context("Invalid rules")?;
    let engine = ClassificationEngine::new(rules, campaign.classifier_settings());
    let replacer = ReplacementEngine::new(campaign.confidence_threshold);

    let classifications = engine.classify_all(&sites);
    let proposals = replacer.propose_all(&sites, &classifications);

    let mut shown = 0usize;
    for ((site, c), proposal) in sites.iter().zip(&classifications).zip(&proposals) {
        if actionable_only && proposal.candidate().is_none() {
            continue;
        }
        let action = match proposal {
            Proposal::Candidate(candidate) => format!(
                "-> {} ({}, {} risk)",
                candidate.replacement, candidate.strategy, candidate.risk
            ),
            Proposal::Manual { reason } => format!("manual: {}", reason),
            Proposal::NotEligible { reason } => format!("skip: {}", reason),
        };
        println!(
            "{} {} {} {:.2} [{}] {}",
            site.location(),
            site.kind,
            c.verdict,
            c.confidence,
            c.matched_rules.join(","),
            action
        );
        shown += 1;
    }
    println!();
    println!("Shown: {} of {} escape site(s)", shown, sites.len());
    Ok(ExitCode::SUCCESS)
}

fn cmd_report(state_dir: &Path, run_id: &str, manual: bool) -> Result<ExitCode> {
    let runs_dir = state_dir.join("runs");
    let summary = read_summary(run_id, &runs_dir)
        .with_context(|| format!("Failed to read summary for run {}", run_id))?;
    if manual {
        print!("{}", render_manual_review(&summary));
    } else {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratchet_core::write_summary;

    #[test]
    fn test_file_config_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = FileConfig::load(dir.path(), None).unwrap();
        assert_eq!(config.campaign.batch_size, 15);
        assert_eq!(config.analyzer.name, "eslint_json");
        assert_eq!(config.checker.len(), 1);
        assert_eq!(config.campaign.state_dir, dir.path().join(".ratchet"));
    }

    #[test]
    fn test_file_config_parses_campaign_and_stages() {
        let config = FileConfig::parse(
            r#"
            batch_size = 5
            mode = "conservative"
            state_dir = "/var/tmp/ratchet"

            [analyzer]
            name = "lint"
            command = ["npx", "eslint", "--format", "json", "src"]
            timeout_secs = 300

            [[checker]]
            name = "tsc"
            command = ["npx", "tsc", "--noEmit"]
            timeout_secs = 0

            [[checker]]
            name = "unit"
            command = ["npm", "test"]
            timeout_secs = 900
            enabled = false

            [[rules]]
            id = "generated"
            verdict = "intentional"
            weight = 0.95
            rationale = "generated code"
            predicate = { kind = "path_matches", pattern = "^src/generated/" }
            "#,
        )
        .unwrap();

        assert_eq!(config.campaign.batch_size, 5);
        assert_eq!(config.campaign.mode, CampaignMode::Conservative);
        assert_eq!(config.campaign.state_dir, PathBuf::from("/var/tmp/ratchet"));
        assert_eq!(config.campaign.rules.len(), 1);
        assert_eq!(config.analyzer.command.last().map(String::as_str), Some("src"));
        assert_eq!(config.checker.len(), 2);
        assert!(!config.checker[1].enabled);
    }

    #[test]
    fn test_missing_explicit_config_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = FileConfig::load(dir.path(), Some(&missing)).unwrap_err();
        assert!(format!("{err:#}").contains("Config file not found"));
    }

    #[test]
    fn test_overrides_apply() {
        let mut config = CampaignConfig::default();
        let overrides = Overrides {
            batch_size: Some(3),
            mode: Some(CampaignMode::Emergency),
            threshold: Some(0.8),
            baseline: Some(100),
            git_commit: true,
        };
        overrides.apply(&mut config);
        assert_eq!(config.batch_size, 3);
        assert_eq!(config.mode, CampaignMode::Emergency);
        assert_eq!(config.confidence_threshold, 0.8);
        assert_eq!(config.regression_baseline, Some(100));
        assert!(config.git_commit);
        assert_eq!(config.effective_batch_size(), 12);
    }

    #[test]
    fn test_cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "ratchet",
            "--root",
            "/src/app",
            "run",
            "--mode",
            "conservative",
            "--batch-size",
            "4",
        ])
        .unwrap();
        assert_eq!(cli.root, PathBuf::from("/src/app"));
        match cli.command {
            Commands::Run { overrides } => {
                assert_eq!(overrides.mode, Some(CampaignMode::Conservative));
                assert_eq!(overrides.batch_size, Some(4));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_report_rejects_tampered_summary() {
        let dir = tempfile::tempdir().unwrap();
        let summary = CampaignSummary {
            run_id: uuid::Uuid::new_v4(),
            status: CampaignStatus::Completed,
            started_at: chrono::Utc::now(),
            finished_at: chrono::Utc::now(),
            baseline: 2,
            final_count: Some(1),
            batches_completed: 1,
            ratchet: ratchet_core::RegressionRatchet::new(2),
            abort_reason: None,
            sites: vec![],
        };
        let runs = dir.path().join("runs");
        let path = write_summary(&summary, &runs).unwrap();
        let run_id = summary.run_id.to_string();

        assert!(cmd_report(dir.path(), &run_id, false).is_ok());
        assert!(cmd_report(dir.path(), &run_id, true).is_ok());

        std::fs::write(&path, b"{}").unwrap();
        let err = cmd_report(dir.path(), &run_id, false).unwrap_err();
        assert!(format!("{err:#}").contains("digest mismatch"));
    }

    #[test]
    fn test_status_and_abandon_without_campaign() {
        let dir = tempfile::tempdir().unwrap();
        assert!(cmd_status(dir.path()).is_ok());
        assert!(cmd_abandon(dir.path(), "nothing to do").is_err());
    }
}
