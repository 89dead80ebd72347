//! Command dispatch for the `confvault` binary

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use colored::Colorize;
use tracing::{error, info};

use crate::app::options::AppOptions;
use crate::app::state::AppState;
use crate::backup::{BackupResult, BackupStatus};
use crate::classify::{ClassifiedChange, Severity};
use crate::deploy::{DeployJob, DeployOutcome, DeployRequest};
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::storage::inventory::{load_rules, Inventory};
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::store::fs::FsSnapshotStore;
use crate::transport::dir::DirTransport;

/// What the binary was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Back up every device in the inventory
    Backup,

    /// Push a config file to one device
    Deploy { device: String, config: PathBuf },

    /// Show the classified change between a device's last two snapshots
    Diff { device: String },

    /// List a device's snapshots
    History { device: String },
}

/// Run one command against the vault at `layout`
pub async fn run(command: Command, layout: &StorageLayout, settings: &Settings) -> anyhow::Result<()> {
    layout
        .setup()
        .await
        .with_context(|| format!("preparing {}", layout.base_dir.display()))?;

    let state = init(layout, settings)?;

    match command {
        Command::Backup => backup(&state, layout).await,
        Command::Deploy { device, config } => deploy(&state, layout, &device, &config).await,
        Command::Diff { device } => diff(&state, layout, &device).await,
        Command::History { device } => history(&state, &device).await,
    }
}

fn init(layout: &StorageLayout, settings: &Settings) -> anyhow::Result<AppState> {
    let source = match &settings.transport.source_dir {
        Some(dir) => Dir::new(dir),
        None => layout.configs_dir(),
    };

    let store = Arc::new(FsSnapshotStore::new(layout.snapshots_dir()));
    let transport = Arc::new(DirTransport::new(source));

    AppState::new(store, transport, AppOptions::from(settings)).context("initializing vault")
}

async fn backup(state: &AppState, layout: &StorageLayout) -> anyhow::Result<()> {
    let inventory = Inventory::load(&layout.inventory_file())
        .await
        .context("loading device inventory")?;
    let rules = load_rules(&layout.rules_file())
        .await
        .context("loading classification rules")?;

    let results = state.run_backup_cycle(&inventory.devices, &rules).await;
    for result in &results {
        print_backup(result);
    }

    let failed = results
        .iter()
        .filter(|r| r.status == BackupStatus::Failed)
        .count();
    if failed > 0 {
        return Err(anyhow!("{} of {} backups failed", failed, results.len()));
    }
    Ok(())
}

async fn deploy(
    state: &AppState,
    layout: &StorageLayout,
    device: &str,
    config: &Path,
) -> anyhow::Result<()> {
    let inventory = Inventory::load(&layout.inventory_file())
        .await
        .context("loading device inventory")?;
    let device = inventory
        .get(device)
        .cloned()
        .ok_or_else(|| anyhow!("unknown device: {}", device))?;
    let rules = load_rules(&layout.rules_file())
        .await
        .context("loading classification rules")?;
    let proposed = File::new(config)
        .read_string()
        .await
        .with_context(|| format!("reading {}", config.display()))?;

    let job = state
        .submit_deploy_job(DeployRequest::new(device, proposed), &rules)
        .await?;

    archive_job(layout, &job).await;
    print_job(&job);

    match job.outcome {
        Some(DeployOutcome::Success) => Ok(()),
        _ => Err(anyhow!("deploy job {} ended in state {}", job.id, job.state())),
    }
}

async fn diff(state: &AppState, layout: &StorageLayout, device: &str) -> anyhow::Result<()> {
    let rules = load_rules(&layout.rules_file())
        .await
        .context("loading classification rules")?;

    match state.diff_latest(device, &rules).await? {
        Some(change) => {
            println!("{} {}", severity_label(change.severity), tags(&change));
            println!("{}", change.diff.to_unified());
        }
        None => println!("{}: fewer than two snapshots", device),
    }
    Ok(())
}

async fn history(state: &AppState, device: &str) -> anyhow::Result<()> {
    let refs = state.store.history(device).await?;
    for commit in refs {
        let snapshot = state.store.get_by_ref(&commit).await?;
        println!(
            "{:>6}  {}  {:<10}  {}",
            commit.seq,
            commit.short(),
            format!("{:?}", snapshot.source).to_lowercase(),
            snapshot.created_at.to_rfc3339()
        );
    }
    Ok(())
}

async fn archive_job(layout: &StorageLayout, job: &DeployJob) {
    let file = layout.jobs_dir().file(&format!("{}.json", job.id));
    match file.write_json(job).await {
        Ok(()) => info!("Archived deploy job {} to {}", job.id, file.path().display()),
        Err(e) => error!("Failed to archive deploy job {}: {}", job.id, e),
    }
}

fn print_backup(result: &BackupResult) {
    let status = match result.status {
        BackupStatus::Succeeded => "ok".green(),
        BackupStatus::Unclassified => "unclassified".yellow(),
        BackupStatus::Failed => "failed".red(),
    };
    let detail = match (&result.change, &result.error) {
        (_, Some(error)) => error.message.clone(),
        (Some(change), None) if !change.diff.is_empty() => {
            let summary = change.diff.summary();
            format!(
                "{} +{} -{} {}",
                severity_label(change.severity),
                summary.inserts,
                summary.deletes,
                tags(change)
            )
        }
        (Some(_), None) => "no change".to_string(),
        (None, None) => "baseline".to_string(),
    };
    println!("{:<24} {:<14} {}", result.device.bold(), status, detail);
}

fn print_job(job: &DeployJob) {
    let outcome = match job.outcome {
        Some(DeployOutcome::Success) => "success".green(),
        Some(DeployOutcome::RolledBack) => "rolled back".yellow(),
        Some(DeployOutcome::Failed) if job.requires_manual_intervention() => {
            "failed, manual intervention required".red().bold()
        }
        _ => "failed".red(),
    };
    println!("{} {} {}", job.device.bold(), job.id, outcome);
    for check in job.validation.iter().filter(|c| !c.passed) {
        println!(
            "  {} {}",
            check.check,
            check.detail.as_deref().unwrap_or_default()
        );
    }
    if let Some(error) = &job.error {
        println!("  {}", error.message);
    }
}

fn severity_label(severity: Severity) -> colored::ColoredString {
    let label = severity.as_str();
    match severity {
        Severity::Critical => label.red().bold(),
        Severity::Major => label.red(),
        Severity::Minor => label.yellow(),
        Severity::Informational => label.normal(),
    }
}

fn tags(change: &ClassifiedChange) -> String {
    if change.tags.is_empty() {
        return String::new();
    }
    format!("[{}]", change.tags.join(", "))
}
