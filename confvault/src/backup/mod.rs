//! Backup orchestrator
//!
//! Pulls the running config of every registered device, normalizes it,
//! stores a snapshot and classifies the change against the previous one.
//! Devices are processed concurrently, bounded by a semaphore. One device's
//! failure never affects another device's result.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::classify::{classify, ClassifiedChange, CompiledRuleSet, RuleSet};
use crate::diff::{diff_text, Diff, DiffOptions};
use crate::errors::{ErrorRecord, RuleError, VaultError};
use crate::models::device::Device;
use crate::models::snapshot::{CommitRef, SnapshotMetadata, SnapshotSource};
use crate::normalize::Normalizer;
use crate::store::SnapshotStore;
use crate::sync::device_lock::DeviceLocks;
use crate::transport::Transport;
use crate::utils::{sha256_hash, with_retry, RetryPolicy};

/// Per-device backup status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    /// Snapshot stored and, if there was a previous one, classified
    Succeeded,

    /// Snapshot stored but the rule set could not be compiled
    Unclassified,

    Failed,
}

/// Outcome of backing up one device in a cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupResult {
    pub device: String,
    pub status: BackupStatus,

    /// Snapshot stored by this cycle
    pub snapshot: Option<CommitRef>,

    /// Snapshot it was compared against; `None` for a first backup
    pub previous: Option<CommitRef>,

    /// Classified delta against `previous`
    pub change: Option<ClassifiedChange>,

    pub error: Option<ErrorRecord>,

    /// Fetch attempts made
    pub attempts: u32,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BackupResult {
    fn failed(device: &str, err: &VaultError, attempts: u32, started_at: DateTime<Utc>) -> Self {
        Self {
            device: device.to_string(),
            status: BackupStatus::Failed,
            snapshot: None,
            previous: None,
            change: None,
            error: Some(ErrorRecord::new(device, err)),
            attempts,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Whether this cycle saw a configuration change on the device
    pub fn has_changes(&self) -> bool {
        self.change.as_ref().is_some_and(|c| !c.diff.is_empty())
    }
}

/// Backup cycle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSettings {
    /// Devices backed up at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(with = "crate::utils::duration_millis", default = "default_fetch_timeout")]
    pub fetch_timeout: Duration,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub diff: DiffOptions,
}

fn default_concurrency() -> usize {
    8
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            fetch_timeout: default_fetch_timeout(),
            retry: RetryPolicy::default(),
            diff: DiffOptions::default(),
        }
    }
}

/// What a successful fetch left behind in the store
struct Stored {
    snapshot: CommitRef,
    previous: Option<CommitRef>,
    change: Option<ClassifiedChange>,
    rule_error: Option<VaultError>,
}

/// Runs backup cycles against the transport
#[derive(Clone)]
pub struct BackupOrchestrator {
    store: Arc<dyn SnapshotStore>,
    transport: Arc<dyn Transport>,
    normalizer: Arc<Normalizer>,
    locks: DeviceLocks,
    pool: Arc<Semaphore>,
    settings: Arc<BackupSettings>,
}

impl BackupOrchestrator {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        transport: Arc<dyn Transport>,
        normalizer: Arc<Normalizer>,
        locks: DeviceLocks,
        settings: BackupSettings,
    ) -> Self {
        Self {
            store,
            transport,
            normalizer,
            locks,
            pool: Arc::new(Semaphore::new(settings.concurrency.max(1))),
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &BackupSettings {
        &self.settings
    }

    /// Back up every device, returning one result per device in input order.
    ///
    /// The rule set is compiled once for the cycle. If it does not compile,
    /// snapshots are still stored and every device reports `Unclassified`.
    pub async fn run_backup_cycle(&self, devices: &[Device], rules: &RuleSet) -> Vec<BackupResult> {
        let rules: Result<Arc<CompiledRuleSet>, RuleError> = rules.compile().map(Arc::new);
        if let Err(e) = &rules {
            warn!("Rule set failed to compile, changes will be unclassified: {}", e);
        }

        info!("Backup cycle started for {} devices", devices.len());

        let handles: Vec<_> = devices
            .iter()
            .cloned()
            .map(|device| {
                let this = self.clone();
                let rules = rules.clone();
                tokio::spawn(async move { this.backup_device(device, rules).await })
            })
            .collect();

        let results: Vec<BackupResult> = join_all(handles)
            .await
            .into_iter()
            .zip(devices)
            .map(|(joined, device)| {
                joined.unwrap_or_else(|e| {
                    let err = VaultError::Internal(format!("backup task failed: {}", e));
                    BackupResult::failed(device.id(), &err, 0, Utc::now())
                })
            })
            .collect();

        let failed = results
            .iter()
            .filter(|r| r.status == BackupStatus::Failed)
            .count();
        let changed = results.iter().filter(|r| r.has_changes()).count();
        info!(
            "Backup cycle complete: {} devices, {} changed, {} failed",
            results.len(),
            changed,
            failed
        );
        results
    }

    async fn backup_device(
        &self,
        device: Device,
        rules: Result<Arc<CompiledRuleSet>, RuleError>,
    ) -> BackupResult {
        let started_at = Utc::now();

        let _permit = match self.pool.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                let err = VaultError::Internal(e.to_string());
                return BackupResult::failed(device.id(), &err, 0, started_at);
            }
        };

        let _guard = match self.locks.try_acquire(device.id()) {
            Ok(guard) => guard,
            Err(e) => {
                warn!("Skipping backup of {}: {}", device.id(), e);
                return BackupResult::failed(device.id(), &e, 0, started_at);
            }
        };

        let (raw, attempts) = with_retry(
            &self.settings.retry,
            self.settings.fetch_timeout,
            device.id(),
            "fetch",
            || self.transport.fetch_config(&device),
        )
        .await;

        let raw = match raw {
            Ok(raw) => raw,
            Err(e) => {
                let err = VaultError::from(e);
                warn!("Backup of {} failed: {}", device.id(), err);
                return BackupResult::failed(device.id(), &err, attempts, started_at);
            }
        };

        match self.store_and_classify(&device, &raw, rules).await {
            Ok(Stored {
                snapshot,
                previous,
                change,
                rule_error,
            }) => {
                let status = if rule_error.is_some() {
                    BackupStatus::Unclassified
                } else {
                    BackupStatus::Succeeded
                };
                debug!("Backup of {} stored as {}", device.id(), snapshot);
                BackupResult {
                    device: device.name.clone(),
                    status,
                    snapshot: Some(snapshot),
                    previous,
                    change,
                    error: rule_error.map(|e| ErrorRecord::new(device.id(), &e)),
                    attempts,
                    started_at,
                    finished_at: Utc::now(),
                }
            }
            Err(e) => {
                warn!("Backup of {} failed: {}", device.id(), e);
                BackupResult::failed(device.id(), &e, attempts, started_at)
            }
        }
    }

    async fn store_and_classify(
        &self,
        device: &Device,
        raw: &str,
        rules: Result<Arc<CompiledRuleSet>, RuleError>,
    ) -> Result<Stored, VaultError> {
        let normalized = self.normalizer.normalize(device.platform, raw);
        let previous = self.store.get_latest(device.id()).await?;

        let snapshot = self
            .store
            .append(
                device.id(),
                &normalized,
                SnapshotMetadata {
                    source: SnapshotSource::Backup,
                    raw_hash: sha256_hash(raw.as_bytes()),
                    job_id: None,
                },
            )
            .await?;

        // First backup establishes the baseline; nothing to compare against
        let Some(previous) = previous else {
            return Ok(Stored {
                snapshot,
                previous: None,
                change: None,
                rule_error: rules.err().map(VaultError::from),
            });
        };

        let mut diff = match diff_text(&previous.config, &normalized, &self.settings.diff) {
            Ok(diff) => diff,
            Err(VaultError::EmptyInput) => Diff {
                base: None,
                candidate: None,
                ops: Vec::new(),
                windowed: false,
            },
            Err(e) => return Err(e),
        };
        diff.base = Some(previous.commit.clone());
        diff.candidate = Some(snapshot.clone());

        let (change, rule_error) = match rules {
            Ok(rules) => (Some(classify(&diff, &rules)), None),
            Err(e) => (None, Some(VaultError::from(e))),
        };
        Ok(Stored {
            snapshot,
            previous: Some(previous.commit),
            change,
            rule_error,
        })
    }
}
