//! Deploy engine
//!
//! Drives a [`DeployJob`] through dry run, validation, rollback capture,
//! apply, verification and commit. Any failure after the first mutating
//! command leads to a rollback to the captured snapshot.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::classify::{classify, CompiledRuleSet, Severity};
use crate::deploy::fsm::DeployEvent;
use crate::deploy::job::{CancelHandle, DeployJob, DeployRequest};
use crate::deploy::validate::{
    check_directives, check_dry_run, check_severity, check_syntax,
    default_disallowed_directives, DirectiveFilter, ValidationResult,
};
use crate::diff::{diff_text, DiffOptions};
use crate::errors::{RuleError, VaultError};
use crate::models::device::Device;
use crate::models::snapshot::{CommitRef, SnapshotMetadata, SnapshotSource};
use crate::normalize::Normalizer;
use crate::store::SnapshotStore;
use crate::sync::device_lock::DeviceLocks;
use crate::transport::Transport;
use crate::utils::{sha256_hash, with_retry, OperationTimeouts, RetryPolicy};

/// Deploy engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploySettings {
    /// Deploy jobs running at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default)]
    pub timeouts: OperationTimeouts,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub diff: DiffOptions,

    /// Changes at or above this severity are refused; `None` disables the check
    #[serde(default = "default_blocking_severity")]
    pub blocking_severity: Option<Severity>,

    #[serde(default = "default_disallowed_directives")]
    pub disallowed_directives: Vec<String>,
}

fn default_concurrency() -> usize {
    4
}

fn default_blocking_severity() -> Option<Severity> {
    Some(Severity::Critical)
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            timeouts: OperationTimeouts::default(),
            retry: RetryPolicy::default(),
            diff: DiffOptions::default(),
            blocking_severity: default_blocking_severity(),
            disallowed_directives: default_disallowed_directives(),
        }
    }
}

/// Device state captured before the first mutating command
struct RollbackPoint {
    commit: CommitRef,
    raw: String,
}

/// Runs deploy jobs against the transport
pub struct DeployEngine {
    store: Arc<dyn SnapshotStore>,
    transport: Arc<dyn Transport>,
    normalizer: Arc<Normalizer>,
    locks: DeviceLocks,
    pool: Arc<Semaphore>,
    directives: DirectiveFilter,
    settings: DeploySettings,
}

impl DeployEngine {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        transport: Arc<dyn Transport>,
        normalizer: Arc<Normalizer>,
        locks: DeviceLocks,
        settings: DeploySettings,
    ) -> Result<Self, RuleError> {
        let directives = DirectiveFilter::compile(&settings.disallowed_directives)?;
        Ok(Self {
            store,
            transport,
            normalizer,
            locks,
            pool: Arc::new(Semaphore::new(settings.concurrency.max(1))),
            directives,
            settings,
        })
    }

    pub fn settings(&self) -> &DeploySettings {
        &self.settings
    }

    /// Run a deploy job to a terminal state.
    ///
    /// Fails with [`VaultError::DeviceBusy`] without creating a job when the
    /// device is already locked by a backup or another deploy.
    pub async fn submit(
        &self,
        request: DeployRequest,
        rules: &CompiledRuleSet,
    ) -> Result<DeployJob, VaultError> {
        let _guard = self.locks.try_acquire(request.device.id())?;
        let _permit = self
            .pool
            .acquire()
            .await
            .map_err(|e| VaultError::Internal(e.to_string()))?;

        let mut job = DeployJob::new(&request.device, &request.proposed_config);
        info!("Deploy job {} started for {}", job.id, job.device);

        self.execute(&mut job, &request.device, &request.cancel, rules)
            .await;

        info!(
            "Deploy job {} for {} finished in state {}",
            job.id,
            job.device,
            job.state()
        );
        Ok(job)
    }

    async fn execute(
        &self,
        job: &mut DeployJob,
        device: &Device,
        cancel: &CancelHandle,
        rules: &CompiledRuleSet,
    ) {
        if let Err(e) = self.prepare(job, device, cancel, rules).await {
            self.abort(job, e);
            return;
        }

        let point = match self.capture_rollback_point(job, device).await {
            Ok(point) => point,
            Err(e) => {
                self.abort(job, e);
                return;
            }
        };

        if let Err(e) = self.advance(job, DeployEvent::BeginApply(point.commit.clone())) {
            self.abort(job, e);
            return;
        }

        match self.apply_and_verify(job, device, cancel).await {
            Ok(commit) => {
                if let Err(e) = self.advance(job, DeployEvent::Verified(commit)) {
                    error!("Deploy job {} could not commit: {}", job.id, e);
                }
            }
            Err(cause) => self.roll_back(job, device, &point, cause).await,
        }
    }

    /// Dry run and pre-conditions. Never touches the device.
    async fn prepare(
        &self,
        job: &mut DeployJob,
        device: &Device,
        cancel: &CancelHandle,
        rules: &CompiledRuleSet,
    ) -> Result<(), VaultError> {
        self.advance(job, DeployEvent::StartDryRun)?;
        check_cancelled(cancel)?;

        let proposed = self.normalizer.normalize(device.platform, &job.proposed_config);

        let (simulation, _) = with_retry(
            &self.settings.retry,
            self.settings.timeouts.apply,
            device.id(),
            "simulate",
            || self.transport.simulate(device, &job.proposed_config),
        )
        .await;
        let simulation = simulation?;

        let mut results = vec![check_dry_run(device.platform, &proposed, simulation.as_ref())];
        check_cancelled(cancel)?;

        results.push(check_syntax(&proposed));
        results.push(check_directives(&proposed, &self.directives));
        results.push(self.check_change_severity(device, &proposed, rules).await?);
        job.validation = results;

        let failed: Vec<&ValidationResult> =
            job.validation.iter().filter(|r| !r.passed).collect();
        if !failed.is_empty() {
            let message = failed
                .iter()
                .map(|r| format!("{}: {}", r.check, r.detail.as_deref().unwrap_or("failed")))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(VaultError::Validation(message));
        }

        self.advance(job, DeployEvent::Validated)?;
        check_cancelled(cancel)
    }

    async fn check_change_severity(
        &self,
        device: &Device,
        proposed: &str,
        rules: &CompiledRuleSet,
    ) -> Result<ValidationResult, VaultError> {
        let change = match self.store.get_latest(device.id()).await? {
            Some(latest) => match diff_text(&latest.config, proposed, &self.settings.diff) {
                Ok(mut diff) if !diff.is_empty() => {
                    diff.base = Some(latest.commit);
                    Some(classify(&diff, rules))
                }
                Ok(_) | Err(VaultError::EmptyInput) => None,
                Err(e) => return Err(e),
            },
            None => None,
        };
        Ok(check_severity(change.as_ref(), self.settings.blocking_severity))
    }

    /// Snapshot the live device so there is something to return to
    async fn capture_rollback_point(
        &self,
        job: &DeployJob,
        device: &Device,
    ) -> Result<RollbackPoint, VaultError> {
        let (raw, _) = with_retry(
            &self.settings.retry,
            self.settings.timeouts.fetch,
            device.id(),
            "fetch",
            || self.transport.fetch_config(device),
        )
        .await;
        let raw = raw?;

        let normalized = self.normalizer.normalize(device.platform, &raw);
        let commit = self
            .store
            .append(
                device.id(),
                &normalized,
                SnapshotMetadata {
                    source: SnapshotSource::PreDeploy,
                    raw_hash: sha256_hash(raw.as_bytes()),
                    job_id: Some(job.id.clone()),
                },
            )
            .await?;
        debug!("Deploy job {} captured rollback point {}", job.id, commit);

        Ok(RollbackPoint { commit, raw })
    }

    async fn apply_and_verify(
        &self,
        job: &mut DeployJob,
        device: &Device,
        cancel: &CancelHandle,
    ) -> Result<CommitRef, VaultError> {
        let proposed_raw = job.proposed_config.clone();

        let (ack, attempts) = with_retry(
            &self.settings.retry,
            self.settings.timeouts.apply,
            device.id(),
            "apply",
            || self.transport.apply_config(device, &proposed_raw),
        )
        .await;
        job.attempts += attempts;
        let ack = ack?;
        debug!("{} acknowledged {} lines", ack.device, ack.lines_sent);

        self.advance(job, DeployEvent::Applied)?;
        check_cancelled(cancel)?;

        let live = self.fetch_normalized(device).await?;
        let expected = self.normalizer.normalize(device.platform, &proposed_raw);
        self.verify_matches(&expected, &live, "proposed configuration")?;
        check_cancelled(cancel)?;

        let commit = self
            .store
            .append(
                device.id(),
                &live,
                SnapshotMetadata {
                    source: SnapshotSource::Deploy,
                    raw_hash: sha256_hash(proposed_raw.as_bytes()),
                    job_id: Some(job.id.clone()),
                },
            )
            .await?;
        Ok(commit)
    }

    async fn roll_back(
        &self,
        job: &mut DeployJob,
        device: &Device,
        point: &RollbackPoint,
        cause: VaultError,
    ) {
        warn!(
            "Deploy job {} on {} rolling back to {}: {}",
            job.id, job.device, point.commit, cause
        );
        job.record_error(&cause);
        let event = match cause {
            VaultError::Cancelled(_) => DeployEvent::Cancel,
            ref e => DeployEvent::BeginRollback(e.to_string()),
        };
        if let Err(e) = self.advance(job, event) {
            error!("Deploy job {} could not start rollback: {}", job.id, e);
            return;
        }

        match self.restore(device, point).await {
            Ok(()) => {
                if let Err(e) = self.advance(job, DeployEvent::RollbackVerified) {
                    error!("Deploy job {} could not finish rollback: {}", job.id, e);
                }
            }
            Err(e) => {
                let failure = VaultError::RollbackFailure(format!(
                    "{}; rollback to {} failed: {}",
                    cause_message(job),
                    point.commit,
                    e
                ));
                error!(
                    "Deploy job {} on {} needs manual intervention: {}",
                    job.id, job.device, failure
                );
                job.record_error(&failure);
                if let Err(e) = self.advance(job, DeployEvent::RollbackFailed(failure.to_string())) {
                    error!("Deploy job {} could not record rollback failure: {}", job.id, e);
                }
            }
        }
    }

    /// Reapply the captured config and confirm the device matches the snapshot
    async fn restore(&self, device: &Device, point: &RollbackPoint) -> Result<(), VaultError> {
        let (ack, _) = with_retry(
            &self.settings.retry,
            self.settings.timeouts.apply,
            device.id(),
            "rollback",
            || self.transport.apply_config(device, &point.raw),
        )
        .await;
        ack?;

        let live = self.fetch_normalized(device).await?;
        let snapshot = self.store.get_by_ref(&point.commit).await?;
        self.verify_matches(&snapshot.config, &live, "rollback snapshot")
    }

    async fn fetch_normalized(&self, device: &Device) -> Result<String, VaultError> {
        let (raw, _) = with_retry(
            &self.settings.retry,
            self.settings.timeouts.verify,
            device.id(),
            "verify",
            || self.transport.fetch_config(device),
        )
        .await;
        Ok(self.normalizer.normalize(device.platform, &raw?))
    }

    fn verify_matches(&self, expected: &str, live: &str, against: &str) -> Result<(), VaultError> {
        match diff_text(expected, live, &self.settings.diff) {
            Ok(diff) if !diff.is_empty() => {
                let summary = diff.summary();
                Err(VaultError::Verification(format!(
                    "live config differs from {} (+{} -{})",
                    against, summary.inserts, summary.deletes
                )))
            }
            Ok(_) | Err(VaultError::EmptyInput) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// End a job that has not touched the device
    fn abort(&self, job: &mut DeployJob, err: VaultError) {
        warn!("Deploy job {} on {} failed: {}", job.id, job.device, err);
        job.record_error(&err);
        let event = match err {
            VaultError::Cancelled(_) => DeployEvent::Cancel,
            ref e => DeployEvent::Fail(e.to_string()),
        };
        if let Err(e) = self.advance(job, event) {
            error!("Deploy job {} could not be failed: {}", job.id, e);
        }
    }

    fn advance(&self, job: &mut DeployJob, event: DeployEvent) -> Result<(), VaultError> {
        let from = job.state();
        let to = job.advance(event)?;
        info!("Deploy job {} on {}: {} -> {}", job.id, job.device, from, to);
        Ok(())
    }
}

fn check_cancelled(cancel: &CancelHandle) -> Result<(), VaultError> {
    if cancel.is_cancelled() {
        return Err(VaultError::Cancelled("cancelled by operator".to_string()));
    }
    Ok(())
}

fn cause_message(job: &DeployJob) -> String {
    job.error
        .as_ref()
        .map(|e| e.message.clone())
        .unwrap_or_else(|| "deploy failed".to_string())
}
