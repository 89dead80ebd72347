//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::AppOptions;
use crate::backup::{BackupOrchestrator, BackupResult};
use crate::classify::{classify, ClassifiedChange, RuleSet};
use crate::deploy::{DeployEngine, DeployJob, DeployRequest};
use crate::diff::compute_diff;
use crate::errors::VaultError;
use crate::models::device::Device;
use crate::normalize::Normalizer;
use crate::store::SnapshotStore;
use crate::sync::device_lock::DeviceLocks;
use crate::transport::Transport;

/// Main application state
///
/// Backups and deploys share one set of device locks, so a device is never
/// backed up while a deploy job holds it, and vice versa.
pub struct AppState {
    pub store: Arc<dyn SnapshotStore>,
    pub transport: Arc<dyn Transport>,
    pub normalizer: Arc<Normalizer>,
    pub locks: DeviceLocks,
    pub backup: BackupOrchestrator,
    pub deploy: DeployEngine,
}

impl AppState {
    /// Initialize application state
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        transport: Arc<dyn Transport>,
        options: AppOptions,
    ) -> Result<Self, VaultError> {
        info!("Initializing application state...");

        let normalizer = Arc::new(Normalizer::new(&options.volatile_rules)?);
        let locks = DeviceLocks::new();

        let backup = BackupOrchestrator::new(
            store.clone(),
            transport.clone(),
            normalizer.clone(),
            locks.clone(),
            options.backup,
        );
        let deploy = DeployEngine::new(
            store.clone(),
            transport.clone(),
            normalizer.clone(),
            locks.clone(),
            options.deploy,
        )?;

        Ok(Self {
            store,
            transport,
            normalizer,
            locks,
            backup,
            deploy,
        })
    }

    /// Back up every registered device
    pub async fn run_backup_cycle(&self, devices: &[Device], rules: &RuleSet) -> Vec<BackupResult> {
        self.backup.run_backup_cycle(devices, rules).await
    }

    /// Run a deploy job to completion.
    ///
    /// Rejected up front with [`VaultError::DeviceBusy`] if the device is
    /// locked, and with [`VaultError::Rule`] if the rule set does not compile.
    pub async fn submit_deploy_job(
        &self,
        request: DeployRequest,
        rules: &RuleSet,
    ) -> Result<DeployJob, VaultError> {
        let rules = rules.compile()?;
        self.deploy.submit(request, &rules).await
    }

    /// Classify the change between a device's two most recent snapshots.
    ///
    /// `None` when fewer than two snapshots exist.
    pub async fn diff_latest(
        &self,
        device: &str,
        rules: &RuleSet,
    ) -> Result<Option<ClassifiedChange>, VaultError> {
        let history = self.store.history(device).await?;
        let [.., previous, latest] = history.as_slice() else {
            return Ok(None);
        };

        let base = self.store.get_by_ref(previous).await?;
        let candidate = self.store.get_by_ref(latest).await?;
        let diff = match compute_diff(&base, &candidate, &self.backup.settings().diff) {
            Ok(diff) => diff,
            Err(VaultError::EmptyInput) => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(Some(classify(&diff, &rules.compile()?)))
    }
}
