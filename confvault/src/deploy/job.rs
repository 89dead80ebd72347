//! Deploy job record

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deploy::fsm::{DeployEvent, DeployFsm, DeployState};
use crate::deploy::validate::ValidationResult;
use crate::errors::{ErrorRecord, VaultError};
use crate::models::device::Device;
use crate::models::snapshot::CommitRef;
use crate::utils::generate_uuid;

/// Terminal result of a deploy job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployOutcome {
    Success,
    RolledBack,
    Failed,
}

/// Cooperative cancellation flag shared between the caller and a running job
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// A request to push a configuration to one device
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub device: Device,
    pub proposed_config: String,
    pub cancel: CancelHandle,
}

impl DeployRequest {
    pub fn new(device: Device, proposed_config: impl Into<String>) -> Self {
        Self {
            device,
            proposed_config: proposed_config.into(),
            cancel: CancelHandle::new(),
        }
    }

    /// Handle the caller keeps to cancel the job later
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }
}

/// One deployment attempt, from request to terminal state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployJob {
    pub id: String,
    pub device: String,
    pub proposed_config: String,

    #[serde(flatten)]
    fsm: DeployFsm,

    #[serde(default)]
    pub validation: Vec<ValidationResult>,

    /// Apply attempts made for the proposed config
    #[serde(default)]
    pub attempts: u32,

    pub outcome: Option<DeployOutcome>,

    /// The error that ended or diverted the job
    pub error: Option<ErrorRecord>,

    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl DeployJob {
    pub fn new(device: &Device, proposed_config: &str) -> Self {
        Self {
            id: generate_uuid(),
            device: device.name.clone(),
            proposed_config: proposed_config.to_string(),
            fsm: DeployFsm::new(),
            validation: Vec::new(),
            attempts: 0,
            outcome: None,
            error: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn state(&self) -> DeployState {
        self.fsm.state()
    }

    pub fn fsm(&self) -> &DeployFsm {
        &self.fsm
    }

    pub fn rollback_ref(&self) -> Option<&CommitRef> {
        self.fsm.rollback_ref()
    }

    pub fn committed_ref(&self) -> Option<&CommitRef> {
        self.fsm.committed_ref()
    }

    pub fn requires_manual_intervention(&self) -> bool {
        self.fsm.requires_manual_intervention()
    }

    pub fn is_terminal(&self) -> bool {
        self.fsm.state().is_terminal()
    }

    /// Record the error that drives the next transition
    pub(crate) fn record_error(&mut self, err: &VaultError) {
        self.error = Some(ErrorRecord::new(&self.device, err));
    }

    /// Apply an FSM event and stamp the outcome once terminal
    pub(crate) fn advance(&mut self, event: DeployEvent) -> Result<DeployState, VaultError> {
        let state = self.fsm.process(event)?;
        if state.is_terminal() {
            self.outcome = Some(match state {
                DeployState::Committed => DeployOutcome::Success,
                DeployState::RolledBack => DeployOutcome::RolledBack,
                _ => DeployOutcome::Failed,
            });
            self.finished_at = Some(Utc::now());
        }
        Ok(state)
    }
}
