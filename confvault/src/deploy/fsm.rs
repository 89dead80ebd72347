//! Finite State Machine for configuration deployment
//!
//! ```text
//! Pending -> DryRun -> Validated -> Applying -> Verifying -> Committed
//!    |         |          |            |            |
//!    +---------+----------+--> Failed  +------------+--> RollingBack -> RolledBack
//!                                                               |
//!                                                               +--> Failed (manual intervention)
//! ```
//!
//! `Applying` can only be entered with a rollback reference, so every state
//! at or after `Applying` carries one. Terminal states accept no events.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::VaultError;
use crate::models::snapshot::CommitRef;

/// Deployment state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployState {
    /// Created, nothing done yet
    Pending,

    /// Simulating the proposed config
    DryRun,

    /// Pre-conditions passed
    Validated,

    /// Sending the proposed config to the device
    Applying,

    /// Comparing the live config with the proposed one
    Verifying,

    /// Reapplying the rollback reference
    RollingBack,

    /// Deployed and verified
    Committed,

    /// Recovered to the rollback reference
    RolledBack,

    /// Needs operator attention if the device was touched
    Failed,
}

impl DeployState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeployState::Committed | DeployState::RolledBack | DeployState::Failed
        )
    }

    /// States reachable only after the device may have been mutated
    pub fn after_apply(&self) -> bool {
        matches!(
            self,
            DeployState::Applying
                | DeployState::Verifying
                | DeployState::RollingBack
                | DeployState::Committed
                | DeployState::RolledBack
        )
    }
}

impl fmt::Display for DeployState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Deployment event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployEvent {
    /// Begin the dry run
    StartDryRun,

    /// Dry run and pre-conditions passed
    Validated,

    /// Rollback reference captured; about to send the first mutating command
    BeginApply(CommitRef),

    /// Device acknowledged the proposed config
    Applied,

    /// Live config matches; the new snapshot has been persisted
    Verified(CommitRef),

    /// Apply or verification failed, or cancellation arrived after apply began
    BeginRollback(String),

    /// Device re-verified against the rollback reference
    RollbackVerified,

    /// Rollback could not be confirmed
    RollbackFailed(String),

    /// Failure before the device was touched
    Fail(String),

    /// Operator cancellation
    Cancel,
}

impl DeployEvent {
    fn name(&self) -> &'static str {
        match self {
            DeployEvent::StartDryRun => "StartDryRun",
            DeployEvent::Validated => "Validated",
            DeployEvent::BeginApply(_) => "BeginApply",
            DeployEvent::Applied => "Applied",
            DeployEvent::Verified(_) => "Verified",
            DeployEvent::BeginRollback(_) => "BeginRollback",
            DeployEvent::RollbackVerified => "RollbackVerified",
            DeployEvent::RollbackFailed(_) => "RollbackFailed",
            DeployEvent::Fail(_) => "Fail",
            DeployEvent::Cancel => "Cancel",
        }
    }
}

/// A recorded state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: DeployState,
    pub to: DeployState,
    pub at: DateTime<Utc>,
}

/// Deployment FSM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployFsm {
    state: DeployState,
    rollback_ref: Option<CommitRef>,
    committed_ref: Option<CommitRef>,
    #[serde(rename = "reason")]
    error: Option<String>,
    manual_intervention: bool,
    cancelled: bool,
    history: Vec<Transition>,
}

impl DeployFsm {
    /// Create a new FSM in pending state
    pub fn new() -> Self {
        Self {
            state: DeployState::Pending,
            rollback_ref: None,
            committed_ref: None,
            error: None,
            manual_intervention: false,
            cancelled: false,
            history: Vec::new(),
        }
    }

    /// Get current state
    pub fn state(&self) -> DeployState {
        self.state
    }

    /// Snapshot captured before the first mutating command
    pub fn rollback_ref(&self) -> Option<&CommitRef> {
        self.rollback_ref.as_ref()
    }

    /// Snapshot persisted by a successful deploy
    pub fn committed_ref(&self) -> Option<&CommitRef> {
        self.committed_ref.as_ref()
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Whether an operator must inspect the device
    pub fn requires_manual_intervention(&self) -> bool {
        self.manual_intervention
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: DeployEvent) -> Result<DeployState, VaultError> {
        use DeployEvent as E;
        use DeployState as S;

        let new_state = match (self.state, &event) {
            (S::Pending, E::StartDryRun) => S::DryRun,
            (S::DryRun, E::Validated) => S::Validated,
            (S::Validated, E::BeginApply(commit)) => {
                self.rollback_ref = Some(commit.clone());
                S::Applying
            }
            (S::Applying, E::Applied) => S::Verifying,
            (S::Verifying, E::Verified(commit)) => {
                self.committed_ref = Some(commit.clone());
                S::Committed
            }

            // Before the device is touched: fail fast, safe to discard
            (S::Pending | S::DryRun | S::Validated, E::Fail(err)) => {
                self.error = Some(err.clone());
                S::Failed
            }
            (S::Pending | S::DryRun | S::Validated, E::Cancel) => {
                self.cancelled = true;
                self.error = Some("cancelled before apply".to_string());
                S::Failed
            }

            // After apply began: every failure and cancellation means rollback
            (S::Applying | S::Verifying, E::BeginRollback(err)) => {
                self.error = Some(err.clone());
                S::RollingBack
            }
            (S::Applying | S::Verifying, E::Cancel) => {
                self.cancelled = true;
                self.error = Some("cancelled after apply began".to_string());
                S::RollingBack
            }
            (S::RollingBack, E::RollbackVerified) => S::RolledBack,
            (S::RollingBack, E::RollbackFailed(err)) => {
                self.error = Some(err.clone());
                self.manual_intervention = true;
                S::Failed
            }

            // Invalid transitions, including anything out of a terminal state
            (state, event) => {
                return Err(VaultError::InvalidTransition {
                    from: state.to_string(),
                    event: event.name().to_string(),
                });
            }
        };

        self.history.push(Transition {
            from: self.state,
            to: new_state,
            at: Utc::now(),
        });
        self.state = new_state;
        Ok(new_state)
    }
}

impl Default for DeployFsm {
    fn default() -> Self {
        Self::new()
    }
}
