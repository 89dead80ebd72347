//! Deploy FSM unit tests

use confvault::deploy::fsm::{DeployEvent, DeployFsm, DeployState};
use confvault::errors::VaultError;
use confvault::models::snapshot::CommitRef;
use proptest::prelude::*;

fn commit(seq: u64) -> CommitRef {
    CommitRef {
        device: "core-rtr-01".to_string(),
        seq,
        digest: format!("{:064x}", seq),
    }
}

fn validated() -> DeployFsm {
    let mut fsm = DeployFsm::new();
    fsm.process(DeployEvent::StartDryRun).unwrap();
    fsm.process(DeployEvent::Validated).unwrap();
    fsm
}

#[test]
fn test_fsm_initial_state() {
    let fsm = DeployFsm::new();
    assert_eq!(fsm.state(), DeployState::Pending);
    assert!(fsm.error().is_none());
    assert!(fsm.rollback_ref().is_none());
    assert!(fsm.history().is_empty());
}

#[test]
fn test_fsm_commit_flow() {
    let mut fsm = validated();

    // Validated -> Applying
    fsm.process(DeployEvent::BeginApply(commit(1))).unwrap();
    assert_eq!(fsm.state(), DeployState::Applying);

    // Applying -> Verifying
    fsm.process(DeployEvent::Applied).unwrap();
    assert_eq!(fsm.state(), DeployState::Verifying);

    // Verifying -> Committed
    fsm.process(DeployEvent::Verified(commit(2))).unwrap();
    assert_eq!(fsm.state(), DeployState::Committed);
    assert_eq!(fsm.rollback_ref(), Some(&commit(1)));
    assert_eq!(fsm.committed_ref(), Some(&commit(2)));
    assert!(!fsm.requires_manual_intervention());
}

#[test]
fn test_fsm_validation_failure_never_applies() {
    let mut fsm = DeployFsm::new();
    fsm.process(DeployEvent::StartDryRun).unwrap();
    fsm.process(DeployEvent::Fail("severity critical".to_string()))
        .unwrap();

    assert_eq!(fsm.state(), DeployState::Failed);
    assert_eq!(fsm.error(), Some("severity critical"));
    assert!(fsm.rollback_ref().is_none());
    assert!(!fsm.requires_manual_intervention());
    assert!(!fsm
        .history()
        .iter()
        .any(|t| t.to == DeployState::Applying));
}

#[test]
fn test_fsm_rollback_flow() {
    let mut fsm = validated();
    fsm.process(DeployEvent::BeginApply(commit(1))).unwrap();
    fsm.process(DeployEvent::Applied).unwrap();
    fsm.process(DeployEvent::BeginRollback("mismatch".to_string()))
        .unwrap();
    assert_eq!(fsm.state(), DeployState::RollingBack);

    fsm.process(DeployEvent::RollbackVerified).unwrap();
    assert_eq!(fsm.state(), DeployState::RolledBack);
    assert_eq!(fsm.error(), Some("mismatch"));
    assert!(!fsm.requires_manual_intervention());
}

#[test]
fn test_fsm_cancel_before_apply_fails_cleanly() {
    let mut fsm = DeployFsm::new();
    fsm.process(DeployEvent::StartDryRun).unwrap();
    fsm.process(DeployEvent::Cancel).unwrap();

    assert_eq!(fsm.state(), DeployState::Failed);
    assert!(fsm.was_cancelled());
    assert!(fsm.rollback_ref().is_none());
}

#[test]
fn test_fsm_cancel_after_apply_rolls_back() {
    let mut fsm = validated();
    fsm.process(DeployEvent::BeginApply(commit(1))).unwrap();
    fsm.process(DeployEvent::Cancel).unwrap();

    assert_eq!(fsm.state(), DeployState::RollingBack);
    assert!(fsm.was_cancelled());
}

#[test]
fn test_fsm_terminal_states_reject_events() {
    let mut fsm = DeployFsm::new();
    fsm.process(DeployEvent::Fail("x".to_string())).unwrap();

    let result = fsm.process(DeployEvent::StartDryRun);
    assert!(matches!(
        result,
        Err(VaultError::InvalidTransition { .. })
    ));
    assert!(fsm.process(DeployEvent::Cancel).is_err());
    assert_eq!(fsm.state(), DeployState::Failed);
    assert_eq!(fsm.history().len(), 1);
}

#[test]
fn test_fsm_invalid_transition_leaves_state() {
    let mut fsm = validated();
    assert!(fsm.process(DeployEvent::Applied).is_err());
    assert!(fsm.process(DeployEvent::RollbackVerified).is_err());
    assert_eq!(fsm.state(), DeployState::Validated);
}

fn any_event() -> impl Strategy<Value = DeployEvent> {
    prop_oneof![
        Just(DeployEvent::StartDryRun),
        Just(DeployEvent::Validated),
        (1u64..5).prop_map(|seq| DeployEvent::BeginApply(commit(seq))),
        Just(DeployEvent::Applied),
        (5u64..9).prop_map(|seq| DeployEvent::Verified(commit(seq))),
        Just(DeployEvent::BeginRollback("boom".to_string())),
        Just(DeployEvent::RollbackVerified),
        Just(DeployEvent::RollbackFailed("stuck".to_string())),
        Just(DeployEvent::Fail("bad".to_string())),
        Just(DeployEvent::Cancel),
    ]
}

proptest! {
    #[test]
    fn prop_fsm_invariants_hold_for_any_event_sequence(
        events in proptest::collection::vec(any_event(), 0..24)
    ) {
        let mut fsm = DeployFsm::new();
        for event in events {
            let before = fsm.state();
            let result = fsm.process(event);

            if before.is_terminal() {
                prop_assert!(result.is_err());
                prop_assert_eq!(fsm.state(), before);
            }
            if fsm.state().after_apply() {
                prop_assert!(fsm.rollback_ref().is_some());
            }
            if fsm.requires_manual_intervention() {
                prop_assert_eq!(fsm.state(), DeployState::Failed);
                prop_assert!(fsm.rollback_ref().is_some());
            }
        }

        // No transition leaves a terminal state
        for transition in fsm.history() {
            prop_assert!(!transition.from.is_terminal());
        }
    }
}
