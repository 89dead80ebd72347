//! Deploy engine tests against the in-memory store and fake transport

use std::sync::Arc;
use std::time::Duration;

use confvault::classify::{CompiledRuleSet, Rule, RuleScope, RuleSet, RuleTrigger, Severity};
use confvault::deploy::fsm::DeployState;
use confvault::deploy::{DeployEngine, DeployOutcome, DeployRequest, DeploySettings};
use confvault::errors::{ErrorKind, VaultError};
use confvault::models::device::{Device, Platform};
use confvault::models::snapshot::{SnapshotMetadata, SnapshotSource};
use confvault::normalize::Normalizer;
use confvault::store::memory::MemorySnapshotStore;
use confvault::store::SnapshotStore;
use confvault::sync::device_lock::DeviceLocks;
use confvault::transport::fake::{Behaviour, FakeTransport};
use confvault::transport::SimulationReport;
use confvault::utils::{CooldownOptions, OperationTimeouts, RetryPolicy};

const RUNNING: &str = "\
!
! Last configuration change at 09:12:44 UTC Tue Mar 4 2025
!
hostname core-rtr-01
!
interface GigabitEthernet0/1
 description uplink-old
!
end";

const PROPOSED: &str = "\
hostname core-rtr-01
!
interface GigabitEthernet0/1
 description uplink-new
!
end";

fn device() -> Device {
    Device::new("core-rtr-01", "10.0.0.1", Platform::Ios)
}

fn settings() -> DeploySettings {
    DeploySettings {
        concurrency: 2,
        timeouts: OperationTimeouts {
            fetch: Duration::from_secs(5),
            apply: Duration::from_secs(60),
            verify: Duration::from_secs(5),
        },
        retry: RetryPolicy {
            max_attempts: 3,
            cooldown: CooldownOptions {
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(10),
                multiplier: 2.0,
            },
        },
        ..Default::default()
    }
}

fn rules() -> CompiledRuleSet {
    RuleSet::new(vec![Rule {
        tag: "aaa".to_string(),
        pattern: r"^aaa\s".to_string(),
        scope: RuleScope::Keyword,
        severity: Severity::Critical,
        on: RuleTrigger::Any,
    }])
    .compile()
    .unwrap()
}

struct Harness {
    store: Arc<MemorySnapshotStore>,
    transport: Arc<FakeTransport>,
    locks: DeviceLocks,
    normalizer: Arc<Normalizer>,
    engine: Arc<DeployEngine>,
}

fn harness(settings: DeploySettings) -> Harness {
    let store = Arc::new(MemorySnapshotStore::new());
    let transport = Arc::new(FakeTransport::new().with_config("core-rtr-01", RUNNING));
    let locks = DeviceLocks::new();
    let normalizer = Arc::new(Normalizer::with_defaults());
    let engine = DeployEngine::new(
        store.clone(),
        transport.clone(),
        normalizer.clone(),
        locks.clone(),
        settings,
    )
    .unwrap();
    Harness {
        store,
        transport,
        locks,
        normalizer,
        engine: Arc::new(engine),
    }
}

#[tokio::test]
async fn test_deploy_commits_verified_config() {
    let h = harness(settings());

    let job = h
        .engine
        .submit(DeployRequest::new(device(), PROPOSED), &rules())
        .await
        .unwrap();

    assert_eq!(job.state(), DeployState::Committed);
    assert_eq!(job.outcome, Some(DeployOutcome::Success));
    assert_eq!(job.attempts, 1);
    assert!(job.error.is_none());
    assert!(job.validation.iter().all(|r| r.passed));
    assert_eq!(h.transport.config("core-rtr-01").as_deref(), Some(PROPOSED));

    let rollback = job.rollback_ref().unwrap();
    let committed = job.committed_ref().unwrap();
    assert!(committed.seq > rollback.seq);

    let pre = h.store.get_by_ref(rollback).await.unwrap();
    assert_eq!(pre.source, SnapshotSource::PreDeploy);
    assert_eq!(pre.job_id.as_deref(), Some(job.id.as_str()));
    assert!(pre.config.contains("uplink-old"));

    let post = h.store.get_by_ref(committed).await.unwrap();
    assert_eq!(post.source, SnapshotSource::Deploy);
    assert_eq!(post.config, h.normalizer.normalize(Platform::Ios, PROPOSED));

    let states: Vec<DeployState> = job.fsm().history().iter().map(|t| t.to).collect();
    assert_eq!(
        states,
        vec![
            DeployState::DryRun,
            DeployState::Validated,
            DeployState::Applying,
            DeployState::Verifying,
            DeployState::Committed,
        ]
    );
}

#[tokio::test]
async fn test_verification_mismatch_rolls_back() {
    let h = harness(settings());
    h.transport.set_behaviour(
        "core-rtr-01",
        Behaviour {
            apply_drift: Some("logging host 10.9.9.9".to_string()),
            ..Default::default()
        },
    );

    let job = h
        .engine
        .submit(DeployRequest::new(device(), PROPOSED), &rules())
        .await
        .unwrap();

    assert_eq!(job.state(), DeployState::RolledBack);
    assert_eq!(job.outcome, Some(DeployOutcome::RolledBack));
    assert!(!job.requires_manual_intervention());
    assert_eq!(job.error.as_ref().unwrap().kind, ErrorKind::Verification);

    // The rollback reapplied the captured running config
    assert_eq!(
        h.transport.applied("core-rtr-01"),
        vec![PROPOSED.to_string(), RUNNING.to_string()]
    );

    // A fresh fetch matches the pre-deploy snapshot
    let live = h.transport.config("core-rtr-01").unwrap();
    let snapshot = h.store.get_by_ref(job.rollback_ref().unwrap()).await.unwrap();
    assert_eq!(h.normalizer.normalize(Platform::Ios, &live), snapshot.config);
    assert!(job.committed_ref().is_none());
}

#[tokio::test]
async fn test_failed_rollback_requires_manual_intervention() {
    let h = harness(settings());
    h.transport.set_behaviour(
        "core-rtr-01",
        Behaviour {
            apply_drift: Some("logging host 10.9.9.9".to_string()),
            rollback_drift: Some("logging host 10.6.6.6".to_string()),
            ..Default::default()
        },
    );

    let job = h
        .engine
        .submit(DeployRequest::new(device(), PROPOSED), &rules())
        .await
        .unwrap();

    assert_eq!(job.state(), DeployState::Failed);
    assert_eq!(job.outcome, Some(DeployOutcome::Failed));
    assert!(job.requires_manual_intervention());
    assert_eq!(job.error.as_ref().unwrap().kind, ErrorKind::RollbackFailure);
    assert!(job.rollback_ref().is_some());
    assert!(job
        .fsm()
        .history()
        .iter()
        .any(|t| t.to == DeployState::RollingBack));
}

#[tokio::test]
async fn test_disallowed_directive_never_touches_device() {
    let h = harness(settings());
    let proposed = format!("{}\nreload in 5", PROPOSED);

    let job = h
        .engine
        .submit(DeployRequest::new(device(), proposed), &rules())
        .await
        .unwrap();

    assert_eq!(job.state(), DeployState::Failed);
    assert_eq!(job.error.as_ref().unwrap().kind, ErrorKind::Validation);
    assert!(!job.requires_manual_intervention());
    assert!(job.rollback_ref().is_none());
    assert!(h.transport.applied("core-rtr-01").is_empty());
    assert!(h.store.is_empty());

    let failed: Vec<&str> = job
        .validation
        .iter()
        .filter(|r| !r.passed)
        .map(|r| r.check.as_str())
        .collect();
    assert_eq!(failed, vec!["disallowed_directives"]);
}

async fn seed_baseline(h: &Harness) {
    let baseline = h.normalizer.normalize(Platform::Ios, RUNNING);
    h.store
        .append(
            "core-rtr-01",
            &baseline,
            SnapshotMetadata {
                source: SnapshotSource::Backup,
                raw_hash: "raw".to_string(),
                job_id: None,
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_blocking_severity_rejects_critical_change() {
    let h = harness(settings());
    seed_baseline(&h).await;

    let proposed = PROPOSED.replace("end", "aaa new-model\nend");
    let job = h
        .engine
        .submit(DeployRequest::new(device(), proposed.clone()), &rules())
        .await
        .unwrap();

    assert_eq!(job.state(), DeployState::Failed);
    assert!(job.validation.iter().any(|r| r.check == "severity" && !r.passed));
    assert!(h.transport.applied("core-rtr-01").is_empty());

    // The same change is allowed once the threshold is lifted
    let relaxed = harness(DeploySettings {
        blocking_severity: None,
        ..settings()
    });
    seed_baseline(&relaxed).await;
    let job = relaxed
        .engine
        .submit(DeployRequest::new(device(), proposed), &rules())
        .await
        .unwrap();
    assert_eq!(job.state(), DeployState::Committed);
    assert!(job.validation.iter().all(|r| r.passed));
}

#[tokio::test]
async fn test_rejected_simulation_fails_before_apply() {
    let h = harness(settings());
    h.transport.set_behaviour(
        "core-rtr-01",
        Behaviour {
            simulation: Some(SimulationReport {
                accepted: false,
                messages: vec!["% Invalid input detected at '^' marker.".to_string()],
            }),
            ..Default::default()
        },
    );

    let job = h
        .engine
        .submit(DeployRequest::new(device(), PROPOSED), &rules())
        .await
        .unwrap();

    assert_eq!(job.state(), DeployState::Failed);
    assert!(!job.validation[0].passed);
    assert_eq!(job.validation[0].check, "dry_run");
    assert!(h.transport.applied("core-rtr-01").is_empty());
}

#[tokio::test]
async fn test_transient_apply_failures_are_retried() {
    let h = harness(settings());
    h.transport.set_behaviour(
        "core-rtr-01",
        Behaviour {
            transient_apply_failures: 2,
            ..Default::default()
        },
    );

    let job = h
        .engine
        .submit(DeployRequest::new(device(), PROPOSED), &rules())
        .await
        .unwrap();

    assert_eq!(job.state(), DeployState::Committed);
    assert_eq!(job.attempts, 3);
}

#[tokio::test]
async fn test_rejected_apply_is_not_retried() {
    let h = harness(settings());
    h.transport.set_behaviour(
        "core-rtr-01",
        Behaviour {
            reject_apply: true,
            ..Default::default()
        },
    );

    let job = h
        .engine
        .submit(DeployRequest::new(device(), PROPOSED), &rules())
        .await
        .unwrap();

    assert_eq!(job.attempts, 1);
    assert!(job.rollback_ref().is_some());
    assert!(job.is_terminal());
    assert_ne!(job.state(), DeployState::Committed);
}

#[tokio::test]
async fn test_busy_device_is_rejected() {
    let h = harness(settings());
    let _backup_in_flight = h.locks.try_acquire("core-rtr-01").unwrap();

    let result = h
        .engine
        .submit(DeployRequest::new(device(), PROPOSED), &rules())
        .await;

    assert!(matches!(result, Err(VaultError::DeviceBusy(_))));
    assert!(h.transport.applied("core-rtr-01").is_empty());
}

#[tokio::test]
async fn test_cancel_before_apply_leaves_device_alone() {
    let h = harness(settings());
    let request = DeployRequest::new(device(), PROPOSED);
    request.cancel_handle().cancel();

    let job = h.engine.submit(request, &rules()).await.unwrap();

    assert_eq!(job.state(), DeployState::Failed);
    assert!(job.fsm().was_cancelled());
    assert_eq!(job.error.as_ref().unwrap().kind, ErrorKind::Cancelled);
    assert!(job.rollback_ref().is_none());
    assert!(h.transport.applied("core-rtr-01").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_after_apply_rolls_back() {
    let h = harness(settings());
    h.transport.set_behaviour(
        "core-rtr-01",
        Behaviour {
            apply_delay: Some(Duration::from_secs(10)),
            ..Default::default()
        },
    );

    let request = DeployRequest::new(device(), PROPOSED);
    let cancel = request.cancel_handle();
    let engine = h.engine.clone();
    let running = tokio::spawn(async move { engine.submit(request, &rules()).await });

    // Cancel while the apply is in flight
    tokio::time::sleep(Duration::from_secs(1)).await;
    cancel.cancel();

    let job = running.await.unwrap().unwrap();
    assert_eq!(job.state(), DeployState::RolledBack);
    assert!(job.fsm().was_cancelled());
    assert_eq!(
        h.transport.config("core-rtr-01").as_deref(),
        Some(RUNNING)
    );
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_device_during_apply_needs_operator() {
    let h = harness(DeploySettings {
        timeouts: OperationTimeouts {
            apply: Duration::from_secs(1),
            ..settings().timeouts
        },
        ..settings()
    });
    h.transport.set_behaviour(
        "core-rtr-01",
        Behaviour {
            apply_delay: Some(Duration::from_secs(30)),
            ..Default::default()
        },
    );

    let job = h
        .engine
        .submit(DeployRequest::new(device(), PROPOSED), &rules())
        .await
        .unwrap();

    assert_eq!(job.attempts, 3);
    assert_eq!(job.state(), DeployState::Failed);
    assert!(job.requires_manual_intervention());
    assert_eq!(job.error.as_ref().unwrap().kind, ErrorKind::RollbackFailure);
}
