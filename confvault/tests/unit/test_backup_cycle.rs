//! Backup orchestrator tests against the in-memory store and fake transport

use std::sync::Arc;
use std::time::Duration;

use confvault::backup::{BackupOrchestrator, BackupSettings, BackupStatus};
use confvault::classify::{Rule, RuleScope, RuleSet, RuleTrigger, Severity};
use confvault::diff::OpKind;
use confvault::errors::ErrorKind;
use confvault::models::device::{Device, Platform};
use confvault::normalize::Normalizer;
use confvault::store::memory::MemorySnapshotStore;
use confvault::store::SnapshotStore;
use confvault::sync::device_lock::DeviceLocks;
use confvault::transport::fake::{Behaviour, FakeTransport};
use confvault::utils::{CooldownOptions, RetryPolicy};

const BASE_CONFIG: &str = "\
!
! Last configuration change at 10:01:07 UTC Mon Mar 3 2025
!
hostname {name}
!
interface GigabitEthernet0/1
 description uplink
 ip address 10.0.0.1 255.255.255.252
!
ntp server 10.0.0.5
end";

fn config_for(name: &str) -> String {
    BASE_CONFIG.replace("{name}", name)
}

fn devices(count: usize) -> Vec<Device> {
    (1..=count)
        .map(|i| Device::new(format!("rtr-{:02}", i), format!("10.0.1.{}", i), Platform::Ios))
        .collect()
}

fn settings() -> BackupSettings {
    BackupSettings {
        concurrency: 2,
        fetch_timeout: Duration::from_secs(5),
        retry: RetryPolicy {
            max_attempts: 2,
            cooldown: CooldownOptions {
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(10),
                multiplier: 2.0,
            },
        },
        ..Default::default()
    }
}

fn rules() -> RuleSet {
    RuleSet::new(vec![
        Rule {
            tag: "aaa".to_string(),
            pattern: r"^aaa\s".to_string(),
            scope: RuleScope::Keyword,
            severity: Severity::Critical,
            on: RuleTrigger::Any,
        },
        Rule {
            tag: "ntp".to_string(),
            pattern: r"^ntp\s".to_string(),
            scope: RuleScope::Keyword,
            severity: Severity::Minor,
            on: RuleTrigger::Any,
        },
    ])
}

struct Harness {
    store: Arc<MemorySnapshotStore>,
    transport: Arc<FakeTransport>,
    locks: DeviceLocks,
    orchestrator: BackupOrchestrator,
}

fn harness(devices: &[Device], settings: BackupSettings) -> Harness {
    let store = Arc::new(MemorySnapshotStore::new());
    let transport = Arc::new(FakeTransport::new());
    for device in devices {
        transport.set_config(&device.name, &config_for(&device.name));
    }
    let locks = DeviceLocks::new();
    let orchestrator = BackupOrchestrator::new(
        store.clone(),
        transport.clone(),
        Arc::new(Normalizer::with_defaults()),
        locks.clone(),
        settings,
    );
    Harness {
        store,
        transport,
        locks,
        orchestrator,
    }
}

#[tokio::test]
async fn test_first_backup_is_baseline() {
    let devices = devices(2);
    let h = harness(&devices, settings());

    let results = h.orchestrator.run_backup_cycle(&devices, &rules()).await;

    assert_eq!(results.len(), 2);
    for result in &results {
        assert_eq!(result.status, BackupStatus::Succeeded);
        assert!(result.snapshot.is_some());
        assert!(result.previous.is_none());
        assert!(result.change.is_none());
    }

    // Volatile header lines never reach the store
    let stored = h.store.get_latest("rtr-01").await.unwrap().unwrap();
    assert!(!stored.config.contains("Last configuration change"));
    assert!(stored.config.starts_with("hostname rtr-01"));
}

#[tokio::test]
async fn test_failing_device_does_not_affect_others() {
    let devices = devices(5);
    let h = harness(&devices, settings());
    h.transport.set_behaviour(
        "rtr-03",
        Behaviour {
            fail_fetch: true,
            ..Default::default()
        },
    );

    let results = h.orchestrator.run_backup_cycle(&devices, &rules()).await;

    let names: Vec<&str> = results.iter().map(|r| r.device.as_str()).collect();
    assert_eq!(names, vec!["rtr-01", "rtr-02", "rtr-03", "rtr-04", "rtr-05"]);

    for (index, result) in results.iter().enumerate() {
        if index == 2 {
            assert_eq!(result.status, BackupStatus::Failed);
            assert!(result.snapshot.is_none());
            let error = result.error.as_ref().unwrap();
            assert_eq!(error.kind, ErrorKind::Transport);
            assert_eq!(error.device, "rtr-03");
            assert_eq!(result.attempts, 2);
        } else {
            assert_eq!(result.status, BackupStatus::Succeeded);
            assert!(result.snapshot.is_some());
            assert!(result.error.is_none());
        }
    }
    assert_eq!(h.store.len(), 4);
}

#[tokio::test]
async fn test_unchanged_config_yields_empty_informational_diff() {
    let devices = devices(1);
    let h = harness(&devices, settings());
    h.orchestrator.run_backup_cycle(&devices, &rules()).await;

    // Only the volatile timestamp differs
    h.transport.set_config(
        "rtr-01",
        &config_for("rtr-01").replace("10:01:07", "23:59:59"),
    );
    let results = h.orchestrator.run_backup_cycle(&devices, &rules()).await;

    let result = &results[0];
    assert_eq!(result.status, BackupStatus::Succeeded);
    let change = result.change.as_ref().unwrap();
    assert!(change.diff.ops.is_empty());
    assert_eq!(change.severity, Severity::Informational);
    assert!(!result.has_changes());

    // A new snapshot is still recorded
    assert_eq!(h.store.history("rtr-01").await.unwrap().len(), 2);
    assert_eq!(result.previous.as_ref().unwrap().seq, 1);
    assert_eq!(result.snapshot.as_ref().unwrap().seq, 2);
}

#[tokio::test]
async fn test_critical_line_is_classified() {
    let devices = devices(1);
    let h = harness(&devices, settings());
    h.orchestrator.run_backup_cycle(&devices, &rules()).await;

    h.transport.set_config(
        "rtr-01",
        &config_for("rtr-01").replace("ntp server", "aaa new-model\nntp server"),
    );
    let results = h.orchestrator.run_backup_cycle(&devices, &rules()).await;

    let change = results[0].change.as_ref().unwrap();
    assert_eq!(change.severity, Severity::Critical);
    assert_eq!(change.tags, vec!["aaa".to_string()]);

    let inserts: Vec<_> = change
        .diff
        .ops
        .iter()
        .filter(|op| op.kind == OpKind::Insert)
        .collect();
    assert_eq!(inserts.len(), 1);
    assert_eq!(inserts[0].text, "aaa new-model");
    assert_eq!(change.diff.changes().count(), 1);
}

#[tokio::test]
async fn test_invalid_rules_still_store_snapshots() {
    let devices = devices(2);
    let h = harness(&devices, settings());
    let broken = RuleSet::new(vec![Rule {
        tag: "broken".to_string(),
        pattern: "(".to_string(),
        scope: RuleScope::Keyword,
        severity: Severity::Major,
        on: RuleTrigger::Any,
    }]);

    let results = h.orchestrator.run_backup_cycle(&devices, &broken).await;

    for result in &results {
        assert_eq!(result.status, BackupStatus::Unclassified);
        assert!(result.snapshot.is_some());
        assert_eq!(result.error.as_ref().unwrap().kind, ErrorKind::Rule);
    }
    assert_eq!(h.store.len(), 2);
}

#[tokio::test]
async fn test_transient_fetch_failure_is_retried() {
    let devices = devices(1);
    let h = harness(&devices, settings());
    h.transport.set_behaviour(
        "rtr-01",
        Behaviour {
            transient_fetch_failures: 1,
            ..Default::default()
        },
    );

    let results = h.orchestrator.run_backup_cycle(&devices, &rules()).await;

    assert_eq!(results[0].status, BackupStatus::Succeeded);
    assert_eq!(results[0].attempts, 2);
    assert_eq!(h.transport.fetch_count("rtr-01"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_slow_device_times_out() {
    let devices = devices(2);
    let h = harness(
        &devices,
        BackupSettings {
            fetch_timeout: Duration::from_millis(100),
            ..settings()
        },
    );
    h.transport.set_behaviour(
        "rtr-02",
        Behaviour {
            fetch_delay: Some(Duration::from_secs(60)),
            ..Default::default()
        },
    );

    let results = h.orchestrator.run_backup_cycle(&devices, &rules()).await;

    assert_eq!(results[0].status, BackupStatus::Succeeded);
    assert_eq!(results[1].status, BackupStatus::Failed);
    assert_eq!(results[1].error.as_ref().unwrap().kind, ErrorKind::Timeout);
}

#[tokio::test]
async fn test_locked_device_is_reported_busy() {
    let devices = devices(3);
    let h = harness(&devices, settings());
    let _deploy_in_flight = h.locks.try_acquire("rtr-02").unwrap();

    let results = h.orchestrator.run_backup_cycle(&devices, &rules()).await;

    assert_eq!(results[0].status, BackupStatus::Succeeded);
    assert_eq!(results[1].status, BackupStatus::Failed);
    assert_eq!(results[1].error.as_ref().unwrap().kind, ErrorKind::Busy);
    assert_eq!(results[2].status, BackupStatus::Succeeded);
    assert_eq!(h.transport.fetch_count("rtr-02"), 0);
}
