//! In-memory snapshot store

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::errors::StoreError;
use crate::models::snapshot::{CommitRef, Snapshot, SnapshotMetadata};
use crate::store::{content_digest, SnapshotStore, StoreResult};

/// Snapshot store backed by a `HashMap<device, Vec<Snapshot>>`
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    devices: Mutex<HashMap<String, Vec<Snapshot>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of snapshots held
    pub fn len(&self) -> usize {
        let devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());
        devices.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn append(
        &self,
        device: &str,
        config: &str,
        metadata: SnapshotMetadata,
    ) -> StoreResult<CommitRef> {
        let mut devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());
        let history = devices.entry(device.to_string()).or_default();
        let seq = history.last().map(|s| s.commit.seq + 1).unwrap_or(1);
        let commit = CommitRef {
            device: device.to_string(),
            seq,
            digest: content_digest(config),
        };
        history.push(Snapshot {
            device: device.to_string(),
            commit: commit.clone(),
            config: config.to_string(),
            raw_hash: metadata.raw_hash,
            source: metadata.source,
            created_at: Utc::now(),
            job_id: metadata.job_id,
        });
        Ok(commit)
    }

    async fn get_latest(&self, device: &str) -> StoreResult<Option<Snapshot>> {
        let devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());
        Ok(devices.get(device).and_then(|h| h.last().cloned()))
    }

    async fn get_by_ref(&self, commit: &CommitRef) -> StoreResult<Snapshot> {
        let devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());
        devices
            .get(&commit.device)
            .and_then(|h| h.iter().find(|s| &s.commit == commit).cloned())
            .ok_or_else(|| StoreError::NotFound(commit.to_string()))
    }

    async fn history(&self, device: &str) -> StoreResult<Vec<CommitRef>> {
        let devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());
        Ok(devices
            .get(device)
            .map(|h| h.iter().map(|s| s.commit.clone()).collect())
            .unwrap_or_default())
    }
}
