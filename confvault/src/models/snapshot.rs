//! Snapshot models

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a snapshot came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotSource {
    /// Captured by a backup cycle
    Backup,

    /// Captured right before a deploy mutates the device
    PreDeploy,

    /// Captured after a verified deploy
    Deploy,
}

/// Opaque handle into the snapshot store
///
/// `seq` is assigned by the store and strictly increases per device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommitRef {
    pub device: String,
    pub seq: u64,
    pub digest: String,
}

impl CommitRef {
    /// Short digest form (first 12 hex chars)
    pub fn short(&self) -> &str {
        &self.digest[..12.min(self.digest.len())]
    }
}

impl fmt::Display for CommitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}-{}", self.device, self.seq, self.short())
    }
}

/// Metadata supplied when appending a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub source: SnapshotSource,

    /// SHA-256 of the raw (pre-normalization) text
    pub raw_hash: String,

    /// Deploy job that produced the snapshot, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

/// Immutable normalized configuration capture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub device: String,
    pub commit: CommitRef,
    pub config: String,
    pub raw_hash: String,
    pub source: SnapshotSource,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}
