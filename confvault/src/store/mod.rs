//! Snapshot store boundary
//!
//! The store is an append-only, content-addressed history of normalized
//! configuration per device. Nothing here supports update or delete.
//!
//! - `MemorySnapshotStore`: in-process store for tests and dry runs
//! - `FsSnapshotStore`: one JSON document per snapshot on local disk

pub mod fs;
pub mod memory;

use async_trait::async_trait;

use crate::errors::StoreError;
use crate::models::snapshot::{CommitRef, Snapshot, SnapshotMetadata};
use crate::utils::sha256_hash;

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Append-only snapshot history.
///
/// Guarantees:
/// - `append` assigns a `CommitRef` whose `seq` is strictly greater than every
///   earlier commit for the same device, and whose digest is the SHA-256 of
///   the stored text.
/// - `get_by_ref` returns exactly what was appended under that ref.
/// - Appends for different devices may run concurrently.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Store a new normalized snapshot and return its commit ref
    async fn append(
        &self,
        device: &str,
        config: &str,
        metadata: SnapshotMetadata,
    ) -> StoreResult<CommitRef>;

    /// Most recent snapshot for a device
    async fn get_latest(&self, device: &str) -> StoreResult<Option<Snapshot>>;

    /// Snapshot by commit ref. Returns `StoreError::NotFound` if absent.
    async fn get_by_ref(&self, commit: &CommitRef) -> StoreResult<Snapshot>;

    /// All commit refs for a device, oldest first
    async fn history(&self, device: &str) -> StoreResult<Vec<CommitRef>>;
}

/// Content digest of normalized configuration text
pub fn content_digest(config: &str) -> String {
    sha256_hash(config.as_bytes())
}
