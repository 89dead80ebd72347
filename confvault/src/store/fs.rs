//! Filesystem snapshot store
//!
//! Layout: `<root>/<device>-<hash>/<seq>.json`. The directory carries a short
//! digest of the exact device id so ids that sanitize alike stay apart. Seq
//! file names are zero-padded so lexical order matches sequence order. Files are created with `create_new` and never rewritten.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::errors::{StoreError, VaultError};
use crate::filesys::dir::Dir;
use crate::models::snapshot::{CommitRef, Snapshot, SnapshotMetadata};
use crate::store::{content_digest, SnapshotStore, StoreResult};
use crate::utils::{sanitize_file_name, sha256_hash};

/// Snapshot store persisting JSON documents under a root directory
#[derive(Debug)]
pub struct FsSnapshotStore {
    root: Dir,
    append_lock: Mutex<()>,
}

impl FsSnapshotStore {
    /// Create a store rooted at `root` (created lazily)
    pub fn new(root: Dir) -> Self {
        Self {
            root,
            append_lock: Mutex::new(()),
        }
    }

    fn device_dir(&self, device: &str) -> Dir {
        self.root.subdir(&dir_name(device))
    }

    async fn sequences(&self, device: &str) -> StoreResult<Vec<u64>> {
        let files = self
            .device_dir(device)
            .list_files()
            .await
            .map_err(backend)?;
        let mut seqs: Vec<u64> = files
            .iter()
            .filter(|p| p.extension().is_some_and(|e| e == "json"))
            .filter_map(|p| parse_seq(p))
            .collect();
        seqs.sort_unstable();
        Ok(seqs)
    }

    async fn read(&self, device: &str, seq: u64) -> StoreResult<Snapshot> {
        let file = self.device_dir(device).file(&file_name(seq));
        if !file.exists().await {
            return Err(StoreError::NotFound(format!("{}@{}", device, seq)));
        }
        let snapshot: Snapshot = file.read_json().await.map_err(backend)?;
        if snapshot.device != device {
            return Err(StoreError::Backend(format!(
                "{} holds a snapshot of {}",
                file.path().display(),
                snapshot.device
            )));
        }
        Ok(snapshot)
    }
}

#[async_trait]
impl SnapshotStore for FsSnapshotStore {
    async fn append(
        &self,
        device: &str,
        config: &str,
        metadata: SnapshotMetadata,
    ) -> StoreResult<CommitRef> {
        let _guard = self.append_lock.lock().await;

        let seq = self.sequences(device).await?.last().map_or(1, |s| s + 1);
        let commit = CommitRef {
            device: device.to_string(),
            seq,
            digest: content_digest(config),
        };
        let snapshot = Snapshot {
            device: device.to_string(),
            commit: commit.clone(),
            config: config.to_string(),
            raw_hash: metadata.raw_hash,
            source: metadata.source,
            created_at: Utc::now(),
            job_id: metadata.job_id,
        };

        let body = serde_json::to_vec_pretty(&snapshot)?;
        let file = self.device_dir(device).file(&file_name(seq));
        file.write_new(&body).await.map_err(|e| match e {
            VaultError::IoError(io) if io.kind() == std::io::ErrorKind::AlreadyExists => {
                StoreError::AlreadyExists(commit.to_string())
            }
            other => backend(other),
        })?;

        debug!("Stored snapshot {} at {}", commit, file.path().display());
        Ok(commit)
    }

    async fn get_latest(&self, device: &str) -> StoreResult<Option<Snapshot>> {
        match self.sequences(device).await?.last() {
            Some(seq) => self.read(device, *seq).await.map(Some),
            None => Ok(None),
        }
    }

    async fn get_by_ref(&self, commit: &CommitRef) -> StoreResult<Snapshot> {
        let snapshot = self.read(&commit.device, commit.seq).await?;
        if snapshot.commit != *commit {
            return Err(StoreError::NotFound(commit.to_string()));
        }
        Ok(snapshot)
    }

    async fn history(&self, device: &str) -> StoreResult<Vec<CommitRef>> {
        let mut refs = Vec::new();
        for seq in self.sequences(device).await? {
            refs.push(self.read(device, seq).await?.commit);
        }
        Ok(refs)
    }
}

fn backend(err: VaultError) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn dir_name(device: &str) -> String {
    let digest = sha256_hash(device.as_bytes());
    format!("{}-{}", sanitize_file_name(device), &digest[..12])
}

fn file_name(seq: u64) -> String {
    format!("{:010}.json", seq)
}

fn parse_seq(path: &Path) -> Option<u64> {
    path.file_stem()?.to_str()?.parse().ok()
}
