//! Per-device exclusive locks
//!
//! At most one backup or deploy touches a device at a time. Deploys reject a
//! busy device instead of queueing behind it; backups do the same so a stuck
//! deploy never stalls a whole cycle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::errors::VaultError;

/// Held for as long as a task owns a device
#[derive(Debug)]
pub struct DeviceGuard {
    device: String,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        debug!("Released device lock: {}", self.device);
    }
}

/// Registry of per-device locks, cheap to clone
#[derive(Debug, Clone, Default)]
pub struct DeviceLocks {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl DeviceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, device: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(device.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Take the device lock or fail with `DeviceBusy`
    pub fn try_acquire(&self, device: &str) -> Result<DeviceGuard, VaultError> {
        let guard = self
            .lock_for(device)
            .try_lock_owned()
            .map_err(|_| VaultError::DeviceBusy(device.to_string()))?;
        debug!("Acquired device lock: {}", device);
        Ok(DeviceGuard {
            device: device.to_string(),
            _guard: guard,
        })
    }
}
