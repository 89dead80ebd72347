//! Device transport boundary
//!
//! Session handling (SSH, Telnet, NETCONF) lives outside this crate. The core
//! only sees fallible, latency-bearing fetch and apply calls.

pub mod dir;
pub mod fake;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::TransportError;
use crate::models::device::Device;

/// Acknowledgement returned by a successful apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyAck {
    pub device: String,
    pub lines_sent: usize,
    pub at: DateTime<Utc>,
}

impl ApplyAck {
    pub fn new(device: &Device, config: &str) -> Self {
        Self {
            device: device.name.clone(),
            lines_sent: config.lines().count(),
            at: Utc::now(),
        }
    }
}

/// Outcome of a device-side dry run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub accepted: bool,
    #[serde(default)]
    pub messages: Vec<String>,
}

/// Connection to managed devices
#[async_trait]
pub trait Transport: Send + Sync {
    /// Pull the running configuration
    async fn fetch_config(&self, device: &Device) -> Result<String, TransportError>;

    /// Push a full configuration
    async fn apply_config(&self, device: &Device, config: &str) -> Result<ApplyAck, TransportError>;

    /// Ask the device to check a configuration without applying it.
    ///
    /// `Ok(None)` means the transport cannot simulate and the caller should
    /// fall back to structural validation.
    async fn simulate(
        &self,
        _device: &Device,
        _config: &str,
    ) -> Result<Option<SimulationReport>, TransportError> {
        Ok(None)
    }
}
