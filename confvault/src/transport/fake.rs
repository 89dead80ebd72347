//! Scriptable in-memory transport
//!
//! Each device holds a running config and a [`Behaviour`] describing how the
//! fake should misbehave: failing fetches, rejected or slow applies, configs
//! that drift after apply, or rollbacks that do not stick.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::TransportError;
use crate::models::device::Device;
use crate::transport::{ApplyAck, SimulationReport, Transport};

/// Failure script for one device
#[derive(Debug, Clone, Default)]
pub struct Behaviour {
    /// Every fetch fails with a connection error
    pub fail_fetch: bool,

    /// The first N fetches fail with a connection error
    pub transient_fetch_failures: u32,

    /// The first N applies fail with a connection error
    pub transient_apply_failures: u32,

    /// Every apply is rejected by the device
    pub reject_apply: bool,

    /// Line appended to the running config by the first successful apply
    pub apply_drift: Option<String>,

    /// Line appended by every later successful apply (breaks rollback)
    pub rollback_drift: Option<String>,

    /// Delay before an apply is acknowledged
    pub apply_delay: Option<Duration>,

    /// Delay before a fetch returns
    pub fetch_delay: Option<Duration>,

    /// Device-side simulation result; `None` means unsupported
    pub simulation: Option<SimulationReport>,
}

#[derive(Debug, Default)]
struct DeviceState {
    config: Option<String>,
    behaviour: Behaviour,
    fetches: u32,
    fetch_failures: u32,
    apply_failures: u32,
    applied: Vec<String>,
}

/// In-memory transport with per-device failure scripts
#[derive(Debug, Default)]
pub struct FakeTransport {
    devices: Mutex<HashMap<String, DeviceState>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, device: &str, f: impl FnOnce(&mut DeviceState) -> R) -> R {
        let mut devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());
        f(devices.entry(device.to_string()).or_default())
    }

    /// Set a device's running config
    pub fn set_config(&self, device: &str, config: &str) {
        self.with_state(device, |s| s.config = Some(config.to_string()));
    }

    /// Builder form of [`FakeTransport::set_config`]
    pub fn with_config(self, device: &str, config: &str) -> Self {
        self.set_config(device, config);
        self
    }

    /// Replace a device's failure script
    pub fn set_behaviour(&self, device: &str, behaviour: Behaviour) {
        self.with_state(device, |s| s.behaviour = behaviour);
    }

    /// Current running config
    pub fn config(&self, device: &str) -> Option<String> {
        self.with_state(device, |s| s.config.clone())
    }

    /// Configs accepted by apply, in order
    pub fn applied(&self, device: &str) -> Vec<String> {
        self.with_state(device, |s| s.applied.clone())
    }

    /// Number of fetch calls, successful or not
    pub fn fetch_count(&self, device: &str) -> u32 {
        self.with_state(device, |s| s.fetches)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn fetch_config(&self, device: &Device) -> Result<String, TransportError> {
        let delay = self.with_state(&device.name, |s| s.behaviour.fetch_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.with_state(&device.name, |s| {
            s.fetches += 1;
            if s.behaviour.fail_fetch || s.fetch_failures < s.behaviour.transient_fetch_failures {
                s.fetch_failures += 1;
                return Err(TransportError::Connection {
                    device: device.name.clone(),
                    message: "simulated connection timeout".to_string(),
                });
            }
            s.config.clone().ok_or_else(|| TransportError::Connection {
                device: device.name.clone(),
                message: "device unreachable".to_string(),
            })
        })
    }

    async fn apply_config(&self, device: &Device, config: &str) -> Result<ApplyAck, TransportError> {
        let delay = self.with_state(&device.name, |s| s.behaviour.apply_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.with_state(&device.name, |s| {
            if s.behaviour.reject_apply {
                return Err(TransportError::Rejected {
                    device: device.name.clone(),
                    message: "% Invalid input detected".to_string(),
                });
            }
            if s.apply_failures < s.behaviour.transient_apply_failures {
                s.apply_failures += 1;
                return Err(TransportError::Connection {
                    device: device.name.clone(),
                    message: "session dropped".to_string(),
                });
            }

            let drift = if s.applied.is_empty() {
                s.behaviour.apply_drift.clone()
            } else {
                s.behaviour.rollback_drift.clone()
            };
            s.applied.push(config.to_string());
            s.config = Some(match drift {
                Some(line) => format!("{}\n{}", config.trim_end(), line),
                None => config.to_string(),
            });
            Ok(ApplyAck::new(device, config))
        })
    }

    async fn simulate(
        &self,
        device: &Device,
        _config: &str,
    ) -> Result<Option<SimulationReport>, TransportError> {
        Ok(self.with_state(&device.name, |s| s.behaviour.simulation.clone()))
    }
}
