//! Directory-backed transport
//!
//! Treats `<root>/<device>.cfg` as the device's running configuration. Useful
//! for exported configs and for exercising the engine without live devices.

use async_trait::async_trait;
use tracing::debug;

use crate::errors::TransportError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::device::Device;
use crate::transport::{ApplyAck, Transport};
use crate::utils::sanitize_file_name;

/// Transport reading and writing config files in a directory
#[derive(Debug, Clone)]
pub struct DirTransport {
    root: Dir,
}

impl DirTransport {
    pub fn new(root: Dir) -> Self {
        Self { root }
    }

    fn config_file(&self, device: &Device) -> File {
        self.root.file(&format!("{}.cfg", sanitize_file_name(&device.name)))
    }
}

#[async_trait]
impl Transport for DirTransport {
    async fn fetch_config(&self, device: &Device) -> Result<String, TransportError> {
        let file = self.config_file(device);
        debug!("Reading config for {} from {}", device.name, file.path().display());
        file.read_string()
            .await
            .map_err(|e| TransportError::Connection {
                device: device.name.clone(),
                message: e.to_string(),
            })
    }

    async fn apply_config(&self, device: &Device, config: &str) -> Result<ApplyAck, TransportError> {
        let file = self.config_file(device);
        file.write_atomic(config.as_bytes())
            .await
            .map_err(|e| TransportError::Rejected {
                device: device.name.clone(),
                message: e.to_string(),
            })?;
        Ok(ApplyAck::new(device, config))
    }
}
