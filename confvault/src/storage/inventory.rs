//! Device inventory (`devices.yaml`)

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::classify::RuleSet;
use crate::errors::VaultError;
use crate::filesys::file::File;
use crate::models::device::Device;

/// Registered devices, in backup order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub devices: Vec<Device>,
}

impl Inventory {
    pub fn from_yaml(text: &str) -> Result<Self, VaultError> {
        let inventory: Inventory = serde_yaml::from_str(text)?;
        inventory.check_unique()?;
        Ok(inventory)
    }

    pub async fn load(file: &File) -> Result<Self, VaultError> {
        Self::from_yaml(&file.read_string().await?)
    }

    pub fn get(&self, name: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.name == name)
    }

    fn check_unique(&self) -> Result<(), VaultError> {
        let mut seen = HashSet::new();
        for device in &self.devices {
            if device.name.trim().is_empty() {
                return Err(VaultError::ConfigError("device with empty name".to_string()));
            }
            if !seen.insert(device.name.as_str()) {
                return Err(VaultError::ConfigError(format!(
                    "duplicate device name: {}",
                    device.name
                )));
            }
        }
        Ok(())
    }
}

/// Load classification rules; a missing file means no rules
pub async fn load_rules(file: &File) -> Result<RuleSet, VaultError> {
    if !file.exists().await {
        return Ok(RuleSet::default());
    }
    file.read_yaml::<RuleSet>().await
}
