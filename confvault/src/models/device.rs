//! Device models

use std::fmt;

use serde::{Deserialize, Serialize};

/// Vendor platform of a managed device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[serde(alias = "cisco_ios")]
    Ios,
    #[serde(alias = "juniper_junos")]
    Junos,
    #[serde(alias = "arista_eos")]
    Eos,
    #[serde(other)]
    Other,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::Junos => "junos",
            Platform::Eos => "eos",
            Platform::Other => "other",
        }
    }

    /// Whether the platform structures its config with braces
    pub fn uses_braces(&self) -> bool {
        matches!(self, Platform::Junos)
    }
}

impl Default for Platform {
    fn default() -> Self {
        Platform::Other
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A managed network device
///
/// Registered once per backup cycle and never mutated while the cycle runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Unique device name, used as the device id
    pub name: String,

    /// Management address (hostname or IP)
    pub host: String,

    /// Vendor platform
    #[serde(alias = "device_type", default)]
    pub platform: Platform,

    /// Site label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,

    /// Connection profile, passed through to the transport untouched
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub profile: serde_json::Value,
}

impl Device {
    /// Create a new device
    pub fn new(name: impl Into<String>, host: impl Into<String>, platform: Platform) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            platform,
            site: None,
            profile: serde_json::Value::Null,
        }
    }

    /// Device id
    pub fn id(&self) -> &str {
        &self.name
    }
}
