//! Settings file management

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::backup::BackupSettings;
use crate::deploy::DeploySettings;
use crate::logs::LogLevel;
use crate::models::device::Platform;
use crate::normalize::VolatileRule;

/// Vault settings, read from `settings.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines on stdout
    #[serde(default)]
    pub json_logs: bool,

    /// Also write a daily rolling log file under `logs/`
    #[serde(default)]
    pub log_to_file: bool,

    #[serde(default)]
    pub backup: BackupSettings,

    #[serde(default)]
    pub deploy: DeploySettings,

    /// Volatile-line rules added to the built-in ones, per platform
    #[serde(default)]
    pub volatile_rules: HashMap<Platform, Vec<VolatileRule>>,

    #[serde(default)]
    pub transport: TransportSettings,
}

/// Directory transport settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransportSettings {
    /// Directory holding `<device>.cfg` files; defaults to `configs/`
    #[serde(default)]
    pub source_dir: Option<String>,
}
