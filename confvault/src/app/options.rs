//! Application configuration options

use std::collections::HashMap;

use crate::backup::BackupSettings;
use crate::deploy::DeploySettings;
use crate::models::device::Platform;
use crate::normalize::VolatileRule;
use crate::storage::settings::Settings;

/// Main application options
#[derive(Debug, Clone, Default)]
pub struct AppOptions {
    /// Backup cycle settings
    pub backup: BackupSettings,

    /// Deploy engine settings
    pub deploy: DeploySettings,

    /// Extra volatile-line rules per platform
    pub volatile_rules: HashMap<Platform, Vec<VolatileRule>>,
}

impl From<&Settings> for AppOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            backup: settings.backup.clone(),
            deploy: settings.deploy.clone(),
            volatile_rules: settings.volatile_rules.clone(),
        }
    }
}
