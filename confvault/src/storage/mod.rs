//! Vault storage: layout, settings and inventory files

pub mod inventory;
pub mod layout;
pub mod settings;
