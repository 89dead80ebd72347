//! Error types for confvault

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for confvault
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Verification error: {0}")]
    Verification(String),

    #[error("Rollback failure: {0}")]
    RollbackFailure(String),

    #[error("Rule error: {0}")]
    Rule(#[from] RuleError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Both snapshots are empty")]
    EmptyInput,

    #[error("Device busy: {0}")]
    DeviceBusy(String),

    #[error("Invalid transition: {from} -> {event}")]
    InvalidTransition { from: String, event: String },

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl VaultError {
    /// Classification used in structured result records
    pub fn kind(&self) -> ErrorKind {
        match self {
            VaultError::Transport(TransportError::Timeout { .. }) => ErrorKind::Timeout,
            VaultError::Transport(_) => ErrorKind::Transport,
            VaultError::Validation(_) => ErrorKind::Validation,
            VaultError::Verification(_) => ErrorKind::Verification,
            VaultError::RollbackFailure(_) => ErrorKind::RollbackFailure,
            VaultError::Rule(_) => ErrorKind::Rule,
            VaultError::Store(_) => ErrorKind::Store,
            VaultError::EmptyInput => ErrorKind::EmptyInput,
            VaultError::DeviceBusy(_) => ErrorKind::Busy,
            VaultError::Cancelled(_) => ErrorKind::Cancelled,
            VaultError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            VaultError::NotFound(_) => ErrorKind::NotFound,
            VaultError::ConfigError(_)
            | VaultError::IoError(_)
            | VaultError::JsonError(_)
            | VaultError::YamlError(_) => ErrorKind::Config,
            VaultError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<anyhow::Error> for VaultError {
    fn from(err: anyhow::Error) -> Self {
        VaultError::Internal(err.to_string())
    }
}

/// Failure talking to a device through the transport collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection to {device} failed: {message}")]
    Connection { device: String, message: String },

    #[error("{operation} on {device} timed out after {after:?}")]
    Timeout {
        device: String,
        operation: String,
        after: Duration,
    },

    #[error("{device} rejected configuration: {message}")]
    Rejected { device: String, message: String },
}

impl TransportError {
    /// Whether retrying the same operation may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Connection { .. } | TransportError::Timeout { .. }
        )
    }
}

/// Malformed classification or normalization rule
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    #[error("rule '{tag}' has an invalid pattern '{pattern}': {message}")]
    InvalidPattern {
        tag: String,
        pattern: String,
        message: String,
    },
}

/// Snapshot store failure
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("snapshot not found: {0}")]
    NotFound(String),

    #[error("snapshot {0} already exists")]
    AlreadyExists(String),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Error classification carried in reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    Timeout,
    Validation,
    Verification,
    RollbackFailure,
    Rule,
    Store,
    EmptyInput,
    Busy,
    Cancelled,
    InvalidTransition,
    NotFound,
    Config,
    Internal,
}

/// Structured error detail attached to backup results and deploy jobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    pub device: String,
    pub at: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new(device: &str, err: &VaultError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            device: device.to_string(),
            at: Utc::now(),
        }
    }
}
