//! Deployment module

pub mod engine;
pub mod fsm;
pub mod job;
pub mod validate;

pub use engine::{DeployEngine, DeploySettings};
pub use job::{CancelHandle, DeployJob, DeployOutcome, DeployRequest};
