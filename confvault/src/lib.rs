//! confvault library
//!
//! Configuration backup, change classification and safe deployment for
//! network devices.

pub mod app;
pub mod backup;
pub mod classify;
pub mod deploy;
pub mod diff;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod normalize;
pub mod storage;
pub mod store;
pub mod sync;
pub mod transport;
pub mod utils;
