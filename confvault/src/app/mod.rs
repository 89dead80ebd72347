//! Application wiring and command dispatch

pub mod options;
pub mod run;
pub mod state;
