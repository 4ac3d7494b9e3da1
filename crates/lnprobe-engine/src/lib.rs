//! lnprobe-engine: probe scheduling and lifecycle.
//! Drives probes from target selection through classification, tracks
//! in-flight payments, and runs the periodic tasks that tie it together.

pub mod config;
pub mod engine;
pub mod lifecycle;
pub mod poller;
pub mod scheduler;
pub mod tracker;

#[cfg(test)]
mod testkit;

pub use config::EngineConfig;
pub use engine::{ProbeEngine, ProbeStats};
pub use lifecycle::{Launch, Lifecycle};
pub use poller::PollReport;
pub use scheduler::{Scheduler, Task, TaskOutcome, TaskRunner};
pub use tracker::{PendingEntry, PendingProbe, PendingTracker};
