//! trialfarm-scheduler: Telemetry-gated trial scheduler
//!
//! This crate provides the scheduling logic for farming trials out to workers:
//! - Device availability probing
//! - Per-worker dispatch with a single occupancy state
//! - Round-robin selection under a global concurrency cap
//! - The queue-driven collection loop

pub mod pool;
pub mod probe;
pub mod scheduler;
pub mod worker;

pub use pool::ClusterPool;
pub use probe::ResourceProbe;
pub use scheduler::{run_entries, Scheduler};
pub use worker::{QueueSender, Worker};
