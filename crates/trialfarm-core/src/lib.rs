//! trialfarm-core: Core types and parsers for trialfarm
//!
//! This crate provides the fundamental types used throughout trialfarm:
//! - Farm, probe, and retry configuration
//! - Device telemetry parsing
//! - Tasks, outcomes, and queue items
//! - Trial report parsing
//! - Error handling

pub mod config;
pub mod error;
pub mod report;
pub mod task;
pub mod telemetry;

pub use config::*;
pub use error::*;
pub use report::*;
pub use task::*;
pub use telemetry::*;
