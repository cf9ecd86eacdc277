//! Task, outcome, and queue item type definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::report::TrialReport;

/// One trial to run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Submission index; results are addressed by it
    pub index: usize,
    /// Opaque descriptor fed to the trial executable on stdin
    pub payload: String,
    /// Number of times this task has been handed to a worker
    #[serde(default)]
    pub attempts: u32,
}

impl Task {
    pub fn new(index: usize, payload: impl Into<String>) -> Self {
        Self {
            index,
            payload: payload.into(),
            attempts: 0,
        }
    }
}

/// Metric and duration of a trial that ran to completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    /// Validation metric reported by the trial
    pub metric: f64,
    /// Wall-clock running time in minutes
    pub duration_minutes: f64,
    /// When the worker collected the report
    pub completed_at: DateTime<Utc>,
}

impl TrialResult {
    pub fn from_report(report: &TrialReport) -> Self {
        Self {
            metric: report.metric,
            duration_minutes: report.running_time_secs / 60.0,
            completed_at: Utc::now(),
        }
    }
}

/// Result of running a task once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    Success(TrialResult),
    Failure,
}

/// Item carried by the shared result queue
#[derive(Debug, Clone, PartialEq)]
pub enum QueueItem {
    /// Task waiting to be dispatched, either seeded or requeued after a failure
    Pending(Task),
    /// Requeued task whose backoff delay has elapsed
    Due(Task),
    /// A task finished successfully
    Completed { index: usize, result: TrialResult },
}

/// Final state of a task slot once the scheduler is done with it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Resolution {
    /// The trial ran to completion
    Completed(TrialResult),
    /// The configured attempt limit was reached
    GaveUp { attempts: u32 },
}

impl Resolution {
    pub fn result(&self) -> Option<&TrialResult> {
        match self {
            Resolution::Completed(result) => Some(result),
            Resolution::GaveUp { .. } => None,
        }
    }
}

/// A submitted entry whose result is filled in place
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEntry {
    pub payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Resolution>,
}

impl TaskEntry {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            result: None,
        }
    }
}
