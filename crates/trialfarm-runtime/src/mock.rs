//! Mock transport for testing.
//!
//! Serves scripted status reports and trial outputs, records every call, and
//! can hold executions open until the test releases them. Higher-level
//! scheduling code can be driven deterministically without real hosts.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use trialfarm_core::{FarmError, FarmResult};

use crate::traits::Transport;

/// Render a status report listing one device line per `(used_mib, total_mib, util_pct)`
pub fn device_report(devices: &[(u64, u64, u32)]) -> String {
    let mut report = String::from("| Fan  Temp  Perf  Pwr:Usage/Cap|         Memory-Usage | GPU-Util  Compute M. |\n");
    for (used, total, util) in devices {
        report.push_str(&format!(
            "| 30%   45C    P2    70W / 250W | {:>6}MiB / {:>6}MiB | {:>6}%      Default |\n",
            used, total, util
        ));
    }
    report
}

/// Report for a single idle device
pub fn idle_report() -> String {
    device_report(&[(0, 11178, 0)])
}

/// Report for a single fully loaded device
pub fn busy_report() -> String {
    device_report(&[(11000, 11178, 100)])
}

/// Output of a trial that finished with the given time and metric
pub fn trial_output(running_time_secs: f64, metric: f64) -> String {
    format!(
        "loading data\ntraining\nrunning time: {}\nvalid performance: {}\n",
        running_time_secs, metric
    )
}

enum Status {
    Report(String),
    Unreachable,
}

/// A test-double that records calls and serves scripted responses
pub struct MockTransport {
    /// One-shot status responses, served before `status`
    scripted_status: Mutex<VecDeque<Status>>,
    /// Status served once the script is exhausted
    status: Mutex<Status>,
    /// One-shot execution outputs, served before `output`
    scripted_outputs: Mutex<VecDeque<FarmResult<String>>>,
    /// Output served once the script is exhausted
    output: Mutex<String>,
    /// Stdin of every execution, in call order
    inputs: Mutex<Vec<String>>,
    /// Every executed command, in call order
    commands: Mutex<Vec<String>>,
    exec_delay: Duration,
    gate: watch::Sender<bool>,
    status_calls: AtomicUsize,
    running: AtomicUsize,
    peak_running: AtomicUsize,
}

impl MockTransport {
    /// Create a mock whose device is idle and whose trials succeed
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            scripted_status: Mutex::new(VecDeque::new()),
            status: Mutex::new(Status::Report(idle_report())),
            scripted_outputs: Mutex::new(VecDeque::new()),
            output: Mutex::new(trial_output(60.0, 0.5)),
            inputs: Mutex::new(Vec::new()),
            commands: Mutex::new(Vec::new()),
            exec_delay: Duration::ZERO,
            gate,
            status_calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            peak_running: AtomicUsize::new(0),
        }
    }

    /// Serve this report once the script is exhausted
    pub fn with_status(self, report: impl Into<String>) -> Self {
        self.set_status(report);
        self
    }

    /// Serve this output once the script is exhausted
    pub fn with_output(self, output: impl Into<String>) -> Self {
        *self.output.lock().unwrap() = output.into();
        self
    }

    /// Sleep this long inside every execution
    pub fn with_exec_delay(mut self, delay: Duration) -> Self {
        self.exec_delay = delay;
        self
    }

    /// Block executions until `release_executions` is called
    pub fn with_held_executions(self) -> Self {
        self.gate.send_replace(false);
        self
    }

    pub fn set_status(&self, report: impl Into<String>) {
        *self.status.lock().unwrap() = Status::Report(report.into());
    }

    /// Make every later status query fail as if the host were down
    pub fn set_unreachable(&self) {
        *self.status.lock().unwrap() = Status::Unreachable;
    }

    /// Queue a one-shot status report
    pub fn push_status(&self, report: impl Into<String>) {
        self.scripted_status
            .lock()
            .unwrap()
            .push_back(Status::Report(report.into()));
    }

    /// Queue a one-shot status failure
    pub fn push_unreachable(&self) {
        self.scripted_status
            .lock()
            .unwrap()
            .push_back(Status::Unreachable);
    }

    /// Queue a one-shot execution output
    pub fn push_output(&self, output: impl Into<String>) {
        self.scripted_outputs
            .lock()
            .unwrap()
            .push_back(Ok(output.into()));
    }

    /// Queue a one-shot execution failure
    pub fn push_exec_error(&self, message: impl Into<String>) {
        self.scripted_outputs
            .lock()
            .unwrap()
            .push_back(Err(FarmError::Transport(message.into())));
    }

    pub fn release_executions(&self) {
        self.gate.send_replace(true);
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn exec_calls(&self) -> usize {
        self.inputs.lock().unwrap().len()
    }

    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    /// Executions currently in progress
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Highest number of executions ever in progress at once
    pub fn peak_running(&self) -> usize {
        self.peak_running.load(Ordering::SeqCst)
    }

    fn next_output(&self) -> FarmResult<String> {
        match self.scripted_outputs.lock().unwrap().pop_front() {
            Some(output) => output,
            None => Ok(self.output.lock().unwrap().clone()),
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn status_report(&self) -> FarmResult<String> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);

        let scripted = self.scripted_status.lock().unwrap().pop_front();
        let report = match scripted {
            Some(Status::Report(report)) => Some(report),
            Some(Status::Unreachable) => None,
            None => match &*self.status.lock().unwrap() {
                Status::Report(report) => Some(report.clone()),
                Status::Unreachable => None,
            },
        };

        report.ok_or_else(|| FarmError::Transport("host unreachable".to_string()))
    }

    async fn execute(&self, command: &str, stdin: &str) -> FarmResult<String> {
        self.commands.lock().unwrap().push(command.to_string());
        self.inputs.lock().unwrap().push(stdin.to_string());

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_running.fetch_max(now, Ordering::SeqCst);

        let mut gate = self.gate.subscribe();
        // The sender lives as long as the mock, so this only ends once released.
        let _ = gate.wait_for(|open| *open).await;
        if !self.exec_delay.is_zero() {
            tokio::time::sleep(self.exec_delay).await;
        }

        self.running.fetch_sub(1, Ordering::SeqCst);
        self.next_output()
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
