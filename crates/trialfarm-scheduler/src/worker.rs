//! A single remote device slot and the trials it runs

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use trialfarm_core::{FarmConfig, Outcome, QueueItem, Task, TrialReport, TrialResult, WorkerSpec};
use trialfarm_runtime::Transport;

use crate::probe::ResourceProbe;

/// Producer side of the shared result queue
pub type QueueSender = mpsc::UnboundedSender<QueueItem>;

/// Occupancy of a worker slot
///
/// A busy slot always holds the task it was claimed for. The lease tells
/// successive claims apart so a late finisher cannot release a newer claim.
#[derive(Debug, Clone, PartialEq)]
enum SlotState {
    Idle,
    Busy { task: Task, lease: u64 },
}

/// One host plus the accelerator device it exposes
pub struct Worker {
    id: String,
    command: String,
    transport: Arc<dyn Transport>,
    probe: ResourceProbe,
    state: Mutex<SlotState>,
    next_lease: AtomicU64,
    released: Arc<Notify>,
}

impl Worker {
    /// Create a worker; `released` is notified whenever the slot frees up
    pub fn new(
        spec: WorkerSpec,
        transport: Arc<dyn Transport>,
        config: &FarmConfig,
        released: Arc<Notify>,
    ) -> Self {
        let probe = ResourceProbe::new(transport.clone(), spec.device, config.probe.clone());
        Self {
            id: spec.id(),
            command: spec.render_command(&config.scheduler.command_template),
            transport,
            probe,
            state: Mutex::new(SlotState::Idle),
            next_lease: AtomicU64::new(0),
            released,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn probe(&self) -> &ResourceProbe {
        &self.probe
    }

    pub fn is_occupied(&self) -> bool {
        matches!(*self.lock_state(), SlotState::Busy { .. })
    }

    /// Task held by the slot, if it is busy
    pub fn tentative_task(&self) -> Option<Task> {
        match &*self.lock_state() {
            SlotState::Busy { task, .. } => Some(task.clone()),
            SlotState::Idle => None,
        }
    }

    /// Whether the slot is free and the device has stayed under its load thresholds
    pub async fn can_dispatch(&self) -> bool {
        !self.is_occupied() && self.probe.check().await
    }

    /// Liveness check
    ///
    /// If the host no longer answers, the held task (if any) goes back onto
    /// `queue` unchanged and the slot is cleared. Returns whether the worker
    /// is alive.
    pub async fn detect_failure_and_requeue(&self, queue: &QueueSender) -> bool {
        if self.probe.is_reachable().await {
            return true;
        }

        if let Some(task) = self.abandon() {
            warn!(
                worker = %self.id,
                index = task.index,
                "Worker unreachable, requeueing its task"
            );
            send(queue, QueueItem::Pending(task));
        } else {
            debug!(worker = %self.id, "Worker unreachable");
        }

        false
    }

    /// Claim the slot for `task` and run it in the background
    ///
    /// The task is visible through `tentative_task` before this returns. A
    /// busy slot hands the task back unchanged.
    pub fn dispatch(self: &Arc<Self>, task: Task, queue: &QueueSender) -> Result<JoinHandle<()>, Task> {
        let (task, lease) = self.claim(task)?;

        info!(
            worker = %self.id,
            index = task.index,
            attempt = task.attempts,
            command = %self.command,
            payload = %task.payload,
            "Dispatching trial"
        );

        let guard = SlotGuard {
            worker: Arc::clone(self),
            queue: queue.clone(),
            task,
            lease,
            done: false,
        };

        Ok(tokio::spawn(guard.run()))
    }

    fn claim(&self, mut task: Task) -> Result<(Task, u64), Task> {
        let mut state = self.lock_state();
        if matches!(*state, SlotState::Busy { .. }) {
            return Err(task);
        }

        task.attempts += 1;
        let lease = self.next_lease.fetch_add(1, Ordering::Relaxed);
        *state = SlotState::Busy {
            task: task.clone(),
            lease,
        };

        Ok((task, lease))
    }

    /// Free the slot if `lease` still holds it
    fn release(&self, lease: u64) -> bool {
        let mut state = self.lock_state();
        let held = matches!(&*state, SlotState::Busy { lease: held, .. } if *held == lease);
        if held {
            *state = SlotState::Idle;
            drop(state);
            self.released.notify_one();
        }
        held
    }

    /// Free the slot unconditionally, returning whatever task it held
    fn abandon(&self) -> Option<Task> {
        let mut state = self.lock_state();
        match std::mem::replace(&mut *state, SlotState::Idle) {
            SlotState::Busy { task, .. } => {
                drop(state);
                self.released.notify_one();
                Some(task)
            }
            SlotState::Idle => None,
        }
    }

    async fn execute(&self, task: &Task) -> Outcome {
        let output = match self.transport.execute(&self.command, &task.payload).await {
            Ok(output) => output,
            Err(e) => {
                warn!(worker = %self.id, index = task.index, error = %e, "Trial could not be run");
                return Outcome::Failure;
            }
        };

        match TrialReport::parse(&output) {
            Ok(report) => Outcome::Success(TrialResult::from_report(&report)),
            Err(e) => {
                warn!(
                    worker = %self.id,
                    index = task.index,
                    error = %e,
                    output_tail = %output_tail(&output),
                    "Trial failed"
                );
                Outcome::Failure
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Ownership of one claimed slot
///
/// Dropping the guard before the trial reports back (the spawned task
/// panicked or was aborted) releases the slot and requeues the task.
struct SlotGuard {
    worker: Arc<Worker>,
    queue: QueueSender,
    task: Task,
    lease: u64,
    done: bool,
}

impl SlotGuard {
    async fn run(mut self) {
        let outcome = self.worker.execute(&self.task).await;
        let item = match outcome {
            Outcome::Success(result) => {
                info!(
                    worker = %self.worker.id,
                    index = self.task.index,
                    metric = result.metric,
                    minutes = result.duration_minutes,
                    "Trial succeeded"
                );
                QueueItem::Completed {
                    index: self.task.index,
                    result,
                }
            }
            Outcome::Failure => QueueItem::Pending(self.task.clone()),
        };

        self.done = true;
        if self.worker.release(self.lease) {
            send(&self.queue, item);
        } else {
            debug!(
                worker = %self.worker.id,
                index = self.task.index,
                "Slot already cleared by liveness check, dropping stale outcome"
            );
        }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if !self.done && self.worker.release(self.lease) {
            warn!(worker = %self.worker.id, index = self.task.index, "Trial aborted, requeueing");
            send(&self.queue, QueueItem::Pending(self.task.clone()));
        }
    }
}

fn send(queue: &QueueSender, item: QueueItem) {
    if queue.send(item).is_err() {
        debug!("Result queue closed");
    }
}

fn output_tail(output: &str) -> &str {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .unwrap_or_default()
}
