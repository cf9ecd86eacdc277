//! Queue-driven dispatch and collection loop

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use trialfarm_core::{
    FarmConfig, FarmError, FarmResult, QueueItem, Resolution, RetryConfig, Task, TaskEntry,
};
use uuid::Uuid;

use crate::pool::ClusterPool;

/// Scheduler drives every submitted task to a resolution
pub struct Scheduler {
    /// Worker pool
    pool: ClusterPool,
    /// Requeue policy
    retry: RetryConfig,
}

impl Scheduler {
    /// Create a new scheduler over an existing pool
    pub fn new(pool: ClusterPool, retry: RetryConfig) -> Self {
        Self { pool, retry }
    }

    /// Create a scheduler whose pool reaches `config.workers` over the shell transport
    pub fn connect(config: &FarmConfig) -> FarmResult<Self> {
        let pool = ClusterPool::connect(config)?;
        Ok(Self::new(pool, config.retry.clone()))
    }

    pub fn pool(&self) -> &ClusterPool {
        &self.pool
    }

    /// Run every payload until it is resolved, returning resolutions in submission order
    ///
    /// Failed trials are requeued without surfacing an error. With the default
    /// retry policy this only returns once every trial has succeeded.
    pub async fn run(&mut self, payloads: Vec<String>) -> FarmResult<Vec<Resolution>> {
        let run_id = Uuid::new_v4();
        let total = payloads.len();

        info!(
            run_id = %run_id,
            tasks = total,
            workers = self.pool.workers().len(),
            "Starting run"
        );

        let mut slots: Vec<Option<Resolution>> = vec![None; total];
        let (tx, mut rx) = mpsc::unbounded_channel();

        for (index, payload) in payloads.into_iter().enumerate() {
            tx.send(QueueItem::Pending(Task::new(index, payload)))
                .map_err(|_| FarmError::Scheduler("result queue closed".to_string()))?;
        }

        let mut remaining = total;
        while remaining > 0 {
            let item = rx
                .recv()
                .await
                .ok_or_else(|| FarmError::Scheduler("result queue closed".to_string()))?;

            match item {
                QueueItem::Pending(task) => {
                    if self.retry.exhausted(task.attempts) {
                        warn!(
                            run_id = %run_id,
                            index = task.index,
                            attempts = task.attempts,
                            "Giving up on task"
                        );
                        let resolution = Resolution::GaveUp {
                            attempts: task.attempts,
                        };
                        if record(&mut slots, task.index, resolution) {
                            remaining -= 1;
                        }
                    } else if let Some(delay) = self.retry.backoff(task.attempts) {
                        debug!(
                            run_id = %run_id,
                            index = task.index,
                            delay_ms = delay.as_millis() as u64,
                            "Delaying retry"
                        );
                        let tx = tx.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            let _ = tx.send(QueueItem::Due(task));
                        });
                    } else {
                        self.pool.dispatch(task, &tx).await;
                    }
                }
                QueueItem::Due(task) => {
                    self.pool.dispatch(task, &tx).await;
                }
                QueueItem::Completed { index, result } => {
                    if record(&mut slots, index, Resolution::Completed(result)) {
                        remaining -= 1;
                        info!(
                            run_id = %run_id,
                            index = index,
                            remaining = remaining,
                            "Task resolved"
                        );
                    }
                }
            }
        }

        info!(run_id = %run_id, tasks = total, "Run finished");

        slots
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| FarmError::Scheduler("unresolved task slot".to_string()))
    }

    /// Run every entry's payload and store each resolution in the entry
    pub async fn run_entries(&mut self, entries: &mut [TaskEntry]) -> FarmResult<()> {
        let payloads = entries.iter().map(|e| e.payload.clone()).collect();
        let resolutions = self.run(payloads).await?;
        for (entry, resolution) in entries.iter_mut().zip(resolutions) {
            entry.result = Some(resolution);
        }
        Ok(())
    }
}

/// Fill a result slot; a slot that is already resolved (or out of range) is left alone
fn record(slots: &mut [Option<Resolution>], index: usize, resolution: Resolution) -> bool {
    match slots.get_mut(index) {
        Some(slot @ None) => {
            *slot = Some(resolution);
            true
        }
        Some(Some(_)) => {
            debug!(index = index, "Ignoring outcome for resolved task");
            false
        }
        None => {
            warn!(index = index, "Ignoring outcome for unknown task");
            false
        }
    }
}

/// Connect to the workers in `config` and resolve every entry in place
pub async fn run_entries(config: &FarmConfig, entries: &mut [TaskEntry]) -> FarmResult<()> {
    let mut scheduler = Scheduler::connect(config)?;
    scheduler.run_entries(entries).await
}
