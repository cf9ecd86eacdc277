//! Worker selection under a global concurrency cap

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use trialfarm_core::{FarmConfig, FarmError, FarmResult, QueueItem, Task, WorkerSpec};
use trialfarm_runtime::{ShellTransport, Transport};

use crate::worker::{QueueSender, Worker};

/// Ordered worker pool with a round-robin cursor
///
/// The cursor is only touched through `&mut self`, by the control loop.
pub struct ClusterPool {
    workers: Vec<Arc<Worker>>,
    cursor: usize,
    max_running: usize,
    poll_interval: Duration,
    released: Arc<Notify>,
}

impl ClusterPool {
    /// Build the pool from `config.workers`, reaching each host over the shell transport
    pub fn connect(config: &FarmConfig) -> FarmResult<Self> {
        let workers = config
            .workers
            .iter()
            .map(|spec| {
                let transport: Arc<dyn Transport> = Arc::new(ShellTransport::new(
                    spec.host.clone(),
                    config.probe.status_command.clone(),
                    config.transport.clone(),
                ));
                (spec.clone(), transport)
            })
            .collect();

        Self::with_transports(config, workers)
    }

    /// Build the pool from worker specs paired with the transport to reach them
    pub fn with_transports(
        config: &FarmConfig,
        workers: Vec<(WorkerSpec, Arc<dyn Transport>)>,
    ) -> FarmResult<Self> {
        config.validate()?;
        if workers.is_empty() {
            return Err(FarmError::Config("worker pool is empty".to_string()));
        }

        let released = Arc::new(Notify::new());
        let workers: Vec<Arc<Worker>> = workers
            .into_iter()
            .map(|(spec, transport)| {
                Arc::new(Worker::new(spec, transport, config, released.clone()))
            })
            .collect();

        info!(
            workers = workers.len(),
            max_running = config.scheduler.max_running_workers,
            "Cluster pool initialized"
        );

        Ok(Self {
            workers,
            cursor: 0,
            max_running: config.scheduler.max_running_workers,
            poll_interval: config.scheduler.poll_interval(),
            released,
        })
    }

    pub fn workers(&self) -> &[Arc<Worker>] {
        &self.workers
    }

    /// Position the next selection scan starts from
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn occupied_count(&self) -> usize {
        self.workers.iter().filter(|w| w.is_occupied()).count()
    }

    /// Count live workers that hold a task
    ///
    /// Runs the liveness check on every worker, so unreachable workers give
    /// their held task back to `queue`. Unreachable workers do not count.
    pub async fn running_count(&self, queue: &QueueSender) -> usize {
        let mut count = 0;
        for worker in &self.workers {
            let alive = worker.detect_failure_and_requeue(queue).await;
            if alive && worker.is_occupied() {
                count += 1;
            }
        }
        count
    }

    /// Wait for capacity, then pick the next dispatchable worker in cyclic order
    pub async fn select_worker(&mut self, queue: &QueueSender) -> Arc<Worker> {
        loop {
            let mut running = self.running_count(queue).await;
            while running >= self.max_running {
                debug!(
                    running = running,
                    max_running = self.max_running,
                    "Pool at capacity"
                );
                self.wait_for_release().await;
                running = self.running_count(queue).await;
            }

            if let Some(worker) = self.next_dispatchable().await {
                return worker;
            }

            debug!("No dispatchable worker");
            self.wait_for_release().await;
        }
    }

    /// Hand `task` to the next selected worker
    ///
    /// If the worker was claimed between selection and dispatch, the task
    /// goes back onto `queue` unchanged.
    pub async fn dispatch(&mut self, task: Task, queue: &QueueSender) {
        let worker = self.select_worker(queue).await;
        if let Err(task) = worker.dispatch(task, queue) {
            warn!(worker = %worker.id(), index = task.index, "Worker taken before dispatch");
            if queue.send(QueueItem::Pending(task)).is_err() {
                debug!("Result queue closed");
            }
        }
    }

    async fn next_dispatchable(&mut self) -> Option<Arc<Worker>> {
        let len = self.workers.len();
        for offset in 0..len {
            let index = (self.cursor + offset) % len;
            if self.workers[index].can_dispatch().await {
                self.cursor = (index + 1) % len;
                return Some(self.workers[index].clone());
            }
        }
        None
    }

    /// Sleep until a worker frees its slot, or at most `poll_interval`
    async fn wait_for_release(&self) {
        let _ = tokio::time::timeout(self.poll_interval, self.released.notified()).await;
    }
}
