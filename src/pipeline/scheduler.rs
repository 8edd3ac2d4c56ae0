use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::task::{Task, TaskStore};

/// Moves pending tasks from the store onto the work queue on a fixed timer
pub struct Scheduler {
    store: Arc<dyn TaskStore>,
    queue: mpsc::Sender<Task>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(store: Arc<dyn TaskStore>, queue: mpsc::Sender<Task>, interval: Duration) -> Self {
        Self { store, queue, interval }
    }

    /// Tick until `stop` is cancelled. The first tick fires one interval after start.
    pub async fn run(self, stop: CancellationToken) {
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Task scheduler started, polling every {:?}", self.interval);

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    self.schedule_available_tasks().await;
                }
            }
        }

        info!("Task scheduler stopped");
    }

    /// Dispatch pending tasks oldest first until the store is empty or the
    /// queue is full. Returns how many tasks reached the queue.
    pub async fn schedule_available_tasks(&self) -> usize {
        let mut dispatched = 0;

        loop {
            let task = match self.store.next_pending().await {
                Ok(Some(task)) => task,
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read next pending task: {}", e);
                    break;
                }
            };

            // The snapshot returned here is the subscriber list the worker will notify
            let task = match self.store.mark_in_progress(task.id).await {
                Ok(task) => task,
                Err(e) => {
                    warn!("Failed to mark task {} as in progress: {}", task.id, e);
                    break;
                }
            };

            let id = task.id;
            match self.queue.try_send(task) {
                Ok(()) => {
                    dispatched += 1;
                    debug!("Queued task {} for processing", id);
                }
                Err(e) => {
                    let reason = match e {
                        mpsc::error::TrySendError::Full(_) => "queue is full",
                        mpsc::error::TrySendError::Closed(_) => "queue is closed",
                    };
                    debug!("Task {} not queued ({}), returning it to pending", id, reason);
                    if let Err(e) = self.store.requeue(id).await {
                        warn!("Failed to return task {} to pending: {}", id, e);
                    }
                    break;
                }
            }
        }

        if dispatched > 0 {
            debug!("Scheduling pass dispatched {} tasks", dispatched);
        }
        dispatched
    }
}
