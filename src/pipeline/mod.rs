// Task pipeline
//
// Three kinds of actors communicate only through the task store and two
// channels:
// - Scheduler: one timer-driven loop moving pending tasks onto the work queue
// - Worker: N loops running fetch, publish, cleanup, delete and notify
// - Event consumer: external, reads the outcome event bus

pub mod events;
pub mod lifecycle;
pub mod scheduler;
pub mod worker;

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use events::{EventBus, OutcomeEvent};
pub use lifecycle::LifecycleState;
pub use scheduler::Scheduler;
pub use worker::{SharedQueue, Worker, WorkerContext};

use crate::config::Config;
use crate::error::Result;
use crate::media::{LinkValidator, MediaFetcher, MediaPublisher};
use crate::task::{GroupId, StatusHandle, Task, TaskStore};

/// Receiving end of the outcome event bus
pub type OutcomeEvents = mpsc::Receiver<OutcomeEvent>;

struct Lifecycle {
    state: LifecycleState,
    stop: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Entry point of the pipeline: submission plus start/stop of the actors
pub struct Pipeline {
    config: Config,
    ctx: WorkerContext,
    queue_tx: mpsc::Sender<Task>,
    queue_rx: SharedQueue,
    lifecycle: Mutex<Lifecycle>,
}

impl Pipeline {
    /// Build a stopped pipeline and the receiver of its outcome events
    pub fn new(
        config: Config,
        store: Arc<dyn TaskStore>,
        fetcher: Arc<dyn MediaFetcher>,
        publisher: Arc<dyn MediaPublisher>,
    ) -> Result<(Self, OutcomeEvents)> {
        config.validate()?;

        let validator = Arc::new(LinkValidator::new(&config.links)?);
        let (events, events_rx) = EventBus::new(config.pipeline.event_capacity);
        let (queue_tx, queue_rx) = mpsc::channel(config.pipeline.queue_capacity);

        let ctx = WorkerContext {
            store,
            fetcher,
            publisher,
            validator,
            events,
            output_dir: config.pipeline.output_dir.clone(),
            fetch_timeout: config.pipeline.fetch_timeout(),
            publish_timeout: config.pipeline.publish_timeout(),
        };

        let pipeline = Self {
            config,
            ctx,
            queue_tx,
            queue_rx: Arc::new(Mutex::new(queue_rx)),
            lifecycle: Mutex::new(Lifecycle {
                state: LifecycleState::Stopped,
                stop: CancellationToken::new(),
                handles: Vec::new(),
            }),
        };

        Ok((pipeline, events_rx))
    }

    /// Register interest of `group_id` in `link`.
    ///
    /// Creates a pending task for a new link, otherwise adds the group to the
    /// live task. Submitting the same group twice changes nothing.
    pub async fn submit(
        &self,
        link: &str,
        group_id: GroupId,
        status_handle: Option<StatusHandle>,
    ) -> Result<Task> {
        let existing = self.ctx.store.find_by_link(link).await?;
        let task = self.ctx.store.submit(link, group_id, status_handle).await?;
        match existing {
            Some(previous) if previous.is_subscribed(group_id) => {
                debug!("Group {} already waits for task {}", group_id, task.id)
            }
            Some(_) => info!(
                "Group {} joined task {} ({} subscribers)",
                group_id,
                task.id,
                task.subscribers.len()
            ),
            None => info!("Created task {} for {}", task.id, task.link),
        }
        Ok(task)
    }

    pub fn validator(&self) -> &LinkValidator {
        &self.ctx.validator
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.ctx.store
    }

    pub async fn state(&self) -> LifecycleState {
        self.lifecycle.lock().await.state
    }

    /// Spawn the scheduler and the workers. No-op unless stopped.
    pub async fn start(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if !lifecycle.state.can_start() {
            debug!("Pipeline is {}, ignoring start", lifecycle.state);
            return;
        }
        lifecycle.state = LifecycleState::Starting;

        // No worker runs yet, so every in_progress task is an orphan
        match self.ctx.store.recover_in_progress().await {
            Ok(0) => {}
            Ok(count) => info!("Returned {} interrupted tasks to pending", count),
            Err(e) => warn!("Failed to recover interrupted tasks: {}", e),
        }

        let stop = CancellationToken::new();
        let worker_count = self.config.pipeline.worker_count;

        for id in 0..worker_count {
            let worker = Worker::new(id, self.ctx.clone());
            let queue = self.queue_rx.clone();
            lifecycle.handles.push(tokio::spawn(worker.run(queue, stop.clone())));
        }

        let scheduler = Scheduler::new(
            self.ctx.store.clone(),
            self.queue_tx.clone(),
            self.config.pipeline.polling_interval(),
        );
        lifecycle.handles.push(tokio::spawn(scheduler.run(stop.clone())));

        lifecycle.stop = stop;
        lifecycle.state = LifecycleState::Running;
        info!("Pipeline started with {} workers", worker_count);
    }

    /// Stop dispatching and wait for the scheduler and every worker to exit.
    ///
    /// Tasks already being executed finish first. Tasks still waiting in the
    /// work queue are returned to pending. No-op unless running.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if !lifecycle.state.can_stop() {
            debug!("Pipeline is {}, ignoring stop", lifecycle.state);
            return;
        }
        lifecycle.state = LifecycleState::Stopping;
        lifecycle.stop.cancel();

        for handle in lifecycle.handles.drain(..) {
            if let Err(e) = handle.await {
                error!("Pipeline task ended abnormally: {}", e);
            }
        }

        let mut queue = self.queue_rx.lock().await;
        while let Ok(task) = queue.try_recv() {
            match self.ctx.store.requeue(task.id).await {
                Ok(()) => debug!("Returned queued task {} to pending", task.id),
                Err(e) => warn!("Failed to return queued task {} to pending: {}", task.id, e),
            }
        }

        lifecycle.state = LifecycleState::Stopped;
        info!("Pipeline stopped");
    }
}
