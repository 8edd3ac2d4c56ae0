use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::events::{EventBus, OutcomeEvent};
use crate::error::{Result, RelayError};
use crate::media::{
    remove_session_files, FetchRequest, LinkValidator, MediaFetcher, MediaFile, MediaPublisher,
};
use crate::task::{Subscriber, Task, TaskStore};

/// Receiving end of the work queue, shared by all workers
pub type SharedQueue = Arc<Mutex<mpsc::Receiver<Task>>>;

/// Collaborators and settings a worker needs to execute tasks
#[derive(Clone)]
pub struct WorkerContext {
    pub store: Arc<dyn TaskStore>,
    pub fetcher: Arc<dyn MediaFetcher>,
    pub publisher: Arc<dyn MediaPublisher>,
    pub validator: Arc<LinkValidator>,
    pub events: EventBus,
    pub output_dir: PathBuf,
    pub fetch_timeout: Duration,
    pub publish_timeout: Duration,
}

/// Executes one task at a time: fetch, publish, cleanup, delete, notify
pub struct Worker {
    id: usize,
    ctx: WorkerContext,
}

impl Worker {
    pub fn new(id: usize, ctx: WorkerContext) -> Self {
        Self { id, ctx }
    }

    /// Take tasks from `queue` until `stop` is cancelled.
    ///
    /// A task that has been taken always runs to completion; cancellation
    /// is only observed between tasks.
    pub async fn run(self, queue: SharedQueue, stop: CancellationToken) {
        debug!("Worker {} started", self.id);

        loop {
            let task = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                task = async { queue.lock().await.recv().await } => task,
            };

            match task {
                Some(task) => {
                    debug!("Worker {} processing task {}", self.id, task.id);
                    self.process_task(task).await;
                }
                None => break,
            }
        }

        debug!("Worker {} stopped", self.id);
    }

    pub async fn process_task(&self, task: Task) {
        let session = Uuid::new_v4().to_string();
        info!("Processing task {} ({}) for {} groups", task.id, task.link, task.subscribers.len());

        let outcome = self.execute(&task, &session).await;

        // cleanup
        if let Ok(files) = &outcome {
            for file in files {
                debug!("Cleaning up file: {}", file.path.display());
                if let Err(e) = tokio::fs::remove_file(&file.path).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!("Failed to remove {}: {}", file.path.display(), e);
                    }
                }
            }
        }
        match remove_session_files(&self.ctx.output_dir, &session).await {
            Ok(0) => {}
            Ok(count) => debug!("Removed {} leftover files of session {}", count, session),
            Err(e) => warn!("Failed to sweep session {} files: {}", session, e),
        }

        // groups that joined while the task was queued or fetching
        let subscribers = self.current_subscribers(&task).await;

        if let Err(e) = self.ctx.store.delete(task.id).await {
            warn!("Failed to delete task {}: {}", task.id, e);
        }

        match outcome {
            Ok(files) => {
                let file_names: Vec<String> = files.into_iter().map(|f| f.file_name).collect();
                info!("Task {} finished: {}", task.id, file_names.join(", "));
                for subscriber in &subscribers {
                    self.ctx.events.try_publish(OutcomeEvent::ProcessSuccess {
                        group_id: subscriber.group_id,
                        status_handle: subscriber.status_handle,
                        file_names: file_names.clone(),
                    });
                }
            }
            Err(e) => {
                let error_message = e.to_string();
                warn!("Task {} failed: {}", task.id, error_message);
                for subscriber in &subscribers {
                    self.ctx.events.try_publish(OutcomeEvent::ProcessFailure {
                        group_id: subscriber.group_id,
                        status_handle: subscriber.status_handle,
                        error_message: error_message.clone(),
                    });
                }
            }
        }
    }

    /// Validate, fetch and publish. The outcome only depends on the first two.
    async fn execute(&self, task: &Task, session: &str) -> Result<Vec<MediaFile>> {
        let platform = self.ctx.validator.validate(&task.link)?;
        debug!("Task {} is a {} link", task.id, platform);

        let request = FetchRequest::new(&task.link, &self.ctx.output_dir, session);
        let files = match timeout(self.ctx.fetch_timeout, self.ctx.fetcher.fetch(&request)).await {
            Ok(Ok(files)) if !files.is_empty() => files,
            Ok(Ok(_)) => return Err(RelayError::Fetch("no media downloaded".to_string())),
            Ok(Err(e @ RelayError::Fetch(_))) => return Err(e),
            Ok(Err(e)) => return Err(RelayError::Fetch(e.to_string())),
            Err(_) => {
                return Err(RelayError::Fetch(format!(
                    "timed out after {}s",
                    self.ctx.fetch_timeout.as_secs()
                )));
            }
        };

        let subscribers = self.current_subscribers(task).await;
        let mut published = 0;
        for subscriber in &subscribers {
            if self.publish_to(subscriber, &files).await {
                published += 1;
            }
        }
        debug!("Task {} published to {}/{} groups", task.id, published, subscribers.len());

        Ok(files)
    }

    /// Subscribers as currently stored, falling back to the dispatched snapshot
    async fn current_subscribers(&self, task: &Task) -> Vec<Subscriber> {
        match self.ctx.store.get(task.id).await {
            Ok(Some(stored)) => stored.subscribers,
            Ok(None) => task.subscribers.clone(),
            Err(e) => {
                warn!("Failed to reload task {}: {}", task.id, e);
                task.subscribers.clone()
            }
        }
    }

    async fn publish_to(&self, subscriber: &Subscriber, files: &[MediaFile]) -> bool {
        let group_id = subscriber.group_id;
        self.ctx.events.try_publish(OutcomeEvent::UploadStarted {
            group_id,
            status_handle: subscriber.status_handle,
        });

        match timeout(self.ctx.publish_timeout, self.ctx.publisher.publish(files, group_id)).await {
            Ok(Ok(())) => {
                debug!("Uploaded {} files to group {}", files.len(), group_id);
                true
            }
            Ok(Err(e)) => {
                warn!("Failed to upload to group {}: {}", group_id, e);
                false
            }
            Err(_) => {
                warn!(
                    "Upload to group {} timed out after {}s",
                    group_id,
                    self.ctx.publish_timeout.as_secs()
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::media::{MediaKind, MockMediaFetcher, MockMediaPublisher};
    use crate::task::{GroupId, InMemoryTaskStore, StatusHandle};

    struct Harness {
        store: Arc<InMemoryTaskStore>,
        events: mpsc::Receiver<OutcomeEvent>,
        output: tempfile::TempDir,
    }

    async fn harness_task(store: &InMemoryTaskStore, link: &str, groups: &[i64]) -> Task {
        let mut task = None;
        for (i, group) in groups.iter().enumerate() {
            task = Some(
                store
                    .submit(link, GroupId(*group), Some(StatusHandle(i as i64 + 10)))
                    .await
                    .unwrap(),
            );
        }
        let task = task.unwrap();
        store.mark_in_progress(task.id).await.unwrap()
    }

    fn worker(fetcher: MockMediaFetcher, publisher: MockMediaPublisher) -> (Worker, Harness) {
        let store = Arc::new(InMemoryTaskStore::new());
        let (events, rx) = EventBus::new(32);
        let output = tempfile::tempdir().unwrap();
        let ctx = WorkerContext {
            store: store.clone(),
            fetcher: Arc::new(fetcher),
            publisher: Arc::new(publisher),
            validator: Arc::new(LinkValidator::new(&Config::default().links).unwrap()),
            events,
            output_dir: output.path().to_path_buf(),
            fetch_timeout: Duration::from_secs(5),
            publish_timeout: Duration::from_secs(5),
        };
        (Worker::new(0, ctx), Harness { store, events: rx, output })
    }

    fn drain(rx: &mut mpsc::Receiver<OutcomeEvent>) -> Vec<OutcomeEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Fetcher writing one session file into the request directory
    fn writing_fetcher() -> MockMediaFetcher {
        let mut fetcher = MockMediaFetcher::new();
        fetcher.expect_fetch().times(1).returning(|request| {
            let file_name = format!("{}-00001.mp4", request.session);
            let path = request.output_dir.join(&file_name);
            std::fs::write(&path, b"video").unwrap();
            Ok(vec![MediaFile { path, file_name, size: 5, kind: MediaKind::Video }])
        });
        fetcher
    }

    const LINK: &str = "https://www.tiktok.com/@u/video/1";

    #[tokio::test]
    async fn test_invalid_link_never_fetches() {
        let mut fetcher = MockMediaFetcher::new();
        fetcher.expect_fetch().times(0);
        let mut publisher = MockMediaPublisher::new();
        publisher.expect_publish().times(0);

        let (worker, mut h) = worker(fetcher, publisher);
        let task = harness_task(&h.store, "https://example.com/x", &[1, 2]).await;
        worker.process_task(task).await;

        let events = drain(&mut h.events);
        assert_eq!(events.len(), 2);
        for event in &events {
            match event {
                OutcomeEvent::ProcessFailure { error_message, .. } => {
                    assert!(error_message.starts_with("Invalid URL"))
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert!(h.store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_notifies_every_group() {
        let mut fetcher = MockMediaFetcher::new();
        fetcher
            .expect_fetch()
            .times(1)
            .returning(|_| Err(RelayError::Fetch("HTTP Error 404".to_string())));
        let mut publisher = MockMediaPublisher::new();
        publisher.expect_publish().times(0);

        let (worker, mut h) = worker(fetcher, publisher);
        let task = harness_task(&h.store, LINK, &[1, 2]).await;
        worker.process_task(task).await;

        let events = drain(&mut h.events);
        assert_eq!(
            events,
            vec![
                OutcomeEvent::ProcessFailure {
                    group_id: GroupId(1),
                    status_handle: Some(StatusHandle(10)),
                    error_message: "Download failed: HTTP Error 404".to_string(),
                },
                OutcomeEvent::ProcessFailure {
                    group_id: GroupId(2),
                    status_handle: Some(StatusHandle(11)),
                    error_message: "Download failed: HTTP Error 404".to_string(),
                },
            ]
        );
        assert!(h.store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_change_outcome() {
        let calls = Arc::new(std::sync::Mutex::new(Vec::new()));
        let recorded = calls.clone();
        let mut publisher = MockMediaPublisher::new();
        publisher.expect_publish().times(3).returning(move |_, group_id| {
            recorded.lock().unwrap().push(group_id);
            if group_id == GroupId(2) {
                Err(RelayError::Publish { group_id, message: "too large".to_string() })
            } else {
                Ok(())
            }
        });

        let (worker, mut h) = worker(writing_fetcher(), publisher);
        let task = harness_task(&h.store, LINK, &[1, 2, 3]).await;
        worker.process_task(task).await;

        assert_eq!(*calls.lock().unwrap(), vec![GroupId(1), GroupId(2), GroupId(3)]);

        let terminal: Vec<GroupId> = drain(&mut h.events)
            .into_iter()
            .filter(|e| e.is_terminal())
            .map(|e| match e {
                OutcomeEvent::ProcessSuccess { group_id, file_names, .. } => {
                    assert_eq!(file_names.len(), 1);
                    group_id
                }
                other => panic!("unexpected event {:?}", other),
            })
            .collect();
        assert_eq!(terminal, vec![GroupId(1), GroupId(2), GroupId(3)]);

        // fetched files are gone
        assert_eq!(std::fs::read_dir(h.output.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_upload_started_precedes_each_publish() {
        let mut publisher = MockMediaPublisher::new();
        publisher.expect_publish().times(2).returning(|_, _| Ok(()));

        let (worker, mut h) = worker(writing_fetcher(), publisher);
        let task = harness_task(&h.store, LINK, &[5, 6]).await;
        worker.process_task(task).await;

        let kinds: Vec<(bool, GroupId)> = drain(&mut h.events)
            .iter()
            .map(|e| (e.is_terminal(), e.group_id()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (false, GroupId(5)),
                (false, GroupId(6)),
                (true, GroupId(5)),
                (true, GroupId(6)),
            ]
        );
    }

    #[tokio::test]
    async fn test_group_joining_after_dispatch_is_served() {
        let calls = Arc::new(std::sync::Mutex::new(Vec::new()));
        let recorded = calls.clone();
        let mut publisher = MockMediaPublisher::new();
        publisher.expect_publish().times(2).returning(move |_, group_id| {
            recorded.lock().unwrap().push(group_id);
            Ok(())
        });

        let (worker, mut h) = worker(writing_fetcher(), publisher);
        let dispatched = harness_task(&h.store, LINK, &[1]).await;
        // joins while the task sits in the work queue
        let joined = h.store.submit(LINK, GroupId(9), Some(StatusHandle(99))).await.unwrap();
        assert_eq!(joined.subscribers.len(), 2);
        assert_eq!(dispatched.subscribers.len(), 1);

        worker.process_task(dispatched).await;

        assert_eq!(*calls.lock().unwrap(), vec![GroupId(1), GroupId(9)]);
        let terminal: Vec<GroupId> = drain(&mut h.events)
            .into_iter()
            .filter(|e| e.is_terminal())
            .map(|e| e.group_id())
            .collect();
        assert_eq!(terminal, vec![GroupId(1), GroupId(9)]);
        assert!(h.store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_fetch_result_is_a_failure() {
        let mut fetcher = MockMediaFetcher::new();
        fetcher.expect_fetch().times(1).returning(|_| Ok(Vec::new()));
        let mut publisher = MockMediaPublisher::new();
        publisher.expect_publish().times(0);

        let (worker, mut h) = worker(fetcher, publisher);
        let task = harness_task(&h.store, LINK, &[1]).await;
        worker.process_task(task).await;

        match drain(&mut h.events).as_slice() {
            [OutcomeEvent::ProcessFailure { error_message, .. }] => {
                assert_eq!(error_message, "Download failed: no media downloaded")
            }
            other => panic!("unexpected events {:?}", other),
        }
    }
}
