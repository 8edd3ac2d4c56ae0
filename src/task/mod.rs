// Task storage
//
// A task is one de-duplicated download job keyed by its link. The store is the
// single source of truth for the pipeline:
// - TaskTable: the shared, synchronous state machine both adapters wrap
// - InMemoryTaskStore: process-local adapter
// - JsonFileTaskStore: durable adapter writing a JSON snapshot after every change

pub mod file;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub use file::JsonFileTaskStore;
pub use memory::InMemoryTaskStore;

use crate::error::{Result, RelayError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// External chat id of a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupId(pub i64);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle of the status message shown in a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatusHandle(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InProgress => write!(f, "in_progress"),
        }
    }
}

/// A group waiting for the outcome of a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub group_id: GroupId,
    pub status_handle: Option<StatusHandle>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub link: String,
    /// Groups in subscription order
    pub subscribers: Vec<Subscriber>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn is_subscribed(&self, group_id: GroupId) -> bool {
        self.subscribers.iter().any(|s| s.group_id == group_id)
    }
}

/// A chat authorized to receive media
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub chat_id: GroupId,
    /// Admin who activated the group
    pub admin: String,
}

/// Durable mapping from link to task
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Create a pending task for `link`, or subscribe `group_id` to the live one
    async fn submit(
        &self,
        link: &str,
        group_id: GroupId,
        status_handle: Option<StatusHandle>,
    ) -> Result<Task>;

    /// Oldest pending task in creation order
    async fn next_pending(&self) -> Result<Option<Task>>;

    /// Move a pending task to in_progress and return its subscriber snapshot
    async fn mark_in_progress(&self, id: TaskId) -> Result<Task>;

    /// Return an in_progress task that never reached a worker to pending
    async fn requeue(&self, id: TaskId) -> Result<()>;

    /// Return every in_progress task to pending, yielding how many moved
    async fn recover_in_progress(&self) -> Result<usize>;

    async fn delete(&self, id: TaskId) -> Result<()>;

    async fn find_by_link(&self, link: &str) -> Result<Option<Task>>;

    async fn get(&self, id: TaskId) -> Result<Option<Task>>;

    async fn list(&self) -> Result<Vec<Task>>;
}

/// Serialized form of a [`TaskTable`]
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub next_id: u64,
    pub tasks: Vec<Task>,
}

/// Task state shared by the store adapters.
///
/// Ids grow monotonically, so iterating the map yields creation order.
#[derive(Debug, Default, Clone)]
pub struct TaskTable {
    next_id: u64,
    tasks: BTreeMap<TaskId, Task>,
}

impl TaskTable {
    pub fn from_snapshot(snapshot: TaskSnapshot) -> Self {
        let next_id = snapshot
            .tasks
            .iter()
            .map(|t| t.id.0)
            .max()
            .unwrap_or(0)
            .max(snapshot.next_id);
        let tasks = snapshot.tasks.into_iter().map(|t| (t.id, t)).collect();
        Self { next_id, tasks }
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            next_id: self.next_id,
            tasks: self.list(),
        }
    }

    pub fn submit(
        &mut self,
        link: &str,
        group_id: GroupId,
        status_handle: Option<StatusHandle>,
    ) -> Task {
        if let Some(task) = self.tasks.values_mut().find(|t| t.link == link) {
            if !task.is_subscribed(group_id) {
                task.subscribers.push(Subscriber { group_id, status_handle });
            }
            return task.clone();
        }

        self.next_id += 1;
        let task = Task {
            id: TaskId(self.next_id),
            link: link.to_string(),
            subscribers: vec![Subscriber { group_id, status_handle }],
            status: TaskStatus::Pending,
            created_at: Utc::now(),
        };
        self.tasks.insert(task.id, task.clone());
        task
    }

    pub fn next_pending(&self) -> Option<Task> {
        self.tasks
            .values()
            .find(|t| t.status == TaskStatus::Pending)
            .cloned()
    }

    pub fn mark_in_progress(&mut self, id: TaskId) -> Result<Task> {
        let task = self.tasks.get_mut(&id).ok_or(RelayError::TaskNotFound(id))?;
        if task.status != TaskStatus::Pending {
            return Err(RelayError::Store(format!("task {} is already {}", id, task.status)));
        }
        task.status = TaskStatus::InProgress;
        Ok(task.clone())
    }

    pub fn requeue(&mut self, id: TaskId) -> Result<()> {
        let task = self.tasks.get_mut(&id).ok_or(RelayError::TaskNotFound(id))?;
        task.status = TaskStatus::Pending;
        Ok(())
    }

    pub fn recover_in_progress(&mut self) -> usize {
        let mut recovered = 0;
        for task in self.tasks.values_mut() {
            if task.status == TaskStatus::InProgress {
                task.status = TaskStatus::Pending;
                recovered += 1;
            }
        }
        recovered
    }

    pub fn delete(&mut self, id: TaskId) -> Result<()> {
        self.tasks
            .remove(&id)
            .map(|_| ())
            .ok_or(RelayError::TaskNotFound(id))
    }

    pub fn find_by_link(&self, link: &str) -> Option<Task> {
        self.tasks.values().find(|t| t.link == link).cloned()
    }

    pub fn get(&self, id: TaskId) -> Option<Task> {
        self.tasks.get(&id).cloned()
    }

    pub fn list(&self) -> Vec<Task> {
        self.tasks.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const G1: GroupId = GroupId(-1001);
    const G2: GroupId = GroupId(-1002);

    #[test]
    fn test_same_link_different_groups_share_one_task() {
        let mut table = TaskTable::default();
        let first = table.submit("https://a", G1, Some(StatusHandle(1)));
        let second = table.submit("https://a", G2, None);

        assert_eq!(first.id, second.id);
        assert_eq!(table.list().len(), 1);
        assert_eq!(
            second.subscribers,
            vec![
                Subscriber { group_id: G1, status_handle: Some(StatusHandle(1)) },
                Subscriber { group_id: G2, status_handle: None },
            ]
        );
    }

    #[test]
    fn test_resubmitting_same_group_is_noop() {
        let mut table = TaskTable::default();
        table.submit("https://a", G1, Some(StatusHandle(1)));
        let again = table.submit("https://a", G1, Some(StatusHandle(2)));

        assert_eq!(again.subscribers.len(), 1);
        assert_eq!(again.subscribers[0].status_handle, Some(StatusHandle(1)));
    }

    #[test]
    fn test_next_pending_is_oldest_and_skips_in_progress() {
        let mut table = TaskTable::default();
        let a = table.submit("https://a", G1, None);
        let b = table.submit("https://b", G1, None);

        assert_eq!(table.next_pending().map(|t| t.id), Some(a.id));
        table.mark_in_progress(a.id).unwrap();
        assert_eq!(table.next_pending().map(|t| t.id), Some(b.id));
        table.mark_in_progress(b.id).unwrap();
        assert!(table.next_pending().is_none());
    }

    #[test]
    fn test_mark_in_progress_happens_once() {
        let mut table = TaskTable::default();
        let a = table.submit("https://a", G1, None);

        let marked = table.mark_in_progress(a.id).unwrap();
        assert_eq!(marked.status, TaskStatus::InProgress);
        assert!(matches!(table.mark_in_progress(a.id), Err(RelayError::Store(_))));
        assert!(matches!(
            table.mark_in_progress(TaskId(99)),
            Err(RelayError::TaskNotFound(TaskId(99)))
        ));
    }

    #[test]
    fn test_requeue_and_recover() {
        let mut table = TaskTable::default();
        let a = table.submit("https://a", G1, None);
        let b = table.submit("https://b", G1, None);
        table.mark_in_progress(a.id).unwrap();
        table.mark_in_progress(b.id).unwrap();

        table.requeue(a.id).unwrap();
        assert_eq!(table.next_pending().map(|t| t.id), Some(a.id));

        assert_eq!(table.recover_in_progress(), 1);
        assert_eq!(table.get(b.id).unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn test_delete_frees_the_link() {
        let mut table = TaskTable::default();
        let a = table.submit("https://a", G1, None);
        table.delete(a.id).unwrap();

        assert!(table.find_by_link("https://a").is_none());
        assert!(table.delete(a.id).is_err());

        let again = table.submit("https://a", G2, None);
        assert_ne!(again.id, a.id);
    }
}
