use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{GroupId, StatusHandle, Task, TaskId, TaskStore, TaskTable};
use crate::error::Result;

/// Task store kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    table: Mutex<TaskTable>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn submit(
        &self,
        link: &str,
        group_id: GroupId,
        status_handle: Option<StatusHandle>,
    ) -> Result<Task> {
        Ok(self.table.lock().await.submit(link, group_id, status_handle))
    }

    async fn next_pending(&self) -> Result<Option<Task>> {
        Ok(self.table.lock().await.next_pending())
    }

    async fn mark_in_progress(&self, id: TaskId) -> Result<Task> {
        self.table.lock().await.mark_in_progress(id)
    }

    async fn requeue(&self, id: TaskId) -> Result<()> {
        self.table.lock().await.requeue(id)
    }

    async fn recover_in_progress(&self) -> Result<usize> {
        Ok(self.table.lock().await.recover_in_progress())
    }

    async fn delete(&self, id: TaskId) -> Result<()> {
        self.table.lock().await.delete(id)
    }

    async fn find_by_link(&self, link: &str) -> Result<Option<Task>> {
        Ok(self.table.lock().await.find_by_link(link))
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>> {
        Ok(self.table.lock().await.get(id))
    }

    async fn list(&self) -> Result<Vec<Task>> {
        Ok(self.table.lock().await.list())
    }
}
