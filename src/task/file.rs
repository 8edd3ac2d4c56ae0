use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{GroupId, StatusHandle, Task, TaskId, TaskSnapshot, TaskStore, TaskTable};
use crate::error::{Result, RelayError};

/// Task store persisted as a JSON file.
///
/// Every mutation is applied to a copy of the table, written to a temporary
/// file next to the target and renamed over it; the in-memory table only
/// changes once the write succeeded.
#[derive(Debug)]
pub struct JsonFileTaskStore {
    path: PathBuf,
    table: Mutex<TaskTable>,
}

impl JsonFileTaskStore {
    /// Open the store at `path`, creating an empty one if the file is missing
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let table = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| RelayError::Store(format!("Failed to read task file: {}", e)))?;
            let snapshot: TaskSnapshot = serde_json::from_str(&content)?;
            info!("Loaded {} tasks from {}", snapshot.tasks.len(), path.display());
            TaskTable::from_snapshot(snapshot)
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            TaskTable::default()
        };

        Ok(Self {
            path,
            table: Mutex::new(table),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, table: &TaskTable) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let content = serde_json::to_vec_pretty(&table.snapshot())?;
        let mut temp = tempfile::NamedTempFile::new_in(&dir)
            .map_err(|e| RelayError::Store(format!("Failed to create temp file: {}", e)))?;
        temp.write_all(&content)
            .map_err(|e| RelayError::Store(format!("Failed to write task file: {}", e)))?;
        temp.persist(&self.path)
            .map_err(|e| RelayError::Store(format!("Failed to replace task file: {}", e)))?;

        debug!("Persisted task table to {}", self.path.display());
        Ok(())
    }

    async fn mutate<T, F>(&self, change: F) -> Result<T>
    where
        F: FnOnce(&mut TaskTable) -> Result<T>,
    {
        let mut table = self.table.lock().await;
        let mut next = table.clone();
        let value = change(&mut next)?;
        self.persist(&next)?;
        *table = next;
        Ok(value)
    }
}

#[async_trait]
impl TaskStore for JsonFileTaskStore {
    async fn submit(
        &self,
        link: &str,
        group_id: GroupId,
        status_handle: Option<StatusHandle>,
    ) -> Result<Task> {
        self.mutate(|table| Ok(table.submit(link, group_id, status_handle)))
            .await
    }

    async fn next_pending(&self) -> Result<Option<Task>> {
        Ok(self.table.lock().await.next_pending())
    }

    async fn mark_in_progress(&self, id: TaskId) -> Result<Task> {
        self.mutate(|table| table.mark_in_progress(id)).await
    }

    async fn requeue(&self, id: TaskId) -> Result<()> {
        self.mutate(|table| table.requeue(id)).await
    }

    async fn recover_in_progress(&self) -> Result<usize> {
        self.mutate(|table| Ok(table.recover_in_progress())).await
    }

    async fn delete(&self, id: TaskId) -> Result<()> {
        self.mutate(|table| table.delete(id)).await
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
