use thiserror::Error;

use crate::task::{GroupId, TaskId};

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid URL: {0}")]
    Validation(String),

    #[error("Download failed: {0}")]
    Fetch(String),

    #[error("Task store error: {0}")]
    Store(String),

    #[error("Task {0} not found")]
    TaskNotFound(TaskId),

    #[error("Upload to group {group_id} failed: {message}")]
    Publish { group_id: GroupId, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;
