// Media collaborators of the pipeline
//
// - Validate: link syntax and the supported link table
// - Commands: yt-dlp command builders
// - Fetcher: downloads a link into the shared output directory
// - Publisher: hands fetched files to a destination group

pub mod commands;
pub mod fetcher;
pub mod publisher;
pub mod validate;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

pub use commands::*;
pub use fetcher::*;
pub use publisher::*;
pub use validate::*;

use crate::error::Result;
use crate::task::GroupId;

/// Coarse kind of a fetched file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Image,
    Audio,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Video => write!(f, "video"),
            MediaKind::Image => write!(f, "image"),
            MediaKind::Audio => write!(f, "audio"),
        }
    }
}

/// A single file produced by a fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub path: PathBuf,
    pub file_name: String,
    pub size: u64,
    pub kind: MediaKind,
}

/// Input of one fetch.
///
/// Every file the fetch writes must start with `session` so concurrent
/// fetches into the same directory never collide.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub output_dir: PathBuf,
    pub session: String,
}

impl FetchRequest {
    pub fn new<P: AsRef<Path>>(url: &str, output_dir: P, session: &str) -> Self {
        Self {
            url: url.to_string(),
            output_dir: output_dir.as_ref().to_path_buf(),
            session: session.to_string(),
        }
    }
}

/// Downloads the media behind a link
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Produce at least one file, or fail with a fetch error
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<MediaFile>>;
}

/// Uploads fetched files to a group
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaPublisher: Send + Sync {
    async fn publish(&self, files: &[MediaFile], group_id: GroupId) -> Result<()>;
}

/// Remove every file in `dir` whose name starts with `session`.
///
/// Returns how many files were removed; missing directories count as empty.
pub async fn remove_session_files(dir: &Path, session: &str) -> Result<usize> {
    let mut removed = 0;
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        if entry.file_name().to_string_lossy().starts_with(session)
            && tokio::fs::remove_file(entry.path()).await.is_ok()
        {
            removed += 1;
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_remove_session_files_keeps_other_sessions() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["aaa-00001.mp4", "aaa-audio.m4a", "bbb-00001.mp4"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }

        let removed = remove_session_files(dir.path(), "aaa").await.unwrap();

        assert_eq!(removed, 2);
        assert!(dir.path().join("bbb-00001.mp4").exists());
    }

    #[tokio::test]
    async fn test_remove_session_files_in_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert_eq!(remove_session_files(&missing, "aaa").await.unwrap(), 0);
    }
}
