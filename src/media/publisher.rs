use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{MediaFile, MediaKind, MediaPublisher};
use crate::error::{Result, RelayError};
use crate::task::GroupId;

/// Publisher that delivers files into one directory per group.
///
/// Videos go first, then images, then audio, mirroring the order a chat
/// upload would use. The first failing copy aborts the group.
pub struct DirectoryPublisher {
    root: PathBuf,
}

impl DirectoryPublisher {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn group_dir(&self, group_id: GroupId) -> PathBuf {
        self.root.join(group_id.to_string())
    }
}

#[async_trait]
impl MediaPublisher for DirectoryPublisher {
    async fn publish(&self, files: &[MediaFile], group_id: GroupId) -> Result<()> {
        if files.is_empty() {
            return Ok(());
        }

        let fail = |message: String| RelayError::Publish { group_id, message };
        let target = self.group_dir(group_id);
        tokio::fs::create_dir_all(&target)
            .await
            .map_err(|e| fail(format!("failed to create {}: {}", target.display(), e)))?;

        for kind in [MediaKind::Video, MediaKind::Image, MediaKind::Audio] {
            for file in files.iter().filter(|f| f.kind == kind) {
                let destination = target.join(&file.file_name);
                debug!("Publishing {} {} to group {}", kind, file.file_name, group_id);
                tokio::fs::copy(&file.path, &destination)
                    .await
                    .map_err(|e| fail(format!("failed to copy {}: {}", file.file_name, e)))?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    fn media(dir: &assert_fs::TempDir, name: &str, kind: MediaKind) -> MediaFile {
        let child = dir.child(name);
        child.write_str("payload").unwrap();
        MediaFile {
            path: child.path().to_path_buf(),
            file_name: name.to_string(),
            size: 7,
            kind,
        }
    }

    #[tokio::test]
    async fn test_files_land_in_group_directory() {
        let source = assert_fs::TempDir::new().unwrap();
        let root = assert_fs::TempDir::new().unwrap();
        let files = vec![
            media(&source, "s-00001.jpg", MediaKind::Image),
            media(&source, "s-audio.m4a", MediaKind::Audio),
        ];

        let publisher = DirectoryPublisher::new(root.path());
        publisher.publish(&files, GroupId(-42)).await.unwrap();

        assert!(root.path().join("-42").join("s-00001.jpg").exists());
        assert!(root.path().join("-42").join("s-audio.m4a").exists());
    }

    #[tokio::test]
    async fn test_missing_source_is_a_publish_error() {
        let root = assert_fs::TempDir::new().unwrap();
        let files = vec![MediaFile {
            path: root.path().join("gone.mp4"),
            file_name: "gone.mp4".to_string(),
            size: 0,
            kind: MediaKind::Video,
        }];

        let err = DirectoryPublisher::new(root.path())
            .publish(&files, GroupId(7))
            .await
            .unwrap_err();

        assert!(matches!(err, RelayError::Publish { group_id: GroupId(7), .. }));
    }
}
