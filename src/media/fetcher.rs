use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, info, warn};

use super::{DownloadCommandBuilder, FetchRequest, MediaFetcher, MediaFile, MediaKind};
use crate::config::FetcherConfig;
use crate::error::{Result, RelayError};

/// Suffixes yt-dlp uses for unfinished downloads
const PARTIAL_SUFFIXES: [&str; 3] = [".part", ".ytdl", ".temp"];

/// Media fetcher backed by the yt-dlp binary
pub struct YtDlpFetcher {
    config: FetcherConfig,
    command_builder: DownloadCommandBuilder,
}

impl YtDlpFetcher {
    pub fn new(config: FetcherConfig) -> Self {
        let command_builder = DownloadCommandBuilder::new(config.clone());

        Self {
            config,
            command_builder,
        }
    }

    /// Check that the configured yt-dlp binary runs
    pub async fn check_availability(&self) -> Result<()> {
        self.command_builder.version_check().execute().await?;
        info!("yt-dlp is available at {}", self.config.binary_path);
        Ok(())
    }

    /// Kind of a file, judged by its extension. Unknown extensions count as video.
    pub fn detect_kind(&self, file_name: &str) -> MediaKind {
        let ext = match Path::new(file_name).extension() {
            Some(ext) => ext.to_string_lossy().to_lowercase(),
            None => return MediaKind::Video,
        };
        let matches = |list: &[String]| {
            list.iter()
                .any(|candidate| candidate.trim_start_matches('.').to_lowercase() == ext)
        };

        if matches(&self.config.video_extensions) {
            MediaKind::Video
        } else if matches(&self.config.image_extensions) {
            MediaKind::Image
        } else if matches(&self.config.audio_extensions) {
            MediaKind::Audio
        } else {
            MediaKind::Video
        }
    }

    /// Finished files of this session, sorted by name
    async fn collect_files(&self, dir: &Path, session: &str) -> Result<Vec<MediaFile>> {
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| RelayError::Fetch(format!("failed to read output directory: {}", e)))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| RelayError::Fetch(format!("failed to read output directory: {}", e)))?
        {
            let file_name = entry.file_name().to_string_lossy().to_string();
            if !file_name.starts_with(session)
                || PARTIAL_SUFFIXES.iter().any(|suffix| file_name.ends_with(suffix))
            {
                continue;
            }

            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                _ => continue,
            };

            files.push(MediaFile {
                path: entry.path(),
                kind: self.detect_kind(&file_name),
                file_name,
                size: metadata.len(),
            });
        }

        files.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(files)
    }

    /// Image posts carry no video stream: fetch the images and the audio separately
    async fn fetch_images_and_audio(&self, request: &FetchRequest) -> Option<RelayError> {
        let media_template = request
            .output_dir
            .join(format!("{}-%(autonumber)s.%(ext)s", request.session));
        let audio_template = request
            .output_dir
            .join(format!("{}-audio.%(ext)s", request.session));

        let images = self.command_builder.images(&request.url, &media_template).execute().await;
        let audio = self.command_builder.audio(&request.url, &audio_template).execute().await;

        // Either may fail on its own; only the files on disk decide
        audio.err().or(images.err())
    }
}

#[async_trait]
impl MediaFetcher for YtDlpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<MediaFile>> {
        let dir = &request.output_dir;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| RelayError::Fetch(format!("failed to create output directory: {}", e)))?;

        info!("Fetching {} (session {})", request.url, request.session);

        let template = dir.join(format!("{}-%(autonumber)s.%(ext)s", request.session));
        let mut last_error = self
            .command_builder
            .media(&request.url, &template)
            .execute()
            .await
            .err();

        let mut files = self.collect_files(dir, &request.session).await?;
        if files.is_empty() {
            debug!("No media for session {}, trying images and audio", request.session);
            last_error = self.fetch_images_and_audio(request).await.or(last_error);
            files = self.collect_files(dir, &request.session).await?;
        }

        if files.is_empty() {
            let reason = match last_error {
                Some(RelayError::Fetch(message)) => format!("no media downloaded: {}", message),
                Some(e) => format!("no media downloaded: {}", e),
                None => "no media downloaded".to_string(),
            };
            return Err(RelayError::Fetch(reason));
        }

        let total: u64 = files.iter().map(|f| f.size).sum();
        let limit = self.config.max_file_size_mb.saturating_mul(1024 * 1024);
        if total > limit {
            warn!("Download for session {} is {} bytes, over the limit", request.session, total);
            for file in &files {
                if let Err(e) = tokio::fs::remove_file(&file.path).await {
                    warn!("Failed to remove {}: {}", file.path.display(), e);
                }
            }
            return Err(RelayError::Fetch(format!(
                "total file size {} MB exceeds limit of {} MB",
                total / (1024 * 1024),
                self.config.max_file_size_mb
            )));
        }

        info!("Fetched {} files ({} bytes) for session {}", files.len(), total, request.session);
        Ok(files)
    }
}
