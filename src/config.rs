use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, RelayError};
use crate::task::Group;

// Default values for optional pipeline settings
fn default_fetch_timeout_secs() -> u64 {
    300
}

fn default_publish_timeout_secs() -> u64 {
    120
}

/// Largest accepted `max_file_size_mb` (1 TiB)
pub const MAX_FILE_SIZE_LIMIT_MB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub fetcher: FetcherConfig,
    pub links: Vec<LinkPattern>,
    pub store: StoreConfig,
    pub publisher: PublisherConfig,
    /// Groups allowed to submit links. An empty list accepts every group.
    #[serde(default)]
    pub groups: Vec<Group>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of concurrent workers
    pub worker_count: usize,
    /// Seconds between two scheduler ticks
    pub polling_interval_secs: u64,
    /// Capacity of the work queue between scheduler and workers
    pub queue_capacity: usize,
    /// Capacity of the outcome event bus
    pub event_capacity: usize,
    /// Shared download directory for all workers
    pub output_dir: PathBuf,
    /// Deadline for a single fetch, in seconds
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Deadline for publishing to a single group, in seconds
    #[serde(default = "default_publish_timeout_secs")]
    pub publish_timeout_secs: u64,
}

impl PipelineConfig {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// Path to the yt-dlp binary
    pub binary_path: String,
    /// Format selector for the first (video or mixed media) attempt
    pub video_format: String,
    /// Format selector for image posts
    pub photo_format: String,
    /// Format selector for the separate audio download
    pub audio_format: String,
    /// Upper bound for the total size of one download, in megabytes
    pub max_file_size_mb: u64,
    pub video_extensions: Vec<String>,
    pub image_extensions: Vec<String>,
    pub audio_extensions: Vec<String>,
    /// Browser to read cookies from (e.g. "firefox")
    #[serde(default)]
    pub cookies_from_browser: Option<String>,
    #[serde(default)]
    pub force_ipv4: bool,
    /// Seconds to sleep before each download
    #[serde(default)]
    pub sleep_interval: u32,
    /// Upper bound for the randomized sleep
    #[serde(default)]
    pub max_sleep_interval: u32,
    #[serde(default)]
    pub tiktok_api_hostname: Option<String>,
    /// Raw values passed through `--extractor-args`
    #[serde(default)]
    pub extractor_args: Vec<String>,
    /// Raw `Name:Value` values passed through `--add-headers`
    #[serde(default)]
    pub custom_headers: Vec<String>,
}

/// One entry of the supported link table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkPattern {
    pub name: String,
    /// Regular expression matched against the whole link
    pub pattern: String,
    /// Example shown to users when a link is rejected
    pub example: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// JSON file holding live tasks
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Root directory; each group receives files under `<root>/<group_id>/`
    pub root: PathBuf,
}

fn extensions(list: &[&str]) -> Vec<String> {
    list.iter().map(|ext| ext.to_string()).collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig {
                worker_count: 2,
                polling_interval_secs: 5,
                queue_capacity: 2,
                event_capacity: 100,
                output_dir: PathBuf::from("output/media/shared"),
                fetch_timeout_secs: default_fetch_timeout_secs(),
                publish_timeout_secs: default_publish_timeout_secs(),
            },
            fetcher: FetcherConfig {
                binary_path: "yt-dlp".to_string(),
                video_format: "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best"
                    .to_string(),
                photo_format: "best".to_string(),
                audio_format: "bestaudio".to_string(),
                max_file_size_mb: 50,
                video_extensions: extensions(&[".mp4", ".mkv", ".webm", ".mov"]),
                image_extensions: extensions(&[".jpg", ".jpeg", ".png", ".webp"]),
                audio_extensions: extensions(&[".mp3", ".m4a", ".aac", ".opus"]),
                cookies_from_browser: None,
                force_ipv4: false,
                sleep_interval: 0,
                max_sleep_interval: 0,
                tiktok_api_hostname: None,
                extractor_args: Vec::new(),
                custom_headers: Vec::new(),
            },
            links: vec![
                LinkPattern {
                    name: "YouTube Shorts".to_string(),
                    pattern: r"^https?://(www\.)?youtube\.com/shorts/[\w-]+".to_string(),
                    example: "https://youtube.com/shorts/abc123".to_string(),
                },
                LinkPattern {
                    name: "TikTok".to_string(),
                    pattern: r"^https?://(www\.|vm\.|vt\.)?tiktok\.com/".to_string(),
                    example: "https://www.tiktok.com/@user/video/123".to_string(),
                },
                LinkPattern {
                    name: "Instagram".to_string(),
                    pattern: r"^https?://(www\.)?instagram\.com/(reel|p)/[\w-]+".to_string(),
                    example: "https://www.instagram.com/reel/abc123".to_string(),
                },
            ],
            store: StoreConfig {
                path: PathBuf::from("data/tasks.json"),
            },
            publisher: PublisherConfig {
                root: PathBuf::from("output/published"),
            },
            groups: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RelayError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| RelayError::Config(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| RelayError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| RelayError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let pipeline = &self.pipeline;
        if pipeline.worker_count == 0 {
            return Err(RelayError::Config("worker_count must be positive".to_string()));
        }
        if pipeline.polling_interval_secs == 0 {
            return Err(RelayError::Config("polling_interval_secs must be positive".to_string()));
        }
        if pipeline.queue_capacity == 0 {
            return Err(RelayError::Config("queue_capacity must be positive".to_string()));
        }
        if pipeline.event_capacity == 0 {
            return Err(RelayError::Config("event_capacity must be positive".to_string()));
        }
        if pipeline.fetch_timeout_secs == 0 || pipeline.publish_timeout_secs == 0 {
            return Err(RelayError::Config("timeouts must be positive".to_string()));
        }
        let max_size = self.fetcher.max_file_size_mb;
        if max_size == 0 || max_size > MAX_FILE_SIZE_LIMIT_MB {
            return Err(RelayError::Config(format!(
                "max_file_size_mb must be between 1 and {}",
                MAX_FILE_SIZE_LIMIT_MB
            )));
        }
        if self.links.is_empty() {
            return Err(RelayError::Config(
                "at least one supported link pattern is required".to_string(),
            ));
        }
        for link in &self.links {
            regex::Regex::new(&link.pattern).map_err(|e| {
                RelayError::Config(format!("Invalid pattern for {}: {}", link.name, e))
            })?;
        }
        Ok(())
    }

    /// Whether links from `chat_id` may be submitted
    pub fn is_group_allowed(&self, chat_id: i64) -> bool {
        self.groups.is_empty() || self.groups.iter().any(|group| group.chat_id.0 == chat_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pipeline.queue_capacity, config.pipeline.worker_count);
    }

    #[test]
    fn test_save_and_load_roundtrip_keeps_links() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = Config::default();
        config.save_to_file(&path).unwrap();
        let loaded = Config::from_file(&path).unwrap();

        assert_eq!(loaded.links, config.links);
        assert_eq!(loaded.pipeline.polling_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_zero_worker_count_is_rejected() {
        let mut config = Config::default();
        config.pipeline.worker_count = 0;
        assert!(matches!(config.validate(), Err(RelayError::Config(_))));
    }

    #[test]
    fn test_file_size_limit_is_bounded() {
        let mut config = Config::default();
        config.fetcher.max_file_size_mb = u64::MAX / 1024;
        assert!(matches!(config.validate(), Err(RelayError::Config(_))));

        config.fetcher.max_file_size_mb = 0;
        assert!(config.validate().is_err());

        config.fetcher.max_file_size_mb = MAX_FILE_SIZE_LIMIT_MB;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_broken_link_pattern_is_rejected() {
        let mut config = Config::default();
        config.links.push(LinkPattern {
            name: "Broken".to_string(),
            pattern: "(unclosed".to_string(),
            example: "-".to_string(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_timeouts_fall_back_to_defaults() {
        let mut config = Config::default();
        config.pipeline.fetch_timeout_secs = 1;
        let text = toml::to_string_pretty(&config)
            .unwrap()
            .replace("fetch_timeout_secs = 1\n", "");
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.pipeline.fetch_timeout_secs, 300);
    }

    #[test]
    fn test_group_allow_list() {
        let mut config = Config::default();
        assert!(config.is_group_allowed(42));

        config.groups.push(Group {
            chat_id: crate::task::GroupId(-100),
            admin: "owner".to_string(),
        });
        assert!(config.is_group_allowed(-100));
        assert!(!config.is_group_allowed(42));
    }
}
