use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::config::FetcherConfig;
use crate::error::{Result, RelayError};

/// Abstract yt-dlp invocation
#[derive(Debug, Clone)]
pub struct DownloadCommand {
    pub binary_path: String,
    pub args: Vec<String>,
    pub description: String,
}

impl DownloadCommand {
    /// Create a new download command
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, description: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            args: Vec::new(),
            description: description.into(),
        }
    }

    /// Add an argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Output template, e.g. `<dir>/<session>-%(autonumber)s.%(ext)s`
    pub fn output<P: AsRef<Path>>(self, template: P) -> Self {
        self.arg("--output")
            .arg(template.as_ref().to_string_lossy().to_string())
    }

    pub fn format<S: Into<String>>(self, selector: S) -> Self {
        self.arg("--format").arg(selector)
    }

    pub fn no_check_certificates(self) -> Self {
        self.arg("--no-check-certificates")
    }

    pub fn write_all_thumbnails(self) -> Self {
        self.arg("--write-all-thumbnails")
    }

    pub fn extract_audio(self) -> Self {
        self.arg("--extract-audio")
    }

    pub fn cookies_from_browser<S: Into<String>>(self, browser: S) -> Self {
        self.arg("--cookies-from-browser").arg(browser)
    }

    pub fn force_ipv4(self) -> Self {
        self.arg("--force-ipv4")
    }

    pub fn sleep_interval(self, seconds: u32) -> Self {
        self.arg("--sleep-interval").arg(seconds.to_string())
    }

    pub fn max_sleep_interval(self, seconds: u32) -> Self {
        self.arg("--max-sleep-interval").arg(seconds.to_string())
    }

    pub fn extractor_args<S: Into<String>>(self, value: S) -> Self {
        self.arg("--extractor-args").arg(value)
    }

    pub fn add_header<S: Into<String>>(self, header: S) -> Self {
        self.arg("--add-headers").arg(header)
    }

    /// Append the source link; must be the last argument
    pub fn url<S: Into<String>>(self, url: S) -> Self {
        self.arg("--").arg(url)
    }

    /// Execute the command.
    ///
    /// The child is killed if the returned future is dropped, so a caller
    /// wrapping this in a timeout really stops the download.
    pub async fn execute(&self) -> Result<()> {
        debug!("Executing download command: {} {:?}", self.binary_path, self.args);
        debug!("Description: {}", self.description);

        let output = Command::new(&self.binary_path)
            .args(&self.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                RelayError::Fetch(format!("Failed to execute {}: {}", self.binary_path, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RelayError::Fetch(format!(
                "{} failed: {}",
                self.description,
                stderr.trim()
            )));
        }

        Ok(())
    }
}

/// Builder for the yt-dlp invocations a download needs
#[derive(Debug, Clone)]
pub struct DownloadCommandBuilder {
    config: FetcherConfig,
}

impl DownloadCommandBuilder {
    pub fn new(config: FetcherConfig) -> Self {
        Self { config }
    }

    fn base<S: Into<String>>(&self, description: S, template: &Path) -> DownloadCommand {
        DownloadCommand::new(&self.config.binary_path, description)
            .output(template)
            .no_check_certificates()
    }

    /// First attempt: video or mixed media with the video format selector
    pub fn media(&self, url: &str, template: &Path) -> DownloadCommand {
        let cmd = self
            .base("Media download", template)
            .format(&self.config.video_format);
        self.apply_options(cmd).url(url)
    }

    /// Fallback for image posts such as carousels
    pub fn images(&self, url: &str, template: &Path) -> DownloadCommand {
        let cmd = self
            .base("Image download", template)
            .write_all_thumbnails()
            .format(&self.config.photo_format);
        self.apply_options(cmd).url(url)
    }

    /// Separate audio track accompanying image posts
    pub fn audio(&self, url: &str, template: &Path) -> DownloadCommand {
        let cmd = self
            .base("Audio download", template)
            .format(&self.config.audio_format)
            .extract_audio();
        self.apply_options(cmd).url(url)
    }

    pub fn version_check(&self) -> DownloadCommand {
        DownloadCommand::new(&self.config.binary_path, "Version check").arg("--version")
    }

    /// Apply the user-configured yt-dlp options
    fn apply_options(&self, mut cmd: DownloadCommand) -> DownloadCommand {
        let config = &self.config;

        if let Some(browser) = config.cookies_from_browser.as_deref().filter(|b| !b.is_empty()) {
            cmd = cmd.cookies_from_browser(browser);
        }
        if config.force_ipv4 {
            cmd = cmd.force_ipv4();
        }
        if config.sleep_interval > 0 {
            cmd = cmd.sleep_interval(config.sleep_interval);
        }
        if config.max_sleep_interval > 0 {
            cmd = cmd.max_sleep_interval(config.max_sleep_interval);
        }
        if let Some(host) = config.tiktok_api_hostname.as_deref().filter(|h| !h.is_empty()) {
            cmd = cmd.extractor_args(format!("tiktok:api_hostname={}", host));
        }
        for value in config.extractor_args.iter().filter(|v| !v.is_empty()) {
            cmd = cmd.extractor_args(value);
        }
        for header in config.custom_headers.iter().filter(|h| !h.is_empty()) {
            cmd = cmd.add_header(header);
        }

        cmd
    }
}
