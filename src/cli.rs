use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the pipeline, reading "<group_id> <link>" lines from stdin
    Run,

    /// Check a link against the supported link table
    Check {
        /// Link to check
        url: String,
    },

    /// List the tasks currently held by the task store
    Tasks,

    /// Write the default configuration
    InitConfig {
        /// Destination file
        #[arg(default_value = "config.toml")]
        path: PathBuf,
    },
}

/// One submission read from the input stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitLine {
    pub group_id: i64,
    pub link: String,
}

/// Parse `<group_id> <link>`. Blank lines and `#` comments yield `None`.
pub fn parse_submit_line(line: &str) -> Option<std::result::Result<SubmitLine, String>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let mut parts = line.split_whitespace();
    let group = parts.next()?;
    let parsed = match (group.parse::<i64>(), parts.next(), parts.next()) {
        (Ok(group_id), Some(link), None) => Ok(SubmitLine {
            group_id,
            link: link.to_string(),
        }),
        (Err(_), _, _) => Err(format!("invalid group id: {}", group)),
        _ => Err("expected \"<group_id> <link>\"".to_string()),
    };
    Some(parsed)
}
