//! Mediarelay - link-to-media relay
//!
//! Entry point wiring the task store, the yt-dlp fetcher and the directory
//! publisher into the pipeline, with a line-based submission front end.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn, Level};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mediarelay::cli::{parse_submit_line, Args, Commands};
use mediarelay::config::Config;
use mediarelay::media::{DirectoryPublisher, LinkValidator, YtDlpFetcher};
use mediarelay::pipeline::{OutcomeEvent, OutcomeEvents, Pipeline};
use mediarelay::task::{GroupId, JsonFileTaskStore, StatusHandle, TaskStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Setup logging to both console and file
    setup_logging(args.verbose)?;

    info!("Starting Mediarelay");

    // Load configuration
    let config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if std::path::Path::new("config.toml").exists() {
                info!("Found config.toml in current directory, loading...");
                Config::from_file("config.toml")?
            } else {
                Config::default()
            }
        }
    };

    match args.command {
        Commands::Run => run(config).await?,
        Commands::Check { url } => {
            let validator = LinkValidator::new(&config.links)?;
            match validator.validate(&url) {
                Ok(platform) => println!("✅ {} link", platform),
                Err(e) => println!("❌ {}", e),
            }
        }
        Commands::Tasks => {
            let store = JsonFileTaskStore::open(&config.store.path)?;
            let tasks = store.list().await?;
            if tasks.is_empty() {
                println!("No tasks in {}", store.path().display());
            } else {
                println!(
                    "{:<8} {:<12} {:<26} {:<8} {:<50}",
                    "Id", "Status", "Created", "Groups", "Link"
                );
                println!("{}", "-".repeat(108));
                for task in tasks {
                    println!(
                        "{:<8} {:<12} {:<26} {:<8} {:<50}",
                        task.id.0,
                        task.status.to_string(),
                        task.created_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
                        task.subscribers.len(),
                        task.link
                    );
                }
            }
        }
        Commands::InitConfig { path } => {
            Config::default().save_to_file(&path)?;
            println!("Wrote default configuration to {}", path.display());
        }
    }

    Ok(())
}

async fn run(config: Config) -> Result<()> {
    let store = Arc::new(JsonFileTaskStore::open(&config.store.path)?);

    let fetcher = YtDlpFetcher::new(config.fetcher.clone());
    if let Err(e) = fetcher.check_availability().await {
        warn!("yt-dlp check failed, downloads will fail: {}", e);
    }
    let publisher = DirectoryPublisher::new(&config.publisher.root);

    let (pipeline, events) =
        Pipeline::new(config.clone(), store, Arc::new(fetcher), Arc::new(publisher))?;
    let pipeline = Arc::new(pipeline);
    pipeline.start().await;

    let consumer = tokio::spawn(render_events(events));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut next_handle: i64 = 0;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, shutting down");
                break;
            }
            line = lines.next_line(), if stdin_open => {
                match line? {
                    Some(line) => {
                        next_handle += 1;
                        submit_line(&pipeline, &config, &line, StatusHandle(next_handle)).await;
                    }
                    None => {
                        info!("Input closed, waiting for Ctrl-C");
                        stdin_open = false;
                    }
                }
            }
        }
    }

    pipeline.stop().await;
    // the consumer ends once the last event sender is gone
    drop(pipeline);
    let _ = consumer.await;

    Ok(())
}

async fn submit_line(pipeline: &Pipeline, config: &Config, line: &str, handle: StatusHandle) {
    let request = match parse_submit_line(line) {
        None => return,
        Some(Err(e)) => {
            println!("❌ {}", e);
            return;
        }
        Some(Ok(request)) => request,
    };

    if !config.is_group_allowed(request.group_id) {
        println!("[{}] ❌ Group is not activated.", request.group_id);
        return;
    }

    if let Err(e) = pipeline.validator().validate(&request.link) {
        println!("[{}] ❌ {}", request.group_id, e);
        return;
    }

    match pipeline
        .submit(&request.link, GroupId(request.group_id), Some(handle))
        .await
    {
        Ok(task) => println!(
            "[{}] 🔄 Processing... (task {}, status #{})",
            request.group_id, task.id, handle.0
        ),
        Err(e) => println!("[{}] ❌ Failed to queue link: {}", request.group_id, e),
    }
}

async fn render_events(mut events: OutcomeEvents) {
    while let Some(event) = events.recv().await {
        match event {
            OutcomeEvent::UploadStarted { group_id, status_handle } => {
                println!("[{}] ⬆️  Uploading... {}", group_id, describe(status_handle));
            }
            OutcomeEvent::ProcessSuccess { group_id, status_handle, file_names } => {
                println!(
                    "[{}] ✅ Processed successfully: {} {}",
                    group_id,
                    file_names.join(", "),
                    describe(status_handle)
                );
            }
            OutcomeEvent::ProcessFailure { group_id, status_handle, error_message } => {
                println!(
                    "[{}] ❌ Processing failed: {} {}",
                    group_id,
                    error_message,
                    describe(status_handle)
                );
            }
        }
    }
}

fn describe(handle: Option<StatusHandle>) -> String {
    handle.map(|h| format!("(status #{})", h.0)).unwrap_or_default()
}

fn setup_logging(verbose: bool) -> Result<()> {
    // Create log directory
    let log_dir = std::env::current_dir()?.join(".mediarelay").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "mediarelay.log");
    let (non_blocking_file, _guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(_guard);

    // Determine log level
    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    // Console output goes to stderr, stdout carries the status lines
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    // Create file layer
    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false); // No ANSI colors in file

    // Setup layered subscriber
    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer);

    // Initialize the subscriber
    subscriber
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}
