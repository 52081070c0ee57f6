mod api;
mod health;
mod history;
mod workflow;

use crate::api::{ApiClient, DEFAULT_API_URL, DEFAULT_MAX_ATTEMPTS, ProgressFn};
use crate::health::{HealthMonitor, HealthStatus};
use crate::history::{FileBackend, HistoryStore, TranscriptionRecord};
use crate::workflow::Workflow;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "lumina")]
#[command(about = "CLI client for the Lumina transcription service")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a media file and print its transcription
    Transcribe {
        /// Audio or video file (MP3, WAV, MP4, MPEG, MOV)
        file: PathBuf,

        /// Transcription service base URL
        #[arg(long, default_value = DEFAULT_API_URL)]
        api_url: String,

        /// Upload attempts before giving up
        #[arg(long, default_value = "3")]
        attempts: u32,

        /// Also write the transcript to <name>-transcription.txt
        #[arg(long)]
        export: bool,

        /// Directory for exported files
        #[arg(long, default_value = ".")]
        output: PathBuf,

        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Check transcription service health
    Status {
        /// Transcription service base URL
        #[arg(long, default_value = DEFAULT_API_URL)]
        api_url: String,

        /// Keep polling and print status changes
        #[arg(long)]
        watch: bool,

        /// Poll interval in seconds
        #[arg(long, default_value = "30")]
        interval: u64,
    },

    /// Manage locally stored transcriptions
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum HistoryAction {
    /// Show stored transcriptions
    List,
    /// Search transcriptions by file name or text
    Search { query: String },
    /// Delete one transcription by id
    Delete { id: i64 },
    /// Remove transcriptions older than 30 days
    Cleanup,
    /// Export the full history as JSON
    Export {
        /// Directory for the export file
        #[arg(long, default_value = ".")]
        output: PathBuf,
    },
    /// Delete all stored transcriptions
    Clear,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Transcribe {
            file,
            api_url,
            attempts,
            export,
            output,
            format,
        } => cmd_transcribe(file, api_url, attempts, export, output, format).await,
        Commands::Status {
            api_url,
            watch,
            interval,
        } => cmd_status(api_url, watch, interval).await,
        Commands::History { action } => cmd_history(action),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn cmd_transcribe(
    file: PathBuf,
    api_url: String,
    attempts: u32,
    export: bool,
    output: PathBuf,
    format: OutputFormat,
) -> Result<()> {
    let metadata =
        std::fs::metadata(&file).with_context(|| format!("Cannot read {}", file.display()))?;

    let mut workflow = Workflow::new();
    workflow.select_file(&file, metadata.len())?;

    let client = ApiClient::new(&api_url);
    let store = HistoryStore::new(FileBackend::new()?);

    let attempts = if attempts == 0 {
        DEFAULT_MAX_ATTEMPTS
    } else {
        attempts
    };

    if let Some(selected) = workflow.file() {
        println!(
            "Uploading {} ({:.1} MB, {})...",
            selected.path.display(),
            selected.size as f64 / 1_048_576.0,
            selected.media_type
        );
    }

    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}% uploaded")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .progress_chars("#>-"),
    );

    let bar = pb.clone();
    let on_progress: ProgressFn = Arc::new(move |pct| bar.set_position(pct as u64));

    match workflow
        .submit(&client, &store, Some(on_progress), attempts)
        .await
    {
        Ok(record) => {
            pb.finish_and_clear();

            match format {
                OutputFormat::Text => println!("{}", record.text),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&record)?),
            }

            if export {
                let path = workflow.export_transcript(&output)?;
                println!("Transcript written to {}", path.display());
            }

            eprintln!("Saved to history (id {})", record.id);
            Ok(())
        }
        Err(e) => {
            pb.finish_and_clear();
            Err(e.into())
        }
    }
}

async fn cmd_status(api_url: String, watch: bool, interval: u64) -> Result<()> {
    let monitor = HealthMonitor::new(&api_url);

    if !watch {
        let status = monitor.check().await;
        print_status(&api_url, &status);
        if !status.healthy {
            std::process::exit(1);
        }
        return Ok(());
    }

    println!("Watching {} every {}s (Ctrl-C to stop)", api_url, interval);
    let poller = monitor.spawn_poller(Duration::from_secs(interval));

    let mut last: Option<HealthStatus> = None;
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let current = monitor.status();
                if current != last
                    && let Some(status) = &current
                {
                    print_status(&api_url, status);
                }
                last = current;
            }
        }
    }
    poller.stop();

    Ok(())
}

fn cmd_history(action: HistoryAction) -> Result<()> {
    let store = HistoryStore::new(FileBackend::new()?);

    match action {
        HistoryAction::List => print_records(&store.list()),
        HistoryAction::Search { query } => print_records(&store.search(&query)),
        HistoryAction::Delete { id } => {
            if store.delete(id) {
                println!("Removed record {}", id);
            } else {
                println!("No record with id {}", id);
            }
        }
        HistoryAction::Cleanup => {
            let removed = store.cleanup();
            println!("Removed {} record(s) older than 30 days", removed);
        }
        HistoryAction::Export { output } => {
            let path = store.export_all(&output)?;
            println!("History exported to {}", path.display());
        }
        HistoryAction::Clear => {
            store.clear();
            println!("History cleared");
        }
    }

    Ok(())
}

fn print_status(api_url: &str, status: &HealthStatus) {
    if status.healthy {
        match &status.message {
            Some(message) => println!("{}: healthy ({})", api_url, message),
            None => println!("{}: healthy", api_url),
        }
    } else {
        let cause = status.error.as_deref().unwrap_or("unknown");
        println!("{}: unhealthy ({})", api_url, cause);
    }
}

fn print_records(records: &[TranscriptionRecord]) {
    if records.is_empty() {
        println!("No transcriptions found");
        return;
    }

    println!(
        "{:<15} {:<12} {:<25} {:<10} {:<10} Preview",
        "ID", "Date", "File", "Duration", "Size"
    );
    println!("{}", "-".repeat(110));

    for record in records {
        // Truncate on characters, not bytes; file names can be non-ASCII.
        let name: String = record.file_name.chars().take(25).collect();
        println!(
            "{:<15} {:<12} {:<25} {:<10} {:<10} {}",
            record.id,
            record.date,
            name,
            record.duration,
            record.file_size,
            record.preview().replace('\n', " ")
        );
    }
}
