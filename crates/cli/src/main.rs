//! vidshrink command-line interface.
//!
//! `compress` runs one encode end to end with live progress on stdout;
//! `serve` runs the retention sweeper and the read-only status server
//! until Ctrl-C.

use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use vidshrink::config::Config;
use vidshrink::orchestrator::{JobOrchestrator, OrchestratorSettings};
use vidshrink::server::run_status_server;
use vidshrink::sweeper::{RetentionPolicy, RetentionSweeper};
use vidshrink::JobStatus;

#[derive(Parser)]
#[command(name = "vidshrink", version, about = "Compress videos for web playback")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress one video and write the result next to the source.
    Compress {
        /// Source video file.
        input: PathBuf,

        /// Output filename (defaults to `<stem>_compressed.mp4`).
        #[arg(short, long)]
        output: Option<String>,

        /// Target maximum video bitrate in kbps.
        #[arg(short, long)]
        bitrate: Option<u32>,
    },

    /// Run the retention sweeper and status server until Ctrl-C.
    Serve,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match cli.config.as_deref() {
        Some(path) => Config::load(path)?,
        None => {
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };

    match cli.command {
        Commands::Compress {
            input,
            output,
            bitrate,
        } => compress(&config, &input, output, bitrate).await,
        Commands::Serve => serve(&config).await,
    }
}

/// One-shot compression with progress printed to stdout.
async fn compress(
    config: &Config,
    input: &Path,
    output: Option<String>,
    bitrate: Option<u32>,
) -> Result<(), Box<dyn Error>> {
    init_dirs(config)?;

    let input_name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or("input path has no filename")?;
    let output_name = output.unwrap_or_else(|| {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video".to_string());
        format!("{}_compressed.mp4", stem)
    });

    // Work on a copy inside the upload directory; job cleanup and the
    // retention sweep only ever touch managed storage, never the source.
    // The unique prefix keeps concurrent runs on same-named files apart.
    let staged = staged_upload_path(&config.storage.upload_dir, &input_name);
    tokio::fs::copy(input, &staged).await?;

    let orchestrator = JobOrchestrator::new(OrchestratorSettings::from_config(config));
    let job_id = orchestrator.submit(&staged, &output_name, bitrate).await?;

    let mut last_line = String::new();
    loop {
        let report = orchestrator.get_status(&job_id).await?;
        let line = format!("[{:>3}%] {}", report.progress, report.message);
        if line != last_line {
            println!("{}", line);
            last_line = line;
        }

        match report.status {
            JobStatus::Completed => break,
            JobStatus::Error => {
                return Err(report.message.into());
            }
            _ => tokio::time::sleep(Duration::from_millis(500)).await,
        }
    }

    let handle = orchestrator.retrieve(&job_id).await?;
    let destination = input
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(handle.output_name());
    move_file(handle.output_path(), &destination).await?;
    drop(handle);

    println!("Wrote {}", destination.display());
    Ok(())
}

/// Long-running mode: retention sweeper plus the HTTP status endpoint.
async fn serve(config: &Config) -> Result<(), Box<dyn Error>> {
    init_dirs(config)?;

    let orchestrator = JobOrchestrator::new(OrchestratorSettings::from_config(config));
    let shutdown = CancellationToken::new();

    let sweeper = RetentionSweeper::new(
        config.storage.upload_dir.clone(),
        config.storage.output_dir.clone(),
        RetentionPolicy {
            max_age: Duration::from_secs(config.retention.max_age_secs),
            interval: Duration::from_secs(config.retention.sweep_interval_secs),
        },
        orchestrator.registry().clone(),
    );
    let sweeper_handle = sweeper.spawn(shutdown.clone());

    let server = run_status_server(
        orchestrator.clone(),
        &config.server.bind_addr,
        shutdown.clone(),
    );
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            shutdown.cancel();
            orchestrator.shutdown();
            let _ = server.await;
        }
    }

    let _ = sweeper_handle.await;
    Ok(())
}

/// Ensure the managed storage directories exist.
fn init_dirs(config: &Config) -> Result<(), Box<dyn Error>> {
    std::fs::create_dir_all(&config.storage.upload_dir)?;
    std::fs::create_dir_all(&config.storage.output_dir)?;
    Ok(())
}

/// Unique sanitized destination for one staged upload.
fn staged_upload_path(upload_dir: &Path, input_name: &str) -> PathBuf {
    let sanitized = vidshrink::orchestrator::sanitize_file_name(input_name);
    upload_dir.join(format!("{}_{}", uuid::Uuid::new_v4(), sanitized))
}

/// Rename the file, falling back to copy-and-delete across filesystems.
async fn move_file(from: &Path, to: &Path) -> Result<(), Box<dyn Error>> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(_) => {
            tokio::fs::copy(from, to).await?;
            tokio::fs::remove_file(from).await?;
            Ok(())
        }
    }
}
