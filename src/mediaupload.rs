use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{Mutex, mpsc};
use tracing::{error, info};
use walkdir::WalkDir;

use media_upload::Config;
use media_upload::uploader::helpers::format_size;
use media_upload::uploader::{TransferOutcome, UploadCoordinator, UploadError};

#[derive(Parser, Debug)]
#[command(
    name = "mediaupload",
    version = env!("CARGO_PKG_VERSION"),
    author = "Tyr Chen <tyr.chen@gmail.com>",
    about = "Upload media files to S3 through a managed transfer or a pre-signed URL",
    long_about = "Uploads media files with live progress. By default files go to S3 directly with \
                  multipart upload for large files. With --pre-signed, an application server signs \
                  an upload URL and the file is streamed to it with a single PUT.",
    after_help = "Examples:\n  \
                  mediaupload ./video.mp4                 # Managed upload of one file\n  \
                  mediaupload ./photos -e jpg,png         # Upload every jpg/png under a directory\n  \
                  mediaupload ./video.mp4 --pre-signed    # Upload through a pre-signed URL\n\n\
                  Configuration (.env):\n  \
                  AWS_REGION=us-west-2\n  \
                  S3_BUCKET=my-bucket\n  \
                  AWS_ACCESS_KEY_ID=...\n  \
                  AWS_SECRET_ACCESS_KEY=...\n  \
                  PRESIGN_API_URL=https://api.example.com/media/presign\n  \
                  PRESIGN_ACCESS_TOKEN=..."
)]
struct Cli {
    /// File or directory to upload
    path: PathBuf,

    /// Upload through a URL signed by the application server
    #[arg(long)]
    pre_signed: bool,

    /// Allowed file extensions (comma-separated, e.g., "mp4,mov,jpg")
    #[arg(
        long,
        short = 'e',
        default_value = "mp4,mov,jpg,jpeg,png",
        value_delimiter = ','
    )]
    extensions: Vec<String>,

    /// Maximum number of concurrent uploads
    #[arg(long, short = 'c', default_value = "4")]
    max_concurrent: usize,

    /// Show what would be uploaded without uploading
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug)]
struct Stats {
    uploaded: AtomicUsize,
    failed: AtomicUsize,
    total_bytes_uploaded: AtomicU64,
    start_time: std::time::Instant,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            uploaded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            total_bytes_uploaded: AtomicU64::new(0),
            start_time: std::time::Instant::now(),
        }
    }
}

#[derive(Debug, Clone)]
enum ProcessResult {
    Uploaded {
        filename: String,
        size: String,
        url: String,
    },
    Failed {
        filename: String,
        error: String,
    },
}

impl ProcessResult {
    fn filename(&self) -> &str {
        match self {
            Self::Uploaded { filename, .. } | Self::Failed { filename, .. } => filename,
        }
    }
}

impl Stats {
    fn print_summary(&self) {
        let duration = self.start_time.elapsed();
        let total_bytes = self.total_bytes_uploaded.load(Ordering::Relaxed);

        println!("\n{}", style("═".repeat(70)).dim());
        println!(
            "{}",
            style(format!(
                "Summary: {} uploaded, {} failed",
                self.uploaded.load(Ordering::Relaxed),
                self.failed.load(Ordering::Relaxed)
            ))
            .bold()
        );

        if total_bytes > 0 {
            println!(
                "{}",
                style(format!(
                    "Total uploaded: {} ({} bytes)",
                    format_size(total_bytes),
                    total_bytes
                ))
                .dim()
            );
        }

        if duration.as_secs() > 0 {
            let speed = total_bytes as f64 / duration.as_secs_f64() / 1024.0 / 1024.0;
            println!(
                "{}",
                style(format!(
                    "Time: {:.2}s, Average speed: {:.2} MB/s",
                    duration.as_secs_f64(),
                    speed
                ))
                .dim()
            );
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file early to get LOG_LEVEL
    dotenv::dotenv().ok();

    let log_level = std::env::var("LOG_LEVEL")
        .ok()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(&log_level))
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    info!("Media Upload Tool v{}", env!("CARGO_PKG_VERSION"));
    info!("Concurrent workers: {}", cli.max_concurrent);

    let config = Config::from_env()?;
    let mode = if cli.pre_signed {
        if config.presign.is_none() {
            anyhow::bail!("--pre-signed requires PRESIGN_API_URL and PRESIGN_ACCESS_TOKEN");
        }
        "pre-signed URL"
    } else {
        if config.storage.is_none() {
            anyhow::bail!("Managed upload requires S3_BUCKET, AWS_REGION and AWS credentials");
        }
        "managed transfer"
    };

    let files = collect_files(&cli.path, &cli.extensions)?;
    if files.is_empty() {
        println!(
            "{}",
            style(format!(
                "No files found with extensions: {}",
                cli.extensions.join(", ")
            ))
            .yellow()
        );
        return Ok(());
    }

    if cli.dry_run {
        println!(
            "{}",
            style("🔍 DRY RUN MODE - No files will be uploaded")
                .yellow()
                .bold()
        );
        println!();
        for file in &files {
            let size = tokio::fs::metadata(file).await?.len();
            println!(
                "  {} {} via {} ({})",
                style("WOULD UPLOAD").green().bold(),
                display_name(&cli.path, file),
                mode,
                format_size(size)
            );
        }
        return Ok(());
    }

    let coordinator = UploadCoordinator::new(&config).await?;
    let multi = Arc::new(MultiProgress::new());
    let stats = Arc::new(Stats::default());

    println!(
        "{}",
        style(format!(
            "⚡ Uploading {} file(s) via {} with {} workers...",
            files.len(),
            mode,
            cli.max_concurrent
        ))
        .cyan()
    );

    let (work_tx, work_rx) = mpsc::channel::<PathBuf>(100);
    let (result_tx, mut result_rx) = mpsc::channel::<ProcessResult>(100);
    let work_rx = Arc::new(Mutex::new(work_rx));

    let mut workers = Vec::new();
    for _ in 0..cli.max_concurrent.max(1) {
        let work_rx = Arc::clone(&work_rx);
        let coordinator = coordinator.clone();
        let stats = Arc::clone(&stats);
        let multi = Arc::clone(&multi);
        let base_path = cli.path.clone();
        let result_tx = result_tx.clone();
        let pre_signed = cli.pre_signed;

        workers.push(tokio::spawn(async move {
            loop {
                let file_path = {
                    let mut rx_guard = work_rx.lock().await;
                    rx_guard.recv().await
                };

                let Some(path) = file_path else {
                    break; // Channel closed
                };

                let pb = multi.add(ProgressBar::new(100));
                if let Ok(bar_style) = ProgressStyle::default_bar()
                    .template("{spinner:.green} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
                {
                    pb.set_style(bar_style.progress_chars("#>-"));
                }
                pb.set_message(display_name(&base_path, &path));

                let result =
                    process_upload(&coordinator, &path, &base_path, pre_signed, &pb, &stats).await;
                pb.finish_and_clear();

                let _ = result_tx.send(result).await;
            }
        }));
    }
    drop(result_tx);

    let collector_handle = tokio::spawn(async move {
        let mut results = Vec::new();
        while let Some(result) = result_rx.recv().await {
            results.push(result);
        }
        results
    });

    for file_path in files {
        work_tx
            .send(file_path)
            .await
            .context("Upload workers stopped early")?;
    }
    drop(work_tx); // Close channel to signal workers to exit

    for worker in workers {
        if let Err(e) = worker.await {
            eprintln!("{} Worker panic: {}", style("✗").red(), e);
        }
    }

    let mut results = collector_handle.await?;
    results.sort_by(|a, b| a.filename().cmp(b.filename()));

    println!();
    for result in results {
        match result {
            ProcessResult::Uploaded {
                filename,
                size,
                url,
            } => {
                println!(
                    "{} {} ({})",
                    style("✓").green(),
                    style(&filename).green(),
                    style(size).dim()
                );
                println!("  {} {}", style("🔗").blue(), style(&url).dim());
            }
            ProcessResult::Failed { filename, error } => {
                println!(
                    "{} {} - {}",
                    style("✗").red(),
                    style(&filename).red(),
                    style(error).red()
                );
            }
        }
    }

    println!();
    stats.print_summary();

    Ok(())
}

/// Drive one upload and fold its events into a result line
async fn process_upload(
    coordinator: &UploadCoordinator,
    file_path: &Path,
    base_path: &Path,
    pre_signed: bool,
    pb: &ProgressBar,
    stats: &Stats,
) -> ProcessResult {
    let filename = display_name(base_path, file_path);
    let file_size = tokio::fs::metadata(file_path)
        .await
        .map(|m| m.len())
        .unwrap_or(0);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = if pre_signed {
        coordinator.upload_pre_signed(file_path, Arc::new(tx))
    } else {
        coordinator.upload(file_path, Arc::new(tx))
    };

    let mut outcome: Option<Result<String, UploadError>> = None;
    while let Some(event) = rx.recv().await {
        match event {
            TransferOutcome::InProgress(pct) => pb.set_position(pct as u64),
            TransferOutcome::Completed(url) => outcome = Some(Ok(url)),
            TransferOutcome::Failed(e) => outcome = Some(Err(e)),
        }
    }

    if let Err(e) = handle.join().await {
        error!("Upload task for {} ended abnormally: {:#}", filename, e);
    }

    match outcome {
        Some(Ok(url)) => {
            stats.uploaded.fetch_add(1, Ordering::Relaxed);
            stats
                .total_bytes_uploaded
                .fetch_add(file_size, Ordering::Relaxed);
            ProcessResult::Uploaded {
                filename,
                size: format_size(file_size),
                url,
            }
        }
        Some(Err(e)) => {
            error!("Upload failed for {}: {}", filename, e);
            stats.failed.fetch_add(1, Ordering::Relaxed);
            ProcessResult::Failed {
                filename,
                error: e.user_message(),
            }
        }
        None => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            ProcessResult::Failed {
                filename,
                error: UploadError::Interrupted.to_string(),
            }
        }
    }
}

/// Collect all files to process from the given path, filtered by extensions
fn collect_files(path: &Path, allowed_extensions: &[String]) -> Result<Vec<PathBuf>> {
    let extensions: Vec<String> = allowed_extensions
        .iter()
        .map(|ext| ext.trim_start_matches('.').to_lowercase())
        .collect();

    let matches = |p: &Path| {
        p.extension()
            .map(|ext| extensions.contains(&ext.to_string_lossy().to_lowercase()))
            .unwrap_or(false)
    };

    if path.is_file() {
        Ok(if matches(path) {
            vec![path.to_path_buf()]
        } else {
            Vec::new()
        })
    } else if path.is_dir() {
        Ok(WalkDir::new(path)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && matches(e.path()))
            .map(|e| e.path().to_path_buf())
            .collect())
    } else {
        anyhow::bail!("Path does not exist: {}", path.display());
    }
}

/// Name shown for a file: relative to the base directory, or the file name
fn display_name(base: &Path, file: &Path) -> String {
    file.strip_prefix(base)
        .ok()
        .filter(|rel| !rel.as_os_str().is_empty())
        .or_else(|| file.file_name().map(Path::new))
        .unwrap_or(file)
        .to_string_lossy()
        .to_string()
}
