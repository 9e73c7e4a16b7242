//! stemscribe - command-line front end
//!
//! Queues songs for separation, transcription and chord detection, runs
//! them on the bounded job scheduler, and inspects or prunes the job store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use stemscribe_common::config::{job_storage_path, Settings};
use stemscribe_pipeline::db::{self, JobRepository, SqliteJobStore};
use stemscribe_pipeline::models::{Job, JobFiles, JobStatus};
use stemscribe_pipeline::services::{JobScheduler, PipelineModels, PipelineOrchestrator};

/// Command-line arguments for stemscribe
#[derive(Parser, Debug)]
#[command(name = "stemscribe")]
#[command(about = "Stem separation, vocal transcription and chord detection")]
#[command(version)]
struct Args {
    /// Config file (TOML)
    #[arg(short, long, env = "STEMSCRIBE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Storage root for the job database and artifacts
    #[arg(short, long, global = true)]
    storage: Option<PathBuf>,

    /// Maximum number of concurrently active jobs
    #[arg(long, global = true)]
    max_jobs: Option<usize>,

    /// Log filter directive, e.g. `stemscribe_pipeline=debug`
    #[arg(long, global = true)]
    log: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process audio files and wait for the jobs to finish
    Process {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// List jobs, newest first
    List {
        /// Only jobs with this status (queued, processing, completed, failed)
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value = "50")]
        limit: i64,
    },
    /// Print one job record as JSON
    Show { id: Uuid },
    /// Delete finished jobs and their artifacts
    Cleanup {
        /// Age in days; defaults to the configured retention
        #[arg(long)]
        days: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load(args.config.as_deref()).context("Failed to load settings")?;
    if let Some(max_jobs) = args.max_jobs {
        settings.scheduler.max_concurrent_jobs = max_jobs;
        settings.validate().context("Invalid --max-jobs")?;
    }

    let filter = args.log.clone().unwrap_or_else(|| settings.logging.filter.clone());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_new(&filter).unwrap_or_else(|_| "stemscribe=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let storage_root = settings.storage_root(args.storage.as_deref());
    let db_path = storage_root.join(&settings.storage.database_file);
    info!("Storage root: {}", storage_root.display());
    info!("Database: {}", db_path.display());

    let pool = db::init_database_pool(&db_path).await?;
    let store: Arc<dyn JobRepository> =
        Arc::new(SqliteJobStore::new(pool, settings.scheduler.db_max_lock_wait_ms));

    match args.command {
        Command::Process { files } => process(files, settings, store, storage_root).await,
        Command::List { status, limit } => list(store.as_ref(), status.as_deref(), limit).await,
        Command::Show { id } => show(store.as_ref(), id).await,
        Command::Cleanup { days } => {
            let days = days.unwrap_or(settings.storage.job_retention_days);
            cleanup(store.as_ref(), &storage_root, days).await
        }
    }
}

async fn process(
    files: Vec<PathBuf>,
    settings: Settings,
    store: Arc<dyn JobRepository>,
    storage_root: PathBuf,
) -> Result<()> {
    let settings = Arc::new(settings);
    let models = PipelineModels::from_settings(&settings).context("Invalid model commands")?;
    let orchestrator = Arc::new(PipelineOrchestrator::new(
        Arc::clone(&store),
        models,
        Arc::clone(&settings),
        storage_root.clone(),
    ));
    let max_jobs = settings.scheduler.max_concurrent_jobs;
    let scheduler = Arc::new(JobScheduler::new(max_jobs));
    let interrupt = tokio::spawn(withdraw_on_interrupt(Arc::clone(&scheduler)));

    let mut submitted = Vec::with_capacity(files.len());
    for (index, file) in files.iter().enumerate() {
        // Later files wait for an earlier job to finish
        if scheduler.wait_for_slot().await.is_err() {
            warn!(remaining = files.len() - index, "Interrupted, not queueing remaining files");
            break;
        }
        match enqueue(file, store.as_ref(), &storage_root, max_jobs).await {
            Ok(job_id) => {
                let orchestrator = Arc::clone(&orchestrator);
                let task = Box::pin(async move {
                    orchestrator.run(job_id).await?;
                    Ok::<(), anyhow::Error>(())
                });
                match scheduler.submit(job_id, task) {
                    Ok(()) => {
                        println!("{}  queued  {}", job_id, file.display());
                        submitted.push(job_id);
                    }
                    Err(e) => {
                        warn!(job_id = %job_id, error = %e, "Scheduler rejected job");
                        store.update_status(job_id, JobStatus::Failed, Some(&e.to_string())).await?;
                    }
                }
            }
            Err(e) => {
                error!(file = %file.display(), error = %format!("{:#}", e), "Could not queue file");
                eprintln!("skipped {}: {:#}", file.display(), e);
            }
        }
    }

    scheduler.shutdown(true).await;

    interrupt.abort();
    if let Ok(cancelled) = interrupt.await {
        for job_id in cancelled {
            store
                .update_status(job_id, JobStatus::Failed, Some("Cancelled before start"))
                .await?;
        }
    }

    for job_id in submitted {
        if let Some(job) = store.get(job_id).await? {
            print_job_line(&job);
        }
    }
    Ok(())
}

/// Admit a job for `file` and copy the input into its job directory
async fn enqueue(file: &Path, store: &dyn JobRepository, storage_root: &Path, max_jobs: usize) -> Result<Uuid> {
    let metadata = tokio::fs::metadata(file)
        .await
        .with_context(|| format!("Cannot read {}", file.display()))?;
    if !metadata.is_file() {
        anyhow::bail!("{} is not a file", file.display());
    }
    let filename = file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .context("Input path has no file name")?;

    let job = Job::new(filename.clone(), metadata.len() as i64);
    store.admit(&job, max_jobs).await?;

    let input_dir = job_storage_path(storage_root, job.id).join("input");
    let copied = input_dir.join(&filename);
    let copy = async {
        tokio::fs::create_dir_all(&input_dir).await?;
        tokio::fs::copy(file, &copied).await
    };
    if let Err(e) = copy.await {
        let message = format!("Failed to store input file: {}", e);
        store.update_status(job.id, JobStatus::Failed, Some(&message)).await?;
        anyhow::bail!(message);
    }

    let files = JobFiles {
        input_file: Some(copied.to_string_lossy().into_owned()),
        ..JobFiles::default()
    };
    store.update_file_paths(job.id, &files).await?;
    Ok(job.id)
}

async fn list(store: &dyn JobRepository, status: Option<&str>, limit: i64) -> Result<()> {
    let status = match status {
        Some(value) => Some(JobStatus::from_str(value).with_context(|| format!("Unknown status '{}'", value))?),
        None => None,
    };
    for job in store.list(status, limit, 0).await? {
        print_job_line(&job);
    }
    Ok(())
}

async fn show(store: &dyn JobRepository, id: Uuid) -> Result<()> {
    let job = store.get(id).await?.with_context(|| format!("Job not found: {}", id))?;
    println!("{}", serde_json::to_string_pretty(&job)?);
    Ok(())
}

async fn cleanup(store: &dyn JobRepository, storage_root: &Path, days: u32) -> Result<()> {
    let removed = store.cleanup_older_than(days).await?;
    for job_id in &removed {
        let dir = job_storage_path(storage_root, job_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(job_id = %job_id, error = %e, "Failed to remove job directory"),
        }
    }
    println!("Removed {} jobs older than {} days", removed.len(), days);
    Ok(())
}

fn print_job_line(job: &Job) {
    let detail = match job.status {
        JobStatus::Failed => job.error_message.clone().unwrap_or_default(),
        _ => job.status_message.clone().unwrap_or_default(),
    };
    println!(
        "{}  {:<10} {:>3}%  {}  {}",
        job.id,
        job.status.as_str(),
        job.progress,
        job.input_filename,
        detail
    );
}

/// On Ctrl+C, stop admitting work and withdraw jobs no worker has started
///
/// Running jobs are left to finish. Returns the withdrawn ids.
async fn withdraw_on_interrupt(scheduler: Arc<JobScheduler>) -> Vec<Uuid> {
    shutdown_signal().await;
    info!("Interrupted, withdrawing jobs that have not started");
    scheduler.shutdown(false).await;
    scheduler
        .status()
        .active_ids
        .into_iter()
        .filter(|job_id| scheduler.cancel(*job_id))
        .collect()
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}
