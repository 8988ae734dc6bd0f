//! Subcommand handlers
//!
//! Each handler resolves its settings from the discovered configuration and
//! the command line, runs the work and prints the result.

use super::args::{DiscoverConfig, PlanConfig, ScanConfig};
use super::config::{ConfigDiscovery, SchedulerConfig};
use crate::batch::{
    BatchConfig, BatchReport, BatchRunner, DiscoveryOptions, DiscoveryReport, FileDescriptor,
    FileKind, FileProcessor, directory_summary, discover, group_files, hash_file,
};
use crate::task::{ProgressUpdate, Task, TaskManager, TaskManagerConfig, TaskSpec, TaskStatus};
use anyhow::{Context, bail};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Processor that records the blake3 digest of every file it sees
#[derive(Clone, Default)]
pub struct ContentHasher {
    digests: Arc<DashMap<PathBuf, String>>,
}

#[async_trait]
impl FileProcessor for ContentHasher {
    async fn process(&self, file: &FileDescriptor) -> anyhow::Result<()> {
        let path = file.path.clone();
        let digest = tokio::task::spawn_blocking(move || hash_file(&path))
            .await?
            .with_context(|| format!("Failed to hash {}", file.path.display()))?;
        self.digests.insert(file.path.clone(), digest);
        Ok(())
    }
}

impl ContentHasher {
    /// Digests collected so far, ordered by path
    pub fn digests(&self) -> BTreeMap<PathBuf, String> {
        self.digests
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

/// Result of a `scan` run
#[derive(Debug, Serialize)]
pub struct ScanSummary {
    pub task: Task,
    pub report: BatchReport,
    pub digests: BTreeMap<PathBuf, String>,
}

#[derive(Serialize)]
struct PlannedFile<'a> {
    path: &'a PathBuf,
    kind: FileKind,
    size: u64,
    score: i32,
}

#[derive(Serialize)]
struct PlannedBatch<'a> {
    index: usize,
    files: Vec<PlannedFile<'a>>,
}

async fn discover_blocking(
    dirs: Vec<PathBuf>,
    options: DiscoveryOptions,
) -> anyhow::Result<DiscoveryReport> {
    let report = tokio::task::spawn_blocking(move || discover(&dirs, &options)).await??;
    Ok(report)
}

pub async fn run_discover(config: DiscoverConfig) -> anyhow::Result<()> {
    let options = DiscoveryOptions {
        compute_hashes: config.hash,
        ..Default::default()
    };
    let report = discover_blocking(config.dirs, options).await?;

    if config.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}", directory_summary(&report.directories));
    println!();
    for stats in &report.directories {
        println!(
            "{}: {} files (text {}, pdf {}, image {}, other {}), {} bytes",
            stats.path.display(),
            stats.total_files,
            stats.text_files,
            stats.pdf_files,
            stats.image_files,
            stats.other_files,
            stats.total_size
        );
    }
    Ok(())
}

pub async fn run_plan(config: PlanConfig, settings: &SchedulerConfig) -> anyhow::Result<()> {
    let report = discover_blocking(config.dirs, DiscoveryOptions::default()).await?;
    let batch_size = config.batch_size.unwrap_or(settings.batch.batch_size);

    let now = Utc::now();
    let batches = group_files(report.files, batch_size, now);
    let planned: Vec<PlannedBatch<'_>> = batches
        .iter()
        .map(|batch| PlannedBatch {
            index: batch.index,
            files: batch
                .files
                .iter()
                .map(|file| PlannedFile {
                    path: &file.path,
                    kind: file.kind,
                    size: file.size,
                    score: file.priority_at(now),
                })
                .collect(),
        })
        .collect();

    if config.json {
        println!("{}", serde_json::to_string_pretty(&planned)?);
        return Ok(());
    }

    for batch in &planned {
        println!("Batch {} ({} files)", batch.index + 1, batch.files.len());
        for file in &batch.files {
            println!(
                "  [{:>3}] {:<6} {:>10}  {}",
                file.score,
                file.kind,
                file.size,
                file.path.display()
            );
        }
    }
    println!("{} batches of up to {} files", planned.len(), batch_size);
    Ok(())
}

pub async fn run_scan(config: ScanConfig, settings: SchedulerConfig) -> anyhow::Result<()> {
    let batch_config = BatchConfig {
        workers: config.workers.unwrap_or(settings.batch.workers),
        batch_size: config.batch_size.unwrap_or(settings.batch.batch_size),
        stop_batch_on_error: config.stop_on_error || settings.batch.stop_batch_on_error,
    };

    let show_progress = !config.json;
    let task_config = settings
        .task_manager
        .with_progress_callback(Arc::new(move |update: &ProgressUpdate| {
            if show_progress {
                eprint!("\r{:>5.1}% {:<60}", update.progress, update.message);
                let _ = std::io::stderr().flush();
            }
        }));

    let summary = scan(config.dirs, task_config, batch_config).await?;
    if show_progress {
        eprintln!();
    }

    if config.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", summary.report);
        for failure in &summary.report.failures {
            println!("  {}: {}", failure.path.display(), failure.error);
        }
    }
    Ok(())
}

/// Discover files, hash them through the batch runner inside one managed task,
/// and shut the manager down.
pub async fn scan(
    dirs: Vec<PathBuf>,
    task_config: TaskManagerConfig,
    batch_config: BatchConfig,
) -> anyhow::Result<ScanSummary> {
    let discovered = discover_blocking(dirs, DiscoveryOptions::default()).await?;
    let files = Arc::new(discovered.files);
    info!("Discovered {} files to scan", files.len());

    let manager = TaskManager::new(task_config);
    let hasher = ContentHasher::default();
    let result: Arc<tokio::sync::Mutex<Option<BatchReport>>> = Arc::default();

    let spec = {
        let hasher = hasher.clone();
        let result = result.clone();
        TaskSpec::new("scan", move |ctx| {
            let files = files.clone();
            let hasher = hasher.clone();
            let result = result.clone();
            let batch_config = batch_config.clone();
            async move {
                let reporter = ctx.reporter();
                let runner = BatchRunner::new(batch_config)
                    .with_progress(Arc::new(move |fraction: f64, message: &str| {
                        reporter.report(fraction, message)
                    }))
                    .with_cancellation(ctx.cancellation_token().clone());

                let report = runner.run(files.as_ref().clone(), hasher).await?;
                debug!("Scan task {} finished its batch run", ctx.task_id());
                *result.lock().await = Some(report);
                Ok(())
            }
        })
        .with_description("Hash discovered files in priority batches")
        .with_max_retries(0)
    };

    let task_id = manager.submit(spec)?;
    let task = manager.wait_for_task(&task_id).await?;
    manager.shutdown(SHUTDOWN_TIMEOUT).await?;

    if task.status != TaskStatus::Completed {
        bail!(
            "Scan task {} ended as {}: {}",
            task.id,
            task.status,
            task.error.as_deref().unwrap_or("no error recorded")
        );
    }

    let report = result
        .lock()
        .await
        .take()
        .context("Scan task completed without a report")?;

    Ok(ScanSummary {
        task,
        report,
        digests: hasher.digests(),
    })
}

pub fn run_show_config(settings: &SchedulerConfig) -> anyhow::Result<()> {
    ConfigDiscovery::show_discovery_info();
    println!();
    println!("Effective configuration:");
    println!("{}", settings.to_toml_string()?);
    Ok(())
}
