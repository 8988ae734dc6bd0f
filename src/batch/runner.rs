use crate::batch::file::FileDescriptor;
use crate::batch::group::{Batch, effective_batch_size, group_files};
use crate::env;
use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Batch runner configuration
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum batches in flight; zero picks min(logical cores, 8)
    pub workers: usize,
    /// Files per batch; zero picks the default of 20
    pub batch_size: usize,
    /// Abandon the rest of a batch after its first failing file
    pub stop_batch_on_error: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: env::default_batch_workers(),
            batch_size: env::batch::DEFAULT_BATCH_SIZE,
            stop_batch_on_error: false,
        }
    }
}

impl BatchConfig {
    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            env::default_batch_workers()
        } else {
            self.workers
        }
    }

    pub fn effective_batch_size(&self) -> usize {
        effective_batch_size(self.batch_size)
    }
}

/// Per-file work performed by the runner
#[async_trait]
pub trait FileProcessor: Send + Sync {
    async fn process(&self, file: &FileDescriptor) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> FileProcessor for F
where
    F: Fn(FileDescriptor) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn process(&self, file: &FileDescriptor) -> anyhow::Result<()> {
        (self)(file.clone()).await
    }
}

/// Observer for run progress: fraction of files accounted for, plus a message
pub type BatchProgressCallback = Arc<dyn Fn(f64, &str) + Send + Sync>;

/// A file the processor rejected
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Outcome of a batch run
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct BatchReport {
    pub total: usize,
    pub processed: usize,
    pub failed: usize,
    /// Files never handed to the processor (cancellation or stop-on-error)
    pub skipped: usize,
    pub failures: Vec<FileFailure>,
    pub batches: usize,
    /// Peak number of batches running at the same time
    pub max_concurrent_batches: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("{failed} of {total} files failed: {details}")]
    PartialFailure {
        failed: usize,
        total: usize,
        details: String,
    },

    #[error("Batch worker failed to join: {0}")]
    Join(String),
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Collapse per-file failures into a single error
    pub fn into_result(self) -> Result<BatchReport, BatchError> {
        if self.failures.is_empty() {
            return Ok(self);
        }
        let details = self
            .failures
            .iter()
            .map(|failure| format!("{}: {}", failure.path.display(), failure.error))
            .collect::<Vec<_>>()
            .join("; ");
        Err(BatchError::PartialFailure {
            failed: self.failed,
            total: self.total,
            details,
        })
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Processed {}/{} files, {} errors",
            self.processed, self.total, self.failed
        )?;
        if self.skipped > 0 {
            write!(f, ", {} skipped", self.skipped)?;
        }
        Ok(())
    }
}

/// Runs a processor over many files with a bounded number of concurrent batches
pub struct BatchRunner {
    config: BatchConfig,
    progress: Option<BatchProgressCallback>,
    cancellation: CancellationToken,
}

struct RunState {
    processor: Arc<dyn FileProcessor>,
    failures: Mutex<Vec<FileFailure>>,
    processed: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    total: usize,
    stop_on_error: bool,
    progress: Option<BatchProgressCallback>,
    cancellation: CancellationToken,
}

impl BatchRunner {
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            progress: None,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_progress(mut self, callback: BatchProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Files not yet started when `token` fires are skipped
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Process every file. Per-file errors are collected in the report;
    /// only a batch worker that cannot be joined fails the call.
    pub async fn run<P>(
        &self,
        files: Vec<FileDescriptor>,
        processor: P,
    ) -> Result<BatchReport, BatchError>
    where
        P: FileProcessor + 'static,
    {
        let started = Instant::now();
        let batch_size = self.config.effective_batch_size();
        let state = Arc::new(RunState {
            processor: Arc::new(processor),
            failures: Mutex::new(Vec::new()),
            processed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            total: files.len(),
            stop_on_error: self.config.stop_batch_on_error,
            progress: self.progress.clone(),
            cancellation: self.cancellation.clone(),
        });

        let batches = if files.is_empty() {
            0
        } else if files.len() < batch_size {
            info!("Processing {} files sequentially", files.len());
            state.run_batch(Batch { index: 0, files }).await;
            1
        } else {
            self.run_parallel(&state, files, batch_size).await?
        };

        let failures = std::mem::take(&mut *state.failures.lock().await);
        let report = BatchReport {
            total: state.total,
            processed: state.processed.load(Ordering::SeqCst),
            failed: state.failed.load(Ordering::SeqCst),
            skipped: state.skipped.load(Ordering::SeqCst),
            failures,
            batches,
            max_concurrent_batches: state.peak.load(Ordering::SeqCst),
            elapsed_ms: duration_ms(started.elapsed()),
        };

        info!("Batch run finished: {} in {}ms", report, report.elapsed_ms);
        Ok(report)
    }

    async fn run_parallel(
        &self,
        state: &Arc<RunState>,
        files: Vec<FileDescriptor>,
        batch_size: usize,
    ) -> Result<usize, BatchError> {
        let workers = self.config.effective_workers();
        let batches = group_files(files, batch_size, Utc::now());
        let batch_count = batches.len();
        info!(
            "Processing {} files in {} batches with {} workers",
            state.total, batch_count, workers
        );

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut handles = Vec::with_capacity(batch_count);
        for batch in batches {
            let state = state.clone();
            let semaphore = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                state.run_batch(batch).await;
            }));
        }

        for result in futures::future::join_all(handles).await {
            result.map_err(|e| BatchError::Join(e.to_string()))?;
        }
        Ok(batch_count)
    }
}

impl RunState {
    async fn run_batch(&self, batch: Batch) {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        debug!("Batch {} started with {} files", batch.index, batch.len());

        let mut files = batch.files.into_iter();
        while let Some(file) = files.next() {
            if self.cancellation.is_cancelled() {
                self.skip(1 + files.len(), batch.index, "cancelled");
                break;
            }
            if !self.process_file(file).await && self.stop_on_error {
                self.skip(files.len(), batch.index, "stopped after an error");
                break;
            }
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        debug!("Batch {} finished", batch.index);
    }

    async fn process_file(&self, file: FileDescriptor) -> bool {
        let outcome = AssertUnwindSafe(self.processor.process(&file))
            .catch_unwind()
            .await;
        let error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{:#}", e)),
            Err(_) => Some("processor panicked".to_string()),
        };

        let succeeded = error.is_none();
        match error {
            None => {
                self.processed.fetch_add(1, Ordering::SeqCst);
            }
            Some(error) => {
                warn!("Failed to process {}: {}", file.path.display(), error);
                self.failed.fetch_add(1, Ordering::SeqCst);
                self.failures.lock().await.push(FileFailure {
                    path: file.path.clone(),
                    error,
                });
            }
        }
        self.report_progress(&file);
        succeeded
    }

    fn skip(&self, count: usize, batch_index: usize, reason: &str) {
        if count == 0 {
            return;
        }
        self.skipped.fetch_add(count, Ordering::SeqCst);
        debug!("Batch {} skipped {} files ({})", batch_index, count, reason);
    }

    fn report_progress(&self, file: &FileDescriptor) {
        let Some(callback) = &self.progress else {
            return;
        };
        let done = self.processed.load(Ordering::SeqCst) + self.failed.load(Ordering::SeqCst);
        let fraction = if self.total == 0 {
            1.0
        } else {
            done as f64 / self.total as f64
        };
        callback(fraction, &format!("Processed {}", file.filename));
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
