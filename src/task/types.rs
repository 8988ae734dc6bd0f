use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Unique identifier for tasks, derived from the task name and creation time
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Build an id from a task name, its creation time and a per-manager sequence number
    pub(crate) fn generate(name: &str, created_at: DateTime<Utc>, sequence: u64) -> Self {
        let nanos = created_at
            .timestamp_nanos_opt()
            .unwrap_or_else(|| created_at.timestamp_micros() * 1000);
        Self(format!("{}_{}_{}", name, nanos, sequence))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Snapshot of a task as seen from outside the manager
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub description: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Percentage in 0..=100
    pub progress: f64,
    pub error: Option<String>,
    pub retries: u32,
    pub max_retries: u32,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

/// Lifecycle states of a task
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting in the dispatch queue (initially or for a retry)
    Pending,
    /// Held by a worker
    Running,
    /// Finished successfully
    Completed,
    /// Failed with the retry budget exhausted
    Failed,
    /// Cancelled explicitly or by shutdown
    Cancelled,
}

/// Task priority levels with numeric values
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low = 1,
    #[default]
    Normal = 5,
    High = 10,
    Urgent = 20,
}

/// Progress notification fanned out to the registered callbacks
#[derive(Serialize, Clone, Debug)]
pub struct ProgressUpdate {
    pub task_id: TaskId,
    /// Percentage in 0..=100
    pub progress: f64,
    pub message: String,
}

/// Observer invoked for every progress update
pub type ProgressCallback = Arc<dyn Fn(&ProgressUpdate) + Send + Sync>;

/// Future returned by a task function
pub type TaskFuture = BoxFuture<'static, anyhow::Result<()>>;

/// The work a task performs. Invoked once per attempt.
pub type TaskFn = Arc<dyn Fn(TaskContext) -> TaskFuture + Send + Sync>;

/// Why an attempt did not complete
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutionError {
    #[error("Task timed out after {0:?}")]
    Timeout(Duration),

    #[error("Task was cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),

    #[error("Task panicked: {0}")]
    Panicked(String),
}

/// Errors surfaced by the task manager API
#[derive(Debug, thiserror::Error)]
pub enum TaskManagerError {
    #[error("Task queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Task {id} cannot be cancelled, current status: {status}")]
    NotCancellable { id: TaskId, status: TaskStatus },

    #[error("Shutdown timeout after {0:?}")]
    ShutdownTimeout(Duration),

    #[error("Task manager is shutting down")]
    ShuttingDown,
}

/// Task specification used for submission
pub struct TaskSpec {
    pub name: String,
    pub description: String,
    pub function: TaskFn,
    pub priority: TaskPriority,
    /// Falls back to the manager default when unset
    pub timeout: Option<Duration>,
    /// Falls back to the manager default when unset
    pub max_retries: Option<u32>,
    pub initial_progress: f64,
    pub progress_callback: Option<ProgressCallback>,
}

/// Handle given to a task function for one attempt
#[derive(Clone)]
pub struct TaskContext {
    task_id: TaskId,
    attempt: u32,
    cancellation: CancellationToken,
    reporter: ProgressReporter,
}

/// Sink for progress reports of a single task
#[derive(Clone)]
pub struct ProgressReporter {
    task_id: TaskId,
    sink: Arc<dyn Fn(&TaskId, f64, &str) + Send + Sync>,
}

impl Task {
    /// Check if task is in a terminal state
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Time spent running, if the task has started
    pub fn runtime(&self) -> Option<chrono::Duration> {
        let started = self.started_at?;
        let end = self.completed_at.unwrap_or_else(Utc::now);
        Some(end.signed_duration_since(started))
    }
}

impl TaskStatus {
    /// Terminal states admit no further transitions
    pub fn is_terminal(&self) -> bool {
        match self {
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => true,
            TaskStatus::Pending | TaskStatus::Running => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TaskPriority {
    /// Get numeric value for ordering
    pub fn value(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskPriority::Low => "low",
            TaskPriority::Normal => "normal",
            TaskPriority::High => "high",
            TaskPriority::Urgent => "urgent",
        };
        f.write_str(name)
    }
}

impl TaskSpec {
    /// Create a new task spec from a name and an async task function
    pub fn new<F, Fut>(name: impl Into<String>, function: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: String::new(),
            function: Arc::new(move |ctx| -> TaskFuture { Box::pin(function(ctx)) }),
            priority: TaskPriority::Normal,
            timeout: None,
            max_retries: None,
            initial_progress: 0.0,
            progress_callback: None,
        }
    }

    /// Create a spec from an already boxed task function
    pub fn from_fn(name: impl Into<String>, function: TaskFn) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            function,
            priority: TaskPriority::Normal,
            timeout: None,
            max_retries: None,
            initial_progress: 0.0,
            progress_callback: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set timeout; a zero duration keeps the manager default
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Starting progress percentage, clamped to 0..=100
    pub fn with_initial_progress(mut self, progress: f64) -> Self {
        self.initial_progress = progress.clamp(0.0, 100.0);
        self
    }

    /// Task-specific observer, called after the manager-global one
    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }
}

impl fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpec")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("priority", &self.priority)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("initial_progress", &self.initial_progress)
            .finish_non_exhaustive()
    }
}

impl TaskContext {
    pub(crate) fn new(
        task_id: TaskId,
        attempt: u32,
        cancellation: CancellationToken,
        reporter: ProgressReporter,
    ) -> Self {
        Self {
            task_id,
            attempt,
            cancellation,
            reporter,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Zero-based attempt number (equals the retry count)
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Token cancelled on explicit cancellation or manager shutdown
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Report progress as a fraction in 0..=1
    pub fn report(&self, fraction: f64, message: impl AsRef<str>) {
        self.reporter.report(fraction, message);
    }

    pub fn reporter(&self) -> ProgressReporter {
        self.reporter.clone()
    }
}

impl ProgressReporter {
    pub(crate) fn new(
        task_id: TaskId,
        sink: Arc<dyn Fn(&TaskId, f64, &str) + Send + Sync>,
    ) -> Self {
        Self { task_id, sink }
    }

    /// Report progress as a fraction in 0..=1
    pub fn report(&self, fraction: f64, message: impl AsRef<str>) {
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        (self.sink)(&self.task_id, fraction, message.as_ref());
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}
