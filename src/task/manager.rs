use crate::env;
use crate::task::queue::{DispatchOrder, DispatchQueue, PushError};
use crate::task::types::*;
use crate::task::worker;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Background task manager: a bounded dispatch queue drained by a fixed worker pool
///
/// Construct one per command and pass it where it is needed. Must be created
/// from within a Tokio runtime. Dropping the manager cancels every task context.
pub struct TaskManager {
    pub(crate) inner: Arc<ManagerInner>,
}

/// Configuration for task manager
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskManagerConfig {
    /// Worker pool size, fixed for the manager's lifetime
    pub max_concurrent: usize,
    pub queue_size: usize,
    pub default_timeout_secs: u64,
    pub max_retries: u32,
    /// Base delay before a failed attempt is re-queued; zero re-queues immediately
    pub retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub dispatch_order: DispatchOrder,
    /// Manager-global observer, called before the task-specific one
    #[serde(skip)]
    pub progress_callback: Option<ProgressCallback>,
}

/// Point-in-time counters
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ManagerStats {
    pub total_tasks: usize,
    pub running_tasks: usize,
    pub pending_tasks: usize,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub cancelled_tasks: u64,
    pub retried_attempts: u64,
    pub max_workers: usize,
    pub queue_size: usize,
    pub queue_available: usize,
}

/// Registry entry: the public snapshot plus the parts that never leave the manager
pub(crate) struct TaskEntry {
    pub(crate) task: Task,
    pub(crate) function: TaskFn,
    pub(crate) cancel: Option<CancellationToken>,
    pub(crate) progress_callback: Option<ProgressCallback>,
}

#[derive(Default)]
pub(crate) struct Counters {
    pub(crate) running: AtomicUsize,
    pub(crate) completed: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) cancelled: AtomicU64,
    pub(crate) retried: AtomicU64,
}

pub(crate) struct ManagerInner {
    pub(crate) config: TaskManagerConfig,
    pub(crate) tasks: DashMap<TaskId, TaskEntry>,
    /// Running-pool index, keyed by task id with the start time
    pub(crate) running: DashMap<TaskId, DateTime<Utc>>,
    pub(crate) queue: DispatchQueue,
    pub(crate) root: CancellationToken,
    pub(crate) counters: Counters,
    /// Woken whenever a task reaches a terminal state
    pub(crate) finished: Notify,
    sequence: AtomicU64,
    accepting: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Task manager operations
impl TaskManager {
    /// Create a new task manager and start its worker pool
    pub fn new(config: TaskManagerConfig) -> Self {
        let config = config.normalized();
        let worker_count = config.max_concurrent;
        let queue = DispatchQueue::new(config.dispatch_order, config.queue_size);

        let inner = Arc::new(ManagerInner {
            tasks: DashMap::new(),
            running: DashMap::new(),
            queue,
            root: CancellationToken::new(),
            counters: Counters::default(),
            finished: Notify::new(),
            sequence: AtomicU64::new(0),
            accepting: AtomicBool::new(true),
            workers: Mutex::new(Vec::new()),
            config,
        });

        let handles: Vec<_> = (0..worker_count)
            .map(|worker_id| tokio::spawn(worker::run(inner.clone(), worker_id)))
            .collect();
        *inner.lock_workers() = handles;

        info!(
            "Task manager initialized with {} workers (queue size {}, {:?} dispatch)",
            worker_count,
            inner.queue.capacity(),
            inner.config.dispatch_order
        );

        Self { inner }
    }

    /// Start a new background task with the default timeout and retry budget
    pub fn start_task<F, Fut>(
        &self,
        name: &str,
        description: &str,
        function: F,
        priority: TaskPriority,
    ) -> Result<TaskId, TaskManagerError>
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.submit(
            TaskSpec::new(name, function)
                .with_description(description)
                .with_priority(priority),
        )
    }

    /// Register a task and enqueue it. Fails synchronously when the queue is full.
    pub fn submit(&self, spec: TaskSpec) -> Result<TaskId, TaskManagerError> {
        if !self.inner.accepting.load(Ordering::SeqCst) {
            return Err(TaskManagerError::ShuttingDown);
        }

        let created_at = Utc::now();
        let sequence = self.inner.next_sequence();
        let task_id = TaskId::generate(&spec.name, created_at, sequence);
        let priority = spec.priority;

        let task = Task {
            id: task_id.clone(),
            name: spec.name,
            description: spec.description,
            priority,
            status: TaskStatus::Pending,
            created_at,
            started_at: None,
            completed_at: None,
            progress: spec.initial_progress,
            error: None,
            retries: 0,
            max_retries: spec.max_retries.unwrap_or(self.inner.config.max_retries),
            timeout: spec
                .timeout
                .unwrap_or_else(|| self.inner.config.default_timeout()),
        };
        let name = task.name.clone();

        self.inner.tasks.insert(
            task_id.clone(),
            TaskEntry {
                task,
                function: spec.function,
                cancel: None,
                progress_callback: spec.progress_callback,
            },
        );

        match self.inner.queue.try_push(task_id.clone(), priority, sequence) {
            Ok(()) => {
                info!("Task queued: {} ({}, priority {})", task_id, name, priority);
                Ok(task_id)
            }
            Err(PushError::Full(rejected)) => {
                self.inner.tasks.remove(&rejected);
                warn!("Task queue is full, rejected task {}", name);
                Err(TaskManagerError::QueueFull {
                    capacity: self.inner.queue.capacity(),
                })
            }
            Err(PushError::Closed(rejected)) => {
                self.inner.tasks.remove(&rejected);
                debug!("Task manager shut down while queueing task {}", name);
                Err(TaskManagerError::ShuttingDown)
            }
        }
    }

    /// Cancel a pending or running task
    pub fn cancel_task(&self, task_id: &TaskId) -> Result<(), TaskManagerError> {
        {
            let mut entry = self
                .inner
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| TaskManagerError::TaskNotFound(task_id.clone()))?;

            if entry.task.is_terminal() {
                return Err(TaskManagerError::NotCancellable {
                    id: task_id.clone(),
                    status: entry.task.status,
                });
            }

            if let Some(token) = entry.cancel.take() {
                token.cancel();
            }

            entry.task.status = TaskStatus::Cancelled;
            entry.task.completed_at = Some(Utc::now());
            entry.task.error = Some("Task cancelled by user".to_string());
            info!("Task cancelled: {} ({})", task_id, entry.task.name);
        }

        self.inner.running.remove(task_id);
        self.inner.counters.cancelled.fetch_add(1, Ordering::Relaxed);
        self.inner.finished.notify_waiters();
        Ok(())
    }

    /// Get a copy of a specific task
    pub fn get_task(&self, task_id: &TaskId) -> Result<Task, TaskManagerError> {
        self.inner
            .snapshot(task_id)
            .ok_or_else(|| TaskManagerError::TaskNotFound(task_id.clone()))
    }

    /// Copies of every registered task
    pub fn get_all_tasks(&self) -> HashMap<TaskId, Task> {
        self.inner
            .tasks
            .iter()
            .map(|entry| (entry.key().clone(), entry.task.clone()))
            .collect()
    }

    /// Copies of the tasks currently held by a worker
    pub fn get_running_tasks(&self) -> Vec<Task> {
        let ids: Vec<TaskId> = self
            .inner
            .running
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        let mut tasks: Vec<Task> = ids
            .iter()
            .filter_map(|id| self.inner.snapshot(id))
            .collect();
        tasks.sort_by_key(|task| task.started_at);
        tasks
    }

    /// Copies of tasks waiting for a worker, oldest first
    pub fn get_pending_tasks(&self) -> Vec<Task> {
        let mut pending: Vec<Task> = self
            .inner
            .tasks
            .iter()
            .filter(|entry| entry.task.status == TaskStatus::Pending)
            .map(|entry| entry.task.clone())
            .collect();
        pending.sort_by_key(|task| task.created_at);
        pending
    }

    /// Get statistics about the task manager
    pub fn stats(&self) -> ManagerStats {
        let counters = &self.inner.counters;
        let pending = self.inner.queue.len();
        let capacity = self.inner.queue.capacity();

        ManagerStats {
            total_tasks: self.inner.tasks.len(),
            running_tasks: counters.running.load(Ordering::Relaxed),
            pending_tasks: pending,
            completed_tasks: counters.completed.load(Ordering::Relaxed),
            failed_tasks: counters.failed.load(Ordering::Relaxed),
            cancelled_tasks: counters.cancelled.load(Ordering::Relaxed),
            retried_attempts: counters.retried.load(Ordering::Relaxed),
            max_workers: self.inner.config.max_concurrent,
            queue_size: capacity,
            queue_available: capacity.saturating_sub(pending),
        }
    }

    /// Wait until the task reaches a terminal state and return its final snapshot
    pub async fn wait_for_task(&self, task_id: &TaskId) -> Result<Task, TaskManagerError> {
        loop {
            // Registered before the check so a transition in between is not missed.
            let finished = self.inner.finished.notified();
            let task = self.get_task(task_id)?;
            if task.is_terminal() {
                return Ok(task);
            }
            finished.await;
        }
    }

    /// Remove terminal tasks that finished more than `max_age` ago
    pub fn cleanup_old_tasks(&self, max_age: Duration) -> usize {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(max_age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let before = self.inner.tasks.len();

        self.inner.tasks.retain(|_, entry| {
            let expired = entry.task.is_terminal()
                && entry
                    .task
                    .completed_at
                    .is_some_and(|completed| completed < cutoff);
            !expired
        });

        let removed = before.saturating_sub(self.inner.tasks.len());
        info!("Cleaned up {} old tasks (max age {:?})", removed, max_age);
        removed
    }

    /// Cancel everything and wait up to `timeout` for the workers to exit
    ///
    /// Workers stuck in code that never yields cannot be interrupted; on timeout
    /// they are left running detached and `ShutdownTimeout` is returned.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), TaskManagerError> {
        info!("Shutting down task manager (timeout {:?})", timeout);

        self.inner.accepting.store(false, Ordering::SeqCst);
        self.inner.root.cancel();

        let mut drained = 0;
        for task_id in self.inner.queue.close() {
            if self
                .inner
                .finish_pending(&task_id, "Task manager shut down before the task ran")
            {
                drained += 1;
            }
        }
        if drained > 0 {
            debug!("Cancelled {} queued tasks", drained);
        }

        let handles = std::mem::take(&mut *self.inner.lock_workers());
        match tokio::time::timeout(timeout, futures::future::join_all(handles)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        warn!("Worker exited abnormally: {}", e);
                    }
                }
                info!("Task manager shutdown complete");
                Ok(())
            }
            Err(_) => {
                warn!(
                    "Task manager shutdown timed out after {:?}; busy workers were left running",
                    timeout
                );
                Err(TaskManagerError::ShutdownTimeout(timeout))
            }
        }
    }

    pub fn config(&self) -> &TaskManagerConfig {
        &self.inner.config
    }
}

impl Drop for TaskManager {
    fn drop(&mut self) {
        self.inner.accepting.store(false, Ordering::SeqCst);
        self.inner.root.cancel();
    }
}

impl ManagerInner {
    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn snapshot(&self, task_id: &TaskId) -> Option<Task> {
        self.tasks.get(task_id).map(|entry| entry.task.clone())
    }

    /// Re-insert a task waiting for a retry
    pub(crate) fn requeue(&self, task_id: &TaskId) -> Result<(), PushError> {
        let priority = match self.tasks.get(task_id) {
            Some(entry) if entry.task.status == TaskStatus::Pending => entry.task.priority,
            // Cancelled or cleaned up while waiting, nothing to dispatch.
            _ => return Ok(()),
        };
        self.queue
            .try_push(task_id.clone(), priority, self.next_sequence())
    }

    fn lock_workers(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark a still-pending task cancelled; returns whether it changed
    pub(crate) fn finish_pending(&self, task_id: &TaskId, reason: &str) -> bool {
        let changed = match self.tasks.get_mut(task_id) {
            Some(mut entry) if entry.task.status == TaskStatus::Pending => {
                entry.task.status = TaskStatus::Cancelled;
                entry.task.completed_at = Some(Utc::now());
                entry.task.error = Some(reason.to_string());
                true
            }
            _ => false,
        };
        if changed {
            self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
            self.finished.notify_waiters();
        }
        changed
    }

    /// Store progress for a running task and fan it out to the observers
    pub(crate) fn update_progress(&self, task_id: &TaskId, fraction: f64, message: &str) {
        let task_callback = {
            let Some(mut entry) = self.tasks.get_mut(task_id) else {
                return;
            };
            if entry.task.status != TaskStatus::Running {
                return;
            }
            entry.task.progress = fraction * 100.0;
            entry.progress_callback.clone()
        };

        let update = ProgressUpdate {
            task_id: task_id.clone(),
            progress: fraction * 100.0,
            message: message.to_string(),
        };

        if let Some(callback) = &self.config.progress_callback {
            callback(&update);
        }
        if let Some(callback) = task_callback {
            callback(&update);
        }
    }
}

impl TaskManagerConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    /// Set the manager-global progress observer
    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// Replace zero values with the built-in defaults
    fn normalized(mut self) -> Self {
        if self.max_concurrent == 0 {
            self.max_concurrent = env::default_task_workers();
        }
        if self.queue_size == 0 {
            self.queue_size = env::task::DEFAULT_QUEUE_SIZE;
        }
        if self.default_timeout_secs == 0 {
            self.default_timeout_secs = env::task::DEFAULT_TIMEOUT_SECS;
        }
        self
    }
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: env::default_task_workers(),
            queue_size: env::task::DEFAULT_QUEUE_SIZE,
            default_timeout_secs: env::task::DEFAULT_TIMEOUT_SECS,
            max_retries: env::task::DEFAULT_MAX_RETRIES,
            retry_delay_ms: env::task::DEFAULT_RETRY_DELAY_MS,
            max_retry_delay_ms: env::task::DEFAULT_MAX_RETRY_DELAY_MS,
            dispatch_order: DispatchOrder::Fifo,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for TaskManagerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskManagerConfig")
            .field("max_concurrent", &self.max_concurrent)
            .field("queue_size", &self.queue_size)
            .field("default_timeout_secs", &self.default_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("max_retry_delay_ms", &self.max_retry_delay_ms)
            .field("dispatch_order", &self.dispatch_order)
            .field("progress_callback", &self.progress_callback.is_some())
            .finish()
    }
}
