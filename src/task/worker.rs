//! Worker loop and per-attempt execution.
//!
//! Each worker pulls task ids from the shared dispatch queue, runs one
//! attempt under a child cancellation token and the task's timeout, and
//! records the outcome in the registry. Failed attempts with retry budget
//! left are re-inserted after a backoff delay.

use crate::task::manager::{ManagerInner, TaskManagerConfig};
use crate::task::queue::PushError;
use crate::task::types::*;
use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct Attempt {
    name: String,
    function: TaskFn,
    token: CancellationToken,
    timeout: Duration,
    number: u32,
}

enum Outcome {
    Completed,
    Cancelled,
    Failed(ExecutionError),
}

/// Worker body: runs until the manager's root token is cancelled
pub(crate) async fn run(inner: Arc<ManagerInner>, worker_id: usize) {
    debug!("Worker {} started", worker_id);

    loop {
        let task_id = tokio::select! {
            biased;
            _ = inner.root.cancelled() => break,
            task_id = inner.queue.pop() => task_id,
        };
        execute(&inner, task_id, worker_id).await;
    }

    debug!("Worker {} stopping", worker_id);
}

async fn execute(inner: &Arc<ManagerInner>, task_id: TaskId, worker_id: usize) {
    let Some(attempt) = begin(inner, &task_id) else {
        debug!(
            "Worker {} skipped task {} (no longer pending)",
            worker_id, task_id
        );
        return;
    };

    inner.counters.running.fetch_add(1, Ordering::Relaxed);
    info!(
        "Task started: {} ({}) on worker {}, attempt {}",
        task_id,
        attempt.name,
        worker_id,
        attempt.number + 1
    );

    let reporter = ProgressReporter::new(task_id.clone(), progress_sink(inner));
    let context = TaskContext::new(
        task_id.clone(),
        attempt.number,
        attempt.token.clone(),
        reporter,
    );
    let function = attempt.function.clone();
    let body = AssertUnwindSafe(async move { function(context).await }).catch_unwind();

    let outcome = tokio::select! {
        biased;
        _ = attempt.token.cancelled() => Outcome::Cancelled,
        result = tokio::time::timeout(attempt.timeout, body) => match result {
            Err(_) => Outcome::Failed(ExecutionError::Timeout(attempt.timeout)),
            Ok(Err(panic)) => {
                Outcome::Failed(ExecutionError::Panicked(panic_message(panic.as_ref())))
            }
            Ok(Ok(Err(e))) => Outcome::Failed(ExecutionError::Failed(format!("{:#}", e))),
            Ok(Ok(Ok(()))) => Outcome::Completed,
        },
    };
    // The attempt is over; release anything the body spawned under its token.
    attempt.token.cancel();

    inner.counters.running.fetch_sub(1, Ordering::Relaxed);
    inner.running.remove(&task_id);
    finish(inner, &task_id, outcome, worker_id);
}

/// Move a pending task to running. `None` if it was cancelled or removed meanwhile.
fn begin(inner: &ManagerInner, task_id: &TaskId) -> Option<Attempt> {
    let mut entry = inner.tasks.get_mut(task_id)?;
    if entry.task.status != TaskStatus::Pending {
        return None;
    }

    let now = Utc::now();
    let token = inner.root.child_token();

    entry.task.status = TaskStatus::Running;
    entry.task.started_at = Some(now);
    entry.task.completed_at = None;
    entry.cancel = Some(token.clone());
    inner.running.insert(task_id.clone(), now);

    Some(Attempt {
        name: entry.task.name.clone(),
        function: entry.function.clone(),
        token,
        timeout: entry.task.timeout,
        number: entry.task.retries,
    })
}

fn finish(inner: &Arc<ManagerInner>, task_id: &TaskId, outcome: Outcome, worker_id: usize) {
    let retry = {
        let Some(mut entry) = inner.tasks.get_mut(task_id) else {
            return;
        };
        entry.cancel = None;

        // Cancelled through the API while running; that transition already happened.
        if entry.task.status != TaskStatus::Running {
            debug!(
                "Task {} left running state while on worker {} ({})",
                task_id, worker_id, entry.task.status
            );
            return;
        }

        let now = Utc::now();
        let task = &mut entry.task;
        let mut retry = None;

        match outcome {
            Outcome::Completed => {
                task.status = TaskStatus::Completed;
                task.progress = 100.0;
                task.completed_at = Some(now);
                inner.counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::Cancelled => {
                task.status = TaskStatus::Cancelled;
                task.completed_at = Some(now);
                task.error = Some(ExecutionError::Cancelled.to_string());
                inner.counters.cancelled.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::Failed(cause) if task.retries < task.max_retries => {
                task.retries += 1;
                task.status = TaskStatus::Pending;
                task.started_at = None;
                task.completed_at = None;
                task.error = Some(format!(
                    "Retry {}/{}: {}",
                    task.retries, task.max_retries, cause
                ));
                inner.counters.retried.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Task {} failed on worker {} ({}), retry {}/{}",
                    task_id, worker_id, cause, task.retries, task.max_retries
                );
                retry = Some(task.retries);
            }
            Outcome::Failed(cause) => {
                task.status = TaskStatus::Failed;
                task.completed_at = Some(now);
                task.error = Some(cause.to_string());
                inner.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    "Task {} failed after {} retries: {}",
                    task_id, task.retries, cause
                );
            }
        }

        if retry.is_none() {
            let duration_ms = task.runtime().map_or(0, |d| d.num_milliseconds());
            info!(
                "Task finished: {} ({}) status={} worker={} duration={}ms",
                task_id, task.name, task.status, worker_id, duration_ms
            );
        }
        retry
    };

    match retry {
        Some(retry) => schedule_retry(inner, task_id.clone(), retry),
        None => inner.finished.notify_waiters(),
    }
}

/// Re-insert a failed task after its backoff delay
fn schedule_retry(inner: &Arc<ManagerInner>, task_id: TaskId, retry: u32) {
    let delay = retry_delay(&inner.config, retry);
    if delay.is_zero() {
        requeue_or_fail(inner, &task_id);
        return;
    }

    debug!("Task {} will be re-queued in {:?}", task_id, delay);
    let inner = inner.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = inner.root.cancelled() => {
                inner.finish_pending(&task_id, SHUTDOWN_BEFORE_RETRY);
            }
            _ = tokio::time::sleep(delay) => requeue_or_fail(&inner, &task_id),
        }
    });
}

const SHUTDOWN_BEFORE_RETRY: &str = "Task manager shut down while the task waited to retry";

fn requeue_or_fail(inner: &ManagerInner, task_id: &TaskId) {
    if inner.root.is_cancelled() {
        inner.finish_pending(task_id, SHUTDOWN_BEFORE_RETRY);
        return;
    }

    match inner.requeue(task_id) {
        Ok(()) => {
            info!("Task queued for retry: {}", task_id);
            return;
        }
        // Shutdown closed the queue after the check above.
        Err(PushError::Closed(_)) => {
            inner.finish_pending(task_id, SHUTDOWN_BEFORE_RETRY);
            return;
        }
        Err(PushError::Full(_)) => {}
    }

    let failed = match inner.tasks.get_mut(task_id) {
        Some(mut entry) if entry.task.status == TaskStatus::Pending => {
            let cause = entry.task.error.take().unwrap_or_default();
            entry.task.status = TaskStatus::Failed;
            entry.task.completed_at = Some(Utc::now());
            entry.task.error = Some(format!(
                "Failed to requeue for retry (queue full): {}",
                cause
            ));
            true
        }
        _ => false,
    };

    if failed {
        inner.counters.failed.fetch_add(1, Ordering::Relaxed);
        warn!("Task {} could not be re-queued, queue is full", task_id);
        inner.finished.notify_waiters();
    }
}

/// Exponential backoff with ±10% jitter, capped at the configured maximum
pub(crate) fn retry_delay(config: &TaskManagerConfig, retry: u32) -> Duration {
    let base = config.retry_delay();
    if base.is_zero() {
        return Duration::ZERO;
    }

    let multiplier = 2u32.saturating_pow(retry.saturating_sub(1).min(16));
    let delay = base.saturating_mul(multiplier).min(config.max_retry_delay());

    let jitter = (rand::random::<f64>() - 0.5) * 0.2;
    delay.mul_f64(1.0 + jitter).min(config.max_retry_delay())
}

fn progress_sink(inner: &Arc<ManagerInner>) -> Arc<dyn Fn(&TaskId, f64, &str) + Send + Sync> {
    let inner: Weak<ManagerInner> = Arc::downgrade(inner);
    Arc::new(move |task_id, fraction, message| {
        if let Some(inner) = inner.upgrade() {
            inner.update_progress(task_id, fraction, message);
        }
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
