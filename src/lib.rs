//! # Agent Scheduler
//!
//! A background task scheduler with a bounded worker pool, plus a
//! priority-based pipeline for processing large sets of files in batches.
//!
//! ## Architecture Overview
//!
//! The system consists of several key components organized into modules:
//!
//! - **[`task`]**: Task manager with a bounded dispatch queue, fixed worker pool,
//!   retries with backoff, per-task timeouts, cancellation and progress fan-out
//! - **[`batch`]**: File discovery, priority scoring, batch grouping and the
//!   bounded batch runner
//! - **[`cli`]**: Argument parsing, configuration discovery and subcommands
//! - **[`env`]**: Paths and built-in defaults
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use agent_scheduler::{TaskManager, TaskManagerConfig, TaskPriority};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let manager = TaskManager::new(TaskManagerConfig::default());
//!
//!     let task_id = manager.start_task(
//!         "index",
//!         "Index the workspace",
//!         |ctx| async move {
//!             ctx.report(0.5, "halfway");
//!             Ok(())
//!         },
//!         TaskPriority::Normal,
//!     )?;
//!
//!     let task = manager.wait_for_task(&task_id).await?;
//!     println!("Task {} finished as {}", task.id, task.status);
//!
//!     manager.shutdown(std::time::Duration::from_secs(5)).await?;
//!     Ok(())
//! }
//! ```

/// Background task management.
///
/// Provides the task manager, its configuration, task snapshots and the
/// execution context handed to task functions.
pub mod task;

/// Priority-based file batching.
///
/// Discovers files, scores them, groups them into batches and runs a
/// per-file processor over the batches with bounded concurrency.
pub mod batch;

/// Environment constants and path utilities.
///
/// Centralizes the configuration paths and default values used throughout
/// the application.
pub mod env;

// CLI module for command-line interface
pub mod cli;

// Re-export main task types
pub use task::{
    DispatchOrder, ManagerStats, ProgressUpdate, Task, TaskContext, TaskId, TaskManager,
    TaskManagerConfig, TaskManagerError, TaskPriority, TaskSpec, TaskStatus,
};

// Re-export main batch types
pub use batch::{
    Batch, BatchConfig, BatchError, BatchReport, BatchRunner, FileDescriptor, FileKind,
    FileProcessor,
};
