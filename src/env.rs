//! Environment constants and path utilities for the agent scheduler.
//!
//! Centralizes the configuration file locations and the built-in defaults
//! shared by the task manager, the batch pipeline and the CLI.

use std::path::{Path, PathBuf};

/// Main application directory name (hidden directory like .git)
pub const APP_DIR_NAME: &str = ".agent-scheduler";

/// Configuration file name inside the application directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Stand-alone configuration file name looked up in the working directory
pub const LOCAL_CONFIG_FILE_NAME: &str = "agent-scheduler.toml";

/// System-wide configuration file (Unix-like systems)
pub const SYSTEM_CONFIG_FILE: &str = "/etc/agent-scheduler/config.toml";

/// Task manager defaults
pub mod task {
    /// Capacity of the dispatch queue
    pub const DEFAULT_QUEUE_SIZE: usize = 1000;

    /// Per-task timeout when none is given (30 minutes)
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30 * 60;

    /// Retry budget for tasks submitted through `start_task`
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    /// Base delay before a failed task is re-inserted into the queue
    pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

    /// Upper bound for the exponential retry delay
    pub const DEFAULT_MAX_RETRY_DELAY_MS: u64 = 60_000;
}

/// Batch pipeline defaults
pub mod batch {
    /// Files per batch
    pub const DEFAULT_BATCH_SIZE: usize = 20;

    /// Cap on batch workers for constrained (mobile) environments
    pub const MAX_DEFAULT_WORKERS: usize = 8;

    /// A directory with at least this many files is reported as large
    pub const LARGE_DIR_THRESHOLD: usize = 20;

    /// A directory with at least this many files needs batch processing
    pub const REQUIRES_BATCH_THRESHOLD: usize = 50;
}

/// Number of logical cores, falling back to 1 when unknown
pub fn logical_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Default worker count for the task manager
pub fn default_task_workers() -> usize {
    logical_cores()
}

/// Default worker count for the batch runner: min(cores, 8)
pub fn default_batch_workers() -> usize {
    logical_cores().min(batch::MAX_DEFAULT_WORKERS)
}

/// Build the application directory path from a root
pub fn app_dir_path(root: &Path) -> PathBuf {
    root.join(APP_DIR_NAME)
}

/// Build config file path in user's home directory
pub fn user_config_file_path(home_dir: &Path) -> PathBuf {
    app_dir_path(home_dir).join(CONFIG_FILE_NAME)
}

/// Build local config file path in current directory
pub fn local_config_file_path(current_dir: &Path) -> PathBuf {
    app_dir_path(current_dir).join(CONFIG_FILE_NAME)
}
