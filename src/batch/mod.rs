//! Priority-based file batching pipeline
//!
//! This module provides:
//! - File discovery with per-directory statistics
//! - A pure priority score for each file
//! - Grouping into fixed-size batches ordered by priority
//! - A runner that processes batches with bounded concurrency

pub mod discovery;
pub mod file;
pub mod group;
pub mod priority;
pub mod runner;

pub use discovery::{
    DirectoryStats, DiscoveryError, DiscoveryOptions, DiscoveryReport, directory_summary,
    discover, discover_directory,
};
pub use file::{FileDescriptor, FileKind, hash_file};
pub use group::{Batch, group_files};
pub use priority::priority_score;
pub use runner::{
    BatchConfig, BatchError, BatchProgressCallback, BatchReport, BatchRunner, FileFailure,
    FileProcessor,
};
