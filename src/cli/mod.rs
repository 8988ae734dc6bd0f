//! CLI-specific functionality for the agent scheduler
//!
//! This module contains all CLI-related code including argument parsing,
//! configuration discovery and the subcommand handlers.

pub mod args;
pub mod commands;
pub mod config;

pub use args::{Args, DiscoverConfig, ExecutionMode, PlanConfig, ScanConfig};
pub use commands::{ContentHasher, ScanSummary, scan};
pub use config::{ConfigDiscovery, ConfigError, SchedulerConfig};
