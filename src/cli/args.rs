//! Command line argument parsing
//!
//! This module handles CLI argument parsing with subcommands:
//! - `discover`: Walk directories and print a summary of what was found
//! - `plan`: Show how discovered files would be grouped into batches
//! - `scan`: Hash every discovered file through the task manager and batch runner
//! - `show-config`: Show configuration discovery information

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, PartialEq)]
pub enum ExecutionMode {
    Discover(DiscoverConfig),
    Plan(PlanConfig),
    Scan(ScanConfig),
    ShowConfig,
}

#[derive(Debug, PartialEq)]
pub struct DiscoverConfig {
    pub dirs: Vec<PathBuf>,
    pub hash: bool,
    pub json: bool,
}

#[derive(Debug, PartialEq)]
pub struct PlanConfig {
    pub dirs: Vec<PathBuf>,
    pub batch_size: Option<usize>,
    pub json: bool,
}

#[derive(Debug, PartialEq)]
pub struct ScanConfig {
    pub dirs: Vec<PathBuf>,
    pub workers: Option<usize>,
    pub batch_size: Option<usize>,
    pub stop_on_error: bool,
    pub json: bool,
}

#[derive(Debug, Parser)]
#[command(name = "agent-scheduler")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Background task scheduler with priority-based file batching")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    /// Configuration file path (skips discovery)
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,
    /// Enable verbose (debug) logging
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Walk directories and print file statistics
    Discover {
        /// Directories to scan
        #[arg(required = true)]
        dirs: Vec<PathBuf>,
        /// Compute content hashes while walking
        #[arg(long = "hash")]
        hash: bool,
        /// Print the full report as JSON
        #[arg(long = "json")]
        json: bool,
    },
    /// Print the priority-ordered batches for the discovered files
    Plan {
        /// Directories to scan
        #[arg(required = true)]
        dirs: Vec<PathBuf>,
        /// Files per batch
        #[arg(short = 'b', long = "batch-size")]
        batch_size: Option<usize>,
        /// Print the batches as JSON
        #[arg(long = "json")]
        json: bool,
    },
    /// Hash every discovered file using the batch runner inside a managed task
    Scan {
        /// Directories to scan
        #[arg(required = true)]
        dirs: Vec<PathBuf>,
        /// Maximum concurrent batches
        #[arg(short = 'w', long = "workers")]
        workers: Option<usize>,
        /// Files per batch
        #[arg(short = 'b', long = "batch-size")]
        batch_size: Option<usize>,
        /// Stop a batch at its first failing file
        #[arg(long = "stop-on-error")]
        stop_on_error: bool,
        /// Print the final report as JSON
        #[arg(long = "json")]
        json: bool,
    },
    /// Show configuration discovery information
    ShowConfig,
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }

    pub fn mode(&self) -> Result<ExecutionMode, String> {
        match &self.command {
            Some(Commands::Discover { dirs, hash, json }) => {
                Ok(ExecutionMode::Discover(DiscoverConfig {
                    dirs: dirs.clone(),
                    hash: *hash,
                    json: *json,
                }))
            }
            Some(Commands::Plan {
                dirs,
                batch_size,
                json,
            }) => Ok(ExecutionMode::Plan(PlanConfig {
                dirs: dirs.clone(),
                batch_size: positive("--batch-size", *batch_size)?,
                json: *json,
            })),
            Some(Commands::Scan {
                dirs,
                workers,
                batch_size,
                stop_on_error,
                json,
            }) => Ok(ExecutionMode::Scan(ScanConfig {
                dirs: dirs.clone(),
                workers: positive("--workers", *workers)?,
                batch_size: positive("--batch-size", *batch_size)?,
                stop_on_error: *stop_on_error,
                json: *json,
            })),
            Some(Commands::ShowConfig) => Ok(ExecutionMode::ShowConfig),
            None => Err(
                "No command specified. Use 'agent-scheduler --help' to see available commands."
                    .to_string(),
            ),
        }
    }
}

fn positive(flag: &str, value: Option<usize>) -> Result<Option<usize>, String> {
    match value {
        Some(0) => Err(format!("{} must be greater than zero", flag)),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_discover_command() {
        let args = parse(&["agent-scheduler", "discover", "/tmp/a", "/tmp/b", "--json"]);
        assert_eq!(
            args.mode().unwrap(),
            ExecutionMode::Discover(DiscoverConfig {
                dirs: vec![PathBuf::from("/tmp/a"), PathBuf::from("/tmp/b")],
                hash: false,
                json: true,
            })
        );
    }

    #[test]
    fn test_scan_command_with_options() {
        let args = parse(&[
            "agent-scheduler",
            "-v",
            "scan",
            "./data",
            "--workers",
            "4",
            "-b",
            "10",
            "--stop-on-error",
        ]);
        assert!(args.verbose);

        match args.mode().unwrap() {
            ExecutionMode::Scan(config) => {
                assert_eq!(config.dirs, vec![PathBuf::from("./data")]);
                assert_eq!(config.workers, Some(4));
                assert_eq!(config.batch_size, Some(10));
                assert!(config.stop_on_error);
                assert!(!config.json);
            }
            other => panic!("Expected Scan mode, got {:?}", other),
        }
    }

    #[test]
    fn test_global_config_after_subcommand() {
        let args = parse(&["agent-scheduler", "plan", "dir", "--config", "custom.toml"]);
        assert_eq!(args.config, Some(PathBuf::from("custom.toml")));
        assert!(matches!(args.mode().unwrap(), ExecutionMode::Plan(_)));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let args = parse(&["agent-scheduler", "plan", "dir", "--batch-size", "0"]);
        let err = args.mode().unwrap_err();
        assert!(err.contains("--batch-size"));
    }

    #[test]
    fn test_directories_are_required() {
        assert!(Args::try_parse_from(["agent-scheduler", "scan"]).is_err());
    }

    #[test]
    fn test_show_config_command() {
        let args = parse(&["agent-scheduler", "show-config"]);
        assert_eq!(args.mode().unwrap(), ExecutionMode::ShowConfig);
    }

    #[test]
    fn test_no_command() {
        let args = Args {
            config: None,
            verbose: false,
            command: None,
        };
        assert!(args.mode().is_err());
    }
}
