//! Integration tests for CLI functionality
//!
//! These tests verify that the different CLI components work together properly.
//! Unit tests for individual functions are located in the respective module files.

use agent_scheduler::cli::{Args, ExecutionMode, SchedulerConfig, scan};
use agent_scheduler::{BatchConfig, TaskManagerConfig, TaskStatus};
use clap::Parser;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_scan_arguments_resolve_to_mode() {
    let args = Args::try_parse_from([
        "agent-scheduler",
        "--config",
        "custom.toml",
        "scan",
        "photos",
        "docs",
        "--workers",
        "3",
    ])
    .unwrap();

    match args.mode().unwrap() {
        ExecutionMode::Scan(config) => {
            assert_eq!(config.dirs.len(), 2);
            assert_eq!(config.workers, Some(3));
            assert_eq!(config.batch_size, None);
        }
        other => panic!("Expected Scan mode, got {:?}", other),
    }
}

#[tokio::test]
async fn test_scan_end_to_end_with_config_file() {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("data");
    fs::create_dir_all(data_dir.join("nested")).unwrap();

    for i in 0..25 {
        fs::write(data_dir.join(format!("entry-{}.log", i)), format!("line {}", i)).unwrap();
    }
    fs::write(data_dir.join("nested/cover.png"), [0x89, b'P', b'N', b'G']).unwrap();

    let config_path = temp_dir.path().join("agent-scheduler.toml");
    fs::write(
        &config_path,
        "[task_manager]\nmax_concurrent = 2\n\n[batch]\nworkers = 2\nbatch_size = 10\n",
    )
    .unwrap();
    let settings = SchedulerConfig::from_toml_file(&config_path).unwrap();

    let summary = scan(
        vec![data_dir.clone()],
        settings.task_manager,
        settings.batch,
    )
    .await
    .unwrap();

    assert_eq!(summary.task.status, TaskStatus::Completed);
    assert_eq!(summary.task.progress, 100.0);
    assert_eq!(summary.report.total, 26);
    assert_eq!(summary.report.processed, 26);
    assert_eq!(summary.report.batches, 3);
    assert!(summary.report.max_concurrent_batches <= 2);
    assert_eq!(summary.digests.len(), 26);
    assert_eq!(
        summary.digests.get(&data_dir.join("nested/cover.png")),
        Some(&blake3::hash(&[0x89, b'P', b'N', b'G']).to_hex().to_string())
    );
}

#[tokio::test]
async fn test_scan_missing_directory_fails() {
    let temp_dir = TempDir::new().unwrap();
    let result = scan(
        vec![temp_dir.path().join("missing")],
        TaskManagerConfig::default(),
        BatchConfig::default(),
    )
    .await;

    let err = result.unwrap_err();
    assert!(err.to_string().contains("Directory not found"));
}
