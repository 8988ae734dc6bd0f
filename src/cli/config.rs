//! Configuration discovery and loading
//!
//! This module handles the configuration discovery hierarchy:
//! 1. Current directory: ./agent-scheduler.toml or ./.agent-scheduler/config.toml
//! 2. User config: ~/.agent-scheduler/config.toml
//! 3. System config: /etc/agent-scheduler/config.toml
//! 4. Built-in defaults

use crate::{batch::BatchConfig, env, task::TaskManagerConfig};
use serde::{Deserialize, Serialize};
use std::env as std_env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Everything the binary reads from a config file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub task_manager: TaskManagerConfig,
    pub batch: BatchConfig,
}

impl SchedulerConfig {
    /// Load from TOML file; missing keys take their defaults
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save to TOML file
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = self.to_toml_string()?;
        fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Configuration discovery system
pub struct ConfigDiscovery;

impl ConfigDiscovery {
    /// Load an explicit file, or discover one using the hierarchy
    pub fn load(explicit: Option<&Path>) -> Result<SchedulerConfig, ConfigError> {
        match explicit {
            Some(path) => {
                info!("Loading configuration override from: {:?}", path);
                SchedulerConfig::from_toml_file(path)
            }
            None => Self::discover_config(),
        }
    }

    /// Discover and load configuration using the hierarchy
    pub fn discover_config() -> Result<SchedulerConfig, ConfigError> {
        if let Some(config_path) = Self::find_config_file() {
            info!("Loading configuration from: {:?}", config_path);
            return SchedulerConfig::from_toml_file(config_path);
        }

        info!("No configuration file found, using defaults");
        Ok(SchedulerConfig::default())
    }

    /// Find configuration file using discovery hierarchy
    pub fn find_config_file() -> Option<PathBuf> {
        for candidate in Self::get_config_candidates() {
            debug!("Checking for config file: {:?}", candidate);
            if candidate.is_file() {
                debug!("Found config file: {:?}", candidate);
                return Some(candidate);
            }
        }

        debug!("No config file found in discovery hierarchy");
        None
    }

    /// Configuration file candidates in priority order
    pub fn get_config_candidates() -> Vec<PathBuf> {
        let current_dir = std_env::current_dir().ok();
        Self::candidates_for(current_dir.as_deref(), Self::get_home_dir().as_deref())
    }

    fn candidates_for(current_dir: Option<&Path>, home_dir: Option<&Path>) -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        if let Some(current_dir) = current_dir {
            candidates.push(current_dir.join(env::LOCAL_CONFIG_FILE_NAME));
            candidates.push(env::local_config_file_path(current_dir));
        }

        if let Some(home_dir) = home_dir {
            candidates.push(env::user_config_file_path(home_dir));
        }

        #[cfg(unix)]
        candidates.push(PathBuf::from(env::SYSTEM_CONFIG_FILE));

        candidates
    }

    fn get_home_dir() -> Option<PathBuf> {
        std_env::var("HOME")
            .ok()
            .or_else(|| std_env::var("USERPROFILE").ok())
            .map(PathBuf::from)
    }

    /// Print the discovery hierarchy and which file is active
    pub fn show_discovery_info() {
        println!("Configuration Discovery Hierarchy:");
        println!();

        for (i, candidate) in Self::get_config_candidates().iter().enumerate() {
            let status = if candidate.is_file() {
                "✓ EXISTS"
            } else if candidate.exists() {
                "✗ NOT A FILE"
            } else {
                "✗ NOT FOUND"
            };
            println!("  {}. {:?} - {}", i + 1, candidate, status);
        }

        println!();
        match Self::find_config_file() {
            Some(found) => println!("Active configuration: {:?}", found),
            None => println!("Active configuration: Built-in defaults"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::DispatchOrder;
    use tempfile::TempDir;

    #[test]
    fn test_config_serialization() {
        let config = SchedulerConfig::default();
        let toml_string = config.to_toml_string().unwrap();
        assert!(toml_string.contains("[task_manager]"));
        assert!(toml_string.contains("[batch]"));

        let deserialized: SchedulerConfig = toml::from_str(&toml_string).unwrap();
        assert_eq!(deserialized.batch, config.batch);
        assert_eq!(
            deserialized.task_manager.queue_size,
            config.task_manager.queue_size
        );
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("partial.toml");
        fs::write(
            &config_path,
            concat!(
                "[task_manager]\n",
                "max_concurrent = 3\n",
                "dispatch_order = \"priority\"\n",
                "\n",
                "[batch]\n",
                "batch_size = 5\n",
            ),
        )
        .unwrap();

        let config = SchedulerConfig::from_toml_file(&config_path).unwrap();
        assert_eq!(config.task_manager.max_concurrent, 3);
        assert_eq!(config.task_manager.dispatch_order, DispatchOrder::Priority);
        assert_eq!(config.task_manager.max_retries, 3);
        assert_eq!(config.batch.batch_size, 5);
        assert!(!config.batch.stop_batch_on_error);
    }

    #[test]
    fn test_invalid_file_reports_path() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("broken.toml");
        fs::write(&config_path, "[task_manager\nmax_concurrent = ").unwrap();

        let err = SchedulerConfig::from_toml_file(&config_path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("broken.toml"));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = SchedulerConfig::from_toml_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_config_candidates_order() {
        let candidates = ConfigDiscovery::candidates_for(
            Some(Path::new("/work")),
            Some(Path::new("/home/user")),
        );

        assert_eq!(candidates[0], PathBuf::from("/work/agent-scheduler.toml"));
        assert_eq!(
            candidates[1],
            PathBuf::from("/work/.agent-scheduler/config.toml")
        );
        assert_eq!(
            candidates[2],
            PathBuf::from("/home/user/.agent-scheduler/config.toml")
        );
        #[cfg(unix)]
        assert_eq!(
            candidates[3],
            PathBuf::from("/etc/agent-scheduler/config.toml")
        );
    }
}
