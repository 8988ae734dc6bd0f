//! Recursive file discovery with per-directory statistics.

use crate::batch::file::{FileDescriptor, FileKind, hash_file};
use crate::env;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Directory not found: {0}")]
    NotFound(PathBuf),

    #[error("IO error while scanning {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Knobs for a discovery walk
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct DiscoveryOptions {
    /// Compute a blake3 digest of each file's contents
    pub compute_hashes: bool,
    pub follow_links: bool,
    /// Unlimited when unset
    pub max_depth: Option<usize>,
}

/// Per-root counts. Audio and video count as "other".
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct DirectoryStats {
    pub path: PathBuf,
    pub total_files: usize,
    pub text_files: usize,
    pub pdf_files: usize,
    pub image_files: usize,
    pub other_files: usize,
    pub total_size: u64,
    pub is_large_dir: bool,
    pub requires_batch: bool,
}

/// Files and statistics for one or more roots
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct DiscoveryReport {
    pub files: Vec<FileDescriptor>,
    pub directories: Vec<DirectoryStats>,
}

impl DirectoryStats {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            ..Default::default()
        }
    }

    fn record(&mut self, file: &FileDescriptor) {
        match file.kind {
            FileKind::Text => self.text_files += 1,
            FileKind::Pdf => self.pdf_files += 1,
            FileKind::Image => self.image_files += 1,
            FileKind::Audio | FileKind::Video | FileKind::Other => self.other_files += 1,
        }
        self.total_files += 1;
        self.total_size += file.size;
    }

    fn finalize(&mut self) {
        self.is_large_dir = self.total_files >= env::batch::LARGE_DIR_THRESHOLD;
        self.requires_batch = self.total_files >= env::batch::REQUIRES_BATCH_THRESHOLD;
    }
}

/// Walk one directory tree. Unreadable entries are skipped with a warning.
pub fn discover_directory(
    dir: &Path,
    options: &DiscoveryOptions,
) -> Result<(Vec<FileDescriptor>, DirectoryStats), DiscoveryError> {
    match std::fs::metadata(dir) {
        Ok(metadata) if metadata.is_dir() => {}
        Ok(_) => return Err(DiscoveryError::NotFound(dir.to_path_buf())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(DiscoveryError::NotFound(dir.to_path_buf()));
        }
        Err(source) => {
            return Err(DiscoveryError::Io {
                path: dir.to_path_buf(),
                source,
            });
        }
    }

    let mut walker = WalkDir::new(dir).follow_links(options.follow_links);
    if let Some(depth) = options.max_depth {
        walker = walker.max_depth(depth);
    }

    let mut files = Vec::new();
    let mut stats = DirectoryStats::new(dir);

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", dir.display(), e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let mut file = match FileDescriptor::from_path(path) {
            Ok(file) => file,
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };

        if options.compute_hashes {
            match hash_file(path) {
                Ok(hash) => file = file.with_content_hash(hash),
                Err(e) => debug!("Could not hash {}: {}", path.display(), e),
            }
        }

        stats.record(&file);
        files.push(file);
    }

    stats.finalize();
    info!(
        "Directory scan complete: {} ({} files, large={}, requires_batch={})",
        dir.display(),
        stats.total_files,
        stats.is_large_dir,
        stats.requires_batch
    );

    Ok((files, stats))
}

/// Walk several roots and aggregate the results
pub fn discover<P: AsRef<Path>>(
    dirs: &[P],
    options: &DiscoveryOptions,
) -> Result<DiscoveryReport, DiscoveryError> {
    let mut report = DiscoveryReport::default();
    for dir in dirs {
        let (files, stats) = discover_directory(dir.as_ref(), options)?;
        report.files.extend(files);
        report.directories.push(stats);
    }
    Ok(report)
}

/// Human readable summary of a discovery run
pub fn directory_summary(stats: &[DirectoryStats]) -> String {
    let total_files: usize = stats.iter().map(|s| s.total_files).sum();
    let total_size: u64 = stats.iter().map(|s| s.total_size).sum();
    let large_dirs = stats.iter().filter(|s| s.is_large_dir).count();
    let batch_dirs = stats.iter().filter(|s| s.requires_batch).count();

    format!(
        "Directory Scan Summary:\n\
         ========================\n\
         Total Directories: {}\n\
         Total Files: {}\n\
         Total Size: {:.2} MB\n\
         Large Directories (≥{} files): {}\n\
         Directories Requiring Batch Processing (≥{} files): {}",
        stats.len(),
        total_files,
        total_size as f64 / 1024.0 / 1024.0,
        env::batch::LARGE_DIR_THRESHOLD,
        large_dirs,
        env::batch::REQUIRES_BATCH_THRESHOLD,
        batch_dirs
    )
}
