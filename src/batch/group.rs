use crate::batch::file::FileDescriptor;
use crate::env;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;

/// A contiguous slice of the priority-ordered file list
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Batch {
    /// Zero-based position in dispatch order
    pub index: usize,
    pub files: Vec<FileDescriptor>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|file| file.size).sum()
    }
}

/// Order files by descending priority (newest first on ties) and cut them
/// into batches of `batch_size`. A zero size uses the default.
pub fn group_files(
    mut files: Vec<FileDescriptor>,
    batch_size: usize,
    now: DateTime<Utc>,
) -> Vec<Batch> {
    let batch_size = effective_batch_size(batch_size);

    files.sort_by_cached_key(|file| (Reverse(file.priority_at(now)), Reverse(file.modified)));

    let mut batches = Vec::with_capacity(files.len().div_ceil(batch_size));
    let mut remaining = files.into_iter().peekable();
    while remaining.peek().is_some() {
        let files: Vec<_> = remaining.by_ref().take(batch_size).collect();
        batches.push(Batch {
            index: batches.len(),
            files,
        });
    }
    batches
}

pub(crate) fn effective_batch_size(batch_size: usize) -> usize {
    if batch_size == 0 {
        env::batch::DEFAULT_BATCH_SIZE
    } else {
        batch_size
    }
}
