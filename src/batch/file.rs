use crate::batch::priority::priority_score;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

/// Coarse file classification used for scoring and statistics
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Text,
    Pdf,
    Image,
    Audio,
    Video,
    Other,
}

/// A discovered file, ready to be scored and processed
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FileDescriptor {
    pub path: PathBuf,
    pub filename: String,
    /// Lowercase extension without the dot, empty when absent
    pub extension: String,
    pub kind: FileKind,
    pub size: u64,
    pub modified: DateTime<Utc>,
    /// Hex blake3 digest, only present when hashing was requested
    pub content_hash: Option<String>,
}

impl FileKind {
    /// Classify a lowercase extension
    pub fn from_extension(extension: &str) -> Self {
        match extension {
            "jpg" | "jpeg" | "png" | "gif" | "bmp" | "webp" => FileKind::Image,
            "pdf" => FileKind::Pdf,
            "mp3" | "wav" | "flac" | "m4a" | "ogg" => FileKind::Audio,
            "mp4" | "mkv" | "avi" | "mov" | "wmv" => FileKind::Video,
            "txt" | "md" | "log" | "csv" | "json" | "xml" | "html" | "htm" | "go" | "py" | "js"
            | "ts" | "c" | "cpp" | "h" | "cs" | "java" | "sh" | "rs" => FileKind::Text,
            _ => FileKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Text => "text",
            FileKind::Pdf => "pdf",
            FileKind::Image => "image",
            FileKind::Audio => "audio",
            FileKind::Video => "video",
            FileKind::Other => "other",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FileDescriptor {
    /// Build a descriptor from in-memory facts, classifying by extension
    pub fn new(path: impl Into<PathBuf>, size: u64, modified: DateTime<Utc>) -> Self {
        let path = path.into();
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let kind = FileKind::from_extension(&extension);

        Self {
            path,
            filename,
            extension,
            kind,
            size,
            modified,
            content_hash: None,
        }
    }

    /// Read size and modification time from the filesystem
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        let modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        Ok(Self::new(path, metadata.len(), modified))
    }

    pub fn with_content_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }

    /// Priority score relative to `now`
    pub fn priority_at(&self, now: DateTime<Utc>) -> i32 {
        priority_score(self.kind, self.size, self.modified, now)
    }
}

/// Streamed blake3 digest of a file's contents, hex encoded
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut hasher = blake3::Hasher::new();
    let mut file = File::open(path)?;
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}
