//! File priority scoring.
//!
//! The score favours small, recently modified text documents. It is a pure
//! function of its inputs so grouping is reproducible for a fixed `now`.

use crate::batch::file::FileKind;
use chrono::{DateTime, Duration, Utc};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;

/// Score a file: base weight by kind, then size and recency adjustments
pub fn priority_score(
    kind: FileKind,
    size: u64,
    modified: DateTime<Utc>,
    now: DateTime<Utc>,
) -> i32 {
    base_weight(kind) + size_adjustment(size) + recency_bonus(modified, now)
}

fn base_weight(kind: FileKind) -> i32 {
    match kind {
        FileKind::Text => 10,
        FileKind::Pdf => 8,
        FileKind::Image => 6,
        FileKind::Audio | FileKind::Video | FileKind::Other => 3,
    }
}

fn size_adjustment(size: u64) -> i32 {
    match size {
        s if s < KIB => 1,
        s if s < MIB => 3,
        s if s < 10 * MIB => 2,
        _ => -1,
    }
}

fn recency_bonus(modified: DateTime<Utc>, now: DateTime<Utc>) -> i32 {
    // Negative ages (clock skew, future mtimes) count as recent.
    let age = now.signed_duration_since(modified);
    if age < Duration::weeks(1) {
        2
    } else if age < Duration::weeks(4) {
        1
    } else {
        0
    }
}
