use std::path::PathBuf;
use chrono::{DateTime, Utc};

/// How a view's newly observed shard set is combined with the roster already
/// on disk at commit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterMerge {
    /// Extend the roster with the new shards.
    Union,
    /// Keep only shards named by the new commit. Shards absent from the
    /// commit drop out of the roster and become invisible to readers.
    Intersect,
}

/// Interpretation of a record's raw timestamp integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeFormat {
    Millis,
    Nanos,
}

impl TimeFormat {
    pub fn to_datetime(&self, raw: i64) -> Option<DateTime<Utc>> {
        match self {
            TimeFormat::Millis => DateTime::from_timestamp_millis(raw),
            TimeFormat::Nanos => Some(DateTime::from_timestamp_nanos(raw)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub storage_path: PathBuf,

    // Shard cache sizing
    pub cache_cost_limit: u64,                 // Aggregate open-handle bytes
    pub cache_admit_retries: usize,            // Attempts before giving up on caching a handle

    // Write-commit behavior
    pub roster_merge: RosterMerge,
    pub time_format: TimeFormat,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage_path: PathBuf::from("./data"),
            cache_cost_limit: 256 * 1024 * 1024,   // 256MB of open shard handles
            cache_admit_retries: 3,
            roster_merge: RosterMerge::Union,
            time_format: TimeFormat::Millis,
        }
    }
}
