// Log file wire format
//
// A log file is newline-delimited JSON: line 0 is the meta record, the line
// at `sch` is the schema object, and every line from `f` onward is a file
// marker. File names look like `<ts_ms>[_m]_<rand>.jsonl`; the fixed-width
// millisecond timestamp makes lexicographic key order chronological.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::SnapshotError;

/// First line of every log file. Points at where the schema and the file
/// markers start within the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogMeta {
    #[serde(rename = "v")]
    pub version: u32,

    #[serde(rename = "t")]
    pub timestamp_ms: i64,

    /// Line index of the schema record.
    #[serde(rename = "sch")]
    pub schema_start_line: usize,

    /// Line index of the first file marker.
    #[serde(rename = "f", default)]
    pub file_marker_start: usize,

    /// Reserved by the log format; not consumed by the reader.
    #[serde(rename = "tmb", default, skip_serializing_if = "Option::is_none")]
    pub tombstone_start: Option<usize>,
}

/// Column name to column type. BTreeMap keeps unification deterministic.
pub type Schema = BTreeMap<String, String>;

/// One log record declaring a data file, or retiring one when `tmb` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMarker {
    #[serde(rename = "p")]
    pub path: String,

    #[serde(rename = "b", default)]
    pub byte_length: u64,

    #[serde(rename = "t")]
    pub timestamp_ms: i64,

    /// Any value here marks this as a tombstone for `path`.
    #[serde(rename = "tmb", default, skip_serializing_if = "Option::is_none")]
    pub tombstone: Option<serde_json::Value>,
}

impl FileMarker {
    pub fn is_tombstone(&self) -> bool {
        self.tombstone.is_some()
    }
}

/// The reconciled view of a tenant's log at a chosen timestamp: the files
/// that are live, ordered by path, and the unified schema.
#[derive(Debug, Clone, Default)]
pub struct LogSnapshot {
    pub alive_files: Vec<FileMarker>,
    pub schema: Schema,
}

/// Parsed pieces of a log file key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogFileName {
    pub timestamp_ms: i64,
    /// Set when the file was produced by a merge (compaction) pass.
    pub merged: bool,
}

/// Parse `<ts_ms>[_m]_<rand>.jsonl` out of a full object key.
pub fn parse_log_file_name(key: &str) -> Result<LogFileName, SnapshotError> {
    let file_name = key.rsplit('/').next().unwrap_or(key);
    let mut parts = file_name.split('_');

    let timestamp_ms = parts
        .next()
        .and_then(|ts| ts.parse::<i64>().ok())
        .ok_or_else(|| SnapshotError::FileName {
            key: key.to_string(),
        })?;

    let merged = parts.next() == Some("m");

    Ok(LogFileName {
        timestamp_ms,
        merged,
    })
}
