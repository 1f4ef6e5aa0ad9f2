// Error taxonomy for snapshot reconciliation
//
// NoLogFiles and NoAliveFiles are distinct: the former means the listing
// produced zero candidate log files, the latter means every marker was
// retired by a tombstone. The gateway treats both as an empty listing.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("no log files found under {prefix}")]
    NoLogFiles { prefix: String },

    #[error("no alive files")]
    NoAliveFiles,

    /// Two log files disagree on a column's type. The log is corrupt for
    /// this prefix; the request cannot be retried.
    #[error("column {column} type collision: {existing} vs {incoming}")]
    ColumnTypeCollision {
        column: String,
        existing: String,
        incoming: String,
    },

    #[error("malformed log file name: {key}")]
    FileName { key: String },

    #[error("log file {key} is truncated: line {line} missing")]
    MissingLine { key: String, line: usize },

    #[error("malformed record at line {line} of {key}")]
    Parse {
        key: String,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("storage error for {key}")]
    Storage {
        key: String,
        #[source]
        source: opendal::Error,
    },
}

impl SnapshotError {
    /// Both "empty" outcomes, which callers usually collapse into an empty
    /// result set.
    pub fn is_empty_snapshot(&self) -> bool {
        matches!(
            self,
            SnapshotError::NoLogFiles { .. } | SnapshotError::NoAliveFiles
        )
    }
}
