// icegate-core - Transaction log reader and snapshot reconciler
//
// Replays the append-only JSON log a tenant keeps under `<prefix>/_log/`
// and derives the set of data files that are live at a point in time.
// This crate never writes to the log; it only reads.

mod error;
mod reader;
mod types;

pub use error::SnapshotError;
pub use reader::{SnapshotReader, LIST_PAGE_SIZE};
pub use types::{parse_log_file_name, FileMarker, LogFileName, LogMeta, LogSnapshot, Schema};
