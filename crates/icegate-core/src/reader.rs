// Snapshot reconciliation
//
// Lists `<prefix>/_log/`, replays every log file whose timestamp is within
// the as-of bound, and folds markers into the live set. Log files must be
// consumed in key order: tombstones retire markers written before them.

use chrono::Utc;
use futures_util::{stream, StreamExt, TryStreamExt};
use opendal::Operator;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::SnapshotError;
use crate::types::{parse_log_file_name, FileMarker, LogMeta, LogSnapshot, Schema};

/// Keys requested per list page.
pub const LIST_PAGE_SIZE: usize = 1000;

/// Log file bodies are independent, so fetches overlap; reconciliation
/// still happens in key order because `buffered` preserves input order.
const FETCH_CONCURRENCY: usize = 8;

/// Reads the transaction log out of an object store and reconciles it into
/// point-in-time snapshots.
#[derive(Clone)]
pub struct SnapshotReader {
    op: Operator,
}

impl SnapshotReader {
    pub fn new(op: Operator) -> Self {
        Self { op }
    }

    /// Derive the live set for `prefix` as of `as_of_ms`.
    ///
    /// `as_of_ms == 0` means "now". `offset` is an exclusive start key: every
    /// returned path is strictly greater than it. `max_items == 0` disables
    /// the cap.
    pub async fn read_state(
        &self,
        prefix: &str,
        offset: &str,
        as_of_ms: i64,
        max_items: usize,
    ) -> Result<LogSnapshot, SnapshotError> {
        let as_of_ms = if as_of_ms == 0 {
            Utc::now().timestamp_millis()
        } else {
            as_of_ms
        };

        let keys = self.collect_log_keys(prefix, as_of_ms).await?;
        if keys.is_empty() {
            return Err(SnapshotError::NoLogFiles {
                prefix: prefix.to_string(),
            });
        }
        debug!(count = keys.len(), prefix, "collected log files");

        let mut fetches = stream::iter(keys.iter().map(|key| async move {
            let body = self
                .op
                .read(key)
                .await
                .map_err(|source| SnapshotError::Storage {
                    key: key.clone(),
                    source,
                })?;
            Ok::<_, SnapshotError>((key.as_str(), body.to_vec()))
        }))
        .buffered(FETCH_CONCURRENCY);

        let mut schema = Schema::new();
        let mut alive: BTreeMap<String, FileMarker> = BTreeMap::new();
        while let Some((key, body)) = fetches.try_next().await? {
            let (file_schema, markers) = parse_log_file(key, &body)?;
            merge_schema(&mut schema, file_schema)?;
            for marker in markers {
                if marker.is_tombstone() {
                    // Retires the path if it is live; a tombstone for an
                    // unknown path is ignored.
                    alive.remove(&marker.path);
                } else {
                    alive.insert(marker.path.clone(), marker);
                }
            }
        }

        if alive.is_empty() {
            return Err(SnapshotError::NoAliveFiles);
        }

        // BTreeMap iteration gives the total order by path.
        let mut alive_files: Vec<FileMarker> = alive.into_values().collect();

        if !offset.is_empty() {
            let start = alive_files.partition_point(|m| m.path.as_str() <= offset);
            alive_files.drain(..start);
        }

        if max_items > 0 && alive_files.len() > max_items {
            alive_files.truncate(max_items);
        }

        Ok(LogSnapshot {
            alive_files,
            schema,
        })
    }

    /// Page through the listing under `<prefix>/_log/`, keeping keys whose
    /// embedded timestamp is within bound, sorted lexicographically.
    async fn collect_log_keys(
        &self,
        prefix: &str,
        as_of_ms: i64,
    ) -> Result<Vec<String>, SnapshotError> {
        let dir = format!("{prefix}/_log/");
        let mut lister = self
            .op
            .lister_with(&dir)
            .limit(LIST_PAGE_SIZE)
            .await
            .map_err(|source| SnapshotError::Storage {
                key: dir.clone(),
                source,
            })?;

        let mut keys = Vec::new();
        while let Some(entry) = lister
            .try_next()
            .await
            .map_err(|source| SnapshotError::Storage {
                key: dir.clone(),
                source,
            })?
        {
            let key = entry.path();
            if key.ends_with('/') {
                continue;
            }
            let info = parse_log_file_name(key)?;
            if info.timestamp_ms <= as_of_ms {
                if info.merged {
                    debug!(key, "including merged log file");
                }
                keys.push(key.to_string());
            }
        }

        keys.sort_unstable();
        Ok(keys)
    }
}

fn parse_log_file(key: &str, body: &[u8]) -> Result<(Schema, Vec<FileMarker>), SnapshotError> {
    let lines: Vec<&[u8]> = body.split(|b| *b == b'\n').collect();

    let meta: LogMeta = parse_line(key, &lines, 0)?;
    let schema: Schema = parse_line(key, &lines, meta.schema_start_line)?;

    let mut markers = Vec::new();
    for (line, raw) in lines.iter().enumerate().skip(meta.file_marker_start) {
        if raw.is_empty() {
            continue;
        }
        let marker: FileMarker =
            serde_json::from_slice(raw).map_err(|source| SnapshotError::Parse {
                key: key.to_string(),
                line,
                source,
            })?;
        markers.push(marker);
    }

    Ok((schema, markers))
}

fn parse_line<T: DeserializeOwned>(
    key: &str,
    lines: &[&[u8]],
    line: usize,
) -> Result<T, SnapshotError> {
    let raw = lines.get(line).ok_or_else(|| SnapshotError::MissingLine {
        key: key.to_string(),
        line,
    })?;
    serde_json::from_slice(raw).map_err(|source| SnapshotError::Parse {
        key: key.to_string(),
        line,
        source,
    })
}

fn merge_schema(acc: &mut Schema, incoming: Schema) -> Result<(), SnapshotError> {
    for (column, col_type) in incoming {
        match acc.get(&column) {
            Some(existing) if existing != &col_type => {
                return Err(SnapshotError::ColumnTypeCollision {
                    column,
                    existing: existing.clone(),
                    incoming: col_type,
                });
            }
            _ => {
                acc.insert(column, col_type);
            }
        }
    }
    Ok(())
}
