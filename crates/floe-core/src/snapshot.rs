//! Snapshot keys and per-snapshot statistics.
//!
//! Every object the pipeline writes into the ingestion store is addressed by
//! a [`SnapshotKey`]: a logical prefix, the table name and, for transient
//! extraction output, the extraction timestamp.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::fmt;

use crate::error::RecordError;
use crate::record::{self, Record};

/// Timestamp layout used in keys. Sorts lexicographically in time order.
const KEY_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%6fZ";

/// Render a timestamp the way keys embed it.
pub fn key_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(KEY_TIMESTAMP_FORMAT).to_string()
}

/// Parse a key-embedded timestamp.
pub fn parse_key_timestamp(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, KEY_TIMESTAMP_FORMAT)
        .ok()
        .map(|dt| dt.and_utc())
}

/// Logical namespace of a snapshot object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnapshotPrefix {
    /// First full extraction of a table.
    Baseline,
    /// Incremental extraction output, pre-dedup.
    Updated,
    /// Normalized incremental input for the merger.
    Staging,
    /// Current merged state, one object per table.
    Latest,
    /// Consumed `updated/` objects after processing.
    ProcessedUpdated,
    /// Alternate relocation target for consumed objects.
    Archived,
}

impl SnapshotPrefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotPrefix::Baseline => "baseline",
            SnapshotPrefix::Updated => "updated",
            SnapshotPrefix::Staging => "staging",
            SnapshotPrefix::Latest => "latest",
            SnapshotPrefix::ProcessedUpdated => "processed_updated",
            SnapshotPrefix::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "baseline" => SnapshotPrefix::Baseline,
            "updated" => SnapshotPrefix::Updated,
            "staging" => SnapshotPrefix::Staging,
            "latest" => SnapshotPrefix::Latest,
            "processed_updated" => SnapshotPrefix::ProcessedUpdated,
            "archived" => SnapshotPrefix::Archived,
            _ => return None,
        })
    }

    /// Baseline and latest objects are durable state and must never be
    /// removed by cleanup stages.
    pub fn is_protected(&self) -> bool {
        matches!(self, SnapshotPrefix::Baseline | SnapshotPrefix::Latest)
    }
}

impl fmt::Display for SnapshotPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed storage key of a snapshot object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotKey {
    pub prefix: SnapshotPrefix,
    pub table: String,
    pub extracted_at: Option<DateTime<Utc>>,
}

impl SnapshotKey {
    /// `<prefix>/<table>.json`
    pub fn canonical(prefix: SnapshotPrefix, table: impl Into<String>) -> Self {
        Self {
            prefix,
            table: table.into(),
            extracted_at: None,
        }
    }

    /// `<prefix>/<table>-<timestamp>.json`
    pub fn timestamped(
        prefix: SnapshotPrefix,
        table: impl Into<String>,
        extracted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            prefix,
            table: table.into(),
            extracted_at: Some(extracted_at),
        }
    }

    pub fn baseline(table: impl Into<String>) -> Self {
        Self::canonical(SnapshotPrefix::Baseline, table)
    }

    pub fn latest(table: impl Into<String>) -> Self {
        Self::canonical(SnapshotPrefix::Latest, table)
    }

    pub fn staging(table: impl Into<String>) -> Self {
        Self::canonical(SnapshotPrefix::Staging, table)
    }

    pub fn updated(table: impl Into<String>, extracted_at: DateTime<Utc>) -> Self {
        Self::timestamped(SnapshotPrefix::Updated, table, extracted_at)
    }

    /// Parse a storage key back into its parts.
    ///
    /// Returns `None` for keys outside the snapshot layout (temp files,
    /// foreign objects, unknown prefixes).
    pub fn parse(key: &str) -> Option<Self> {
        let (prefix, file) = key.split_once('/')?;
        let prefix = SnapshotPrefix::parse(prefix)?;
        let stem = file.strip_suffix(".json")?;
        if stem.is_empty() || stem.contains('/') {
            return None;
        }

        let timestamped = stem
            .rsplit_once('-')
            .and_then(|(table, ts)| Some((table, parse_key_timestamp(ts)?)));
        match timestamped {
            Some((table, extracted_at)) => Some(Self::timestamped(prefix, table, extracted_at)),
            None => Some(Self::canonical(prefix, stem)),
        }
    }

    /// The file name part alone, e.g. `staff-20240101T000000000000Z.json`.
    pub fn file_name(&self) -> String {
        match self.extracted_at {
            Some(ts) => format!("{}-{}.json", self.table, key_timestamp(ts)),
            None => format!("{}.json", self.table),
        }
    }

    /// Same file, different namespace.
    pub fn with_prefix(&self, prefix: SnapshotPrefix) -> Self {
        Self {
            prefix,
            ..self.clone()
        }
    }
}

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.prefix, self.file_name())
    }
}

/// Statistics derived from a snapshot's bytes and contents.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotStats {
    pub size: u64,
    pub record_count: usize,
    pub max_pk: Option<i64>,
    pub max_last_updated: Option<DateTime<Utc>>,
}

impl SnapshotStats {
    /// Compute statistics for a snapshot of `table`.
    pub fn from_bytes(table: &str, bytes: &[u8]) -> Result<Self, RecordError> {
        let records = record::parse_records(bytes)?;
        Ok(Self::from_records(table, bytes.len() as u64, &records))
    }

    pub fn from_records(table: &str, size: u64, records: &[Record]) -> Self {
        Self {
            size,
            record_count: records.len(),
            max_pk: records
                .iter()
                .filter_map(|r| record::primary_key(r, table).ok())
                .max(),
            max_last_updated: record::max_last_updated(records),
        }
    }

    /// An empty snapshot signals "checked, nothing new" and carries no data.
    pub fn is_empty(&self) -> bool {
        self.record_count == 0
    }
}
