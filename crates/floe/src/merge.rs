//! Folding new snapshot records into the per-table latest state.
//!
//! The rule is append-only and keyed on the monotonically increasing
//! `<table>_id`: a staging record is appended only when its key is greater
//! than every key already in latest. Existing records are never touched, so
//! re-applying a staging snapshot is a no-op.

use snafu::prelude::*;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use floe_core::emit;
use floe_core::metrics::events::{RecordSkipped, RecordsMerged, SnapshotSkipped, Stage};
use floe_core::record::{self, Record};
use floe_core::snapshot::{SnapshotKey, SnapshotPrefix};
use floe_core::{StorageError, StorageProvider, StorageProviderRef};

use crate::error::{MergeError, MergeInputSnafu, MergeStageError, MergeStorageSnafu};

/// Result of merging one staging record set.
#[derive(Debug, Default)]
pub struct MergeOutcome {
    /// The new latest record set.
    pub records: Vec<Record>,
    /// Number of staging records appended.
    pub appended: usize,
    /// Staging records dropped as data faults.
    pub skipped: Vec<MergeError>,
}

/// Merge `staging` into `latest` for `table`.
///
/// Appends a staging record iff its primary key is greater than the largest
/// key in `latest` before the call. A key occurring twice in `staging` is
/// appended once.
pub fn merge(table: &str, staging: &[Record], latest: Vec<Record>) -> MergeOutcome {
    let max_id = latest
        .iter()
        .filter_map(|r| record::primary_key(r, table).ok())
        .max();

    let mut records = latest;
    let mut appended_ids = HashSet::new();
    let mut skipped = Vec::new();

    for row in staging {
        let id = match record::primary_key(row, table) {
            Ok(id) => id,
            Err(source) => {
                skipped.push(MergeError::InvalidRecord {
                    table: table.to_string(),
                    source,
                });
                continue;
            }
        };

        let is_new = max_id.is_none_or(|max| id > max);
        if is_new && appended_ids.insert(id) {
            records.push(row.clone());
        }
    }

    MergeOutcome {
        appended: appended_ids.len(),
        records,
        skipped,
    }
}

/// Copy `baseline/<table>.json` to `latest/<table>.json` when latest is absent.
///
/// Returns whether a copy was made.
pub async fn seed_latest(storage: &StorageProvider, table: &str) -> Result<bool, StorageError> {
    let latest = SnapshotKey::latest(table).to_string();
    if storage.exists(&latest).await? {
        return Ok(false);
    }

    let baseline = SnapshotKey::baseline(table).to_string();
    match storage.copy(&baseline, &latest).await {
        Ok(()) => {
            info!(table, from = %baseline, to = %latest, "Seeded latest from baseline");
            Ok(true)
        }
        Err(err) if err.is_not_found() => Ok(false),
        Err(err) => Err(err),
    }
}

/// Summary of one table merge.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TableMerge {
    pub table: String,
    pub inputs: Vec<String>,
    pub appended: usize,
    pub skipped: usize,
    /// Input snapshots that could not be parsed and were left in place.
    pub unreadable: Vec<String>,
    pub total: usize,
}

/// Applies staging and updated snapshots to latest in the ingestion store.
pub struct MergeStage {
    storage: StorageProviderRef,
}

impl MergeStage {
    pub fn new(storage: StorageProviderRef) -> Self {
        Self { storage }
    }

    /// Tables with pending merge input under `staging/` or `updated/`.
    pub async fn pending_tables(&self) -> Result<Vec<String>, StorageError> {
        let mut tables = Vec::new();
        for prefix in [SnapshotPrefix::Staging, SnapshotPrefix::Updated] {
            let entries = self.storage.list(prefix.as_str()).await?;
            tables.extend(
                entries
                    .iter()
                    .filter_map(|e| SnapshotKey::parse(&e.key))
                    .map(|k| k.table),
            );
        }
        tables.sort();
        tables.dedup();
        Ok(tables)
    }

    async fn read_records(&self, key: &str) -> Result<Option<Vec<Record>>, MergeStageError> {
        let table = SnapshotKey::parse(key).map(|k| k.table).unwrap_or_default();
        match self.storage.get(key).await {
            Ok(bytes) => record::parse_records(&bytes)
                .map(Some)
                .context(MergeInputSnafu { key }),
            Err(err) if err.is_not_found() => Ok(None),
            Err(source) => Err(source).context(MergeStorageSnafu { table }),
        }
    }

    /// Inputs for `table`: `staging/<table>.json`, then every updated
    /// snapshot oldest first.
    async fn inputs(&self, table: &str) -> Result<Vec<String>, MergeStageError> {
        let mut keys = vec![SnapshotKey::staging(table).to_string()];

        let mut updated: Vec<SnapshotKey> = self
            .storage
            .list(SnapshotPrefix::Updated.as_str())
            .await
            .context(MergeStorageSnafu { table })?
            .into_iter()
            .filter_map(|e| SnapshotKey::parse(&e.key))
            .filter(|k| k.table == table && k.prefix == SnapshotPrefix::Updated)
            .collect();
        updated.sort_by_key(|k| k.extracted_at);
        keys.extend(updated.iter().map(|k| k.to_string()));
        Ok(keys)
    }

    /// Merge all pending input of `table` and replace its latest object.
    pub async fn merge_table(&self, table: &str) -> Result<TableMerge, MergeStageError> {
        let latest_key = SnapshotKey::latest(table).to_string();
        let mut latest = self.read_records(&latest_key).await?.unwrap_or_default();
        let before = latest.len();

        let mut summary = TableMerge {
            table: table.to_string(),
            ..Default::default()
        };

        for key in self.inputs(table).await? {
            // An unparseable input is passed over so later snapshots still apply.
            let staging = match self.read_records(&key).await {
                Ok(Some(staging)) => staging,
                Ok(None) => continue,
                Err(MergeStageError::MergeInput { source, .. }) => {
                    warn!(table, key = %key, error = %source, "Skipped unreadable snapshot");
                    emit!(SnapshotSkipped {
                        stage: Stage::Merge,
                        table: table.to_string(),
                    });
                    summary.unreadable.push(key);
                    continue;
                }
                Err(err) => return Err(err),
            };

            let outcome = merge(table, &staging, latest);
            for skipped in &outcome.skipped {
                warn!(table, key = %key, error = %skipped, "Skipped staging record");
                emit!(RecordSkipped {
                    stage: Stage::Merge,
                    table: table.to_string(),
                });
            }
            debug!(table, key = %key, appended = outcome.appended, "Applied staging snapshot");

            summary.appended += outcome.appended;
            summary.skipped += outcome.skipped.len();
            summary.inputs.push(key);
            latest = outcome.records;
        }

        summary.total = latest.len();
        if latest.len() != before {
            let bytes = record::encode_records(&latest).context(MergeInputSnafu {
                key: latest_key.as_str(),
            })?;
            self.storage
                .atomic_write(&latest_key, bytes)
                .await
                .context(MergeStorageSnafu { table })?;
        }
        emit!(RecordsMerged {
            count: summary.appended as u64,
            table: table.to_string(),
        });
        info!(
            table,
            appended = summary.appended,
            skipped = summary.skipped,
            total = summary.total,
            "Merge applied"
        );

        // Latest is durable at this point; a crash before cleanup re-merges
        // the same staging file as a no-op.
        let staging_key = SnapshotKey::staging(table).to_string();
        if summary.inputs.contains(&staging_key) {
            self.storage
                .delete(&staging_key)
                .await
                .context(MergeStorageSnafu { table })?;
        }

        Ok(summary)
    }
}
