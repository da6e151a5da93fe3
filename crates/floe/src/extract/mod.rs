//! Watermark extraction from the operational database.
//!
//! An extraction pulls either every row of a table (first run, no baseline
//! yet) or the rows modified after the watermark cutoff, and writes them as
//! one snapshot object. Empty results are reported, never written.

mod postgres;

pub use postgres::PostgresSource;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use snafu::prelude::*;
use tracing::{debug, info};

use floe_core::StorageProviderRef;
use floe_core::emit;
use floe_core::metrics::events::{RowsExtracted, SnapshotWritten};
use floe_core::record::{self, Record};
use floe_core::snapshot::SnapshotKey;
use floe_core::watermark::{Watermark, WindowPolicy};

use crate::error::{BaselineCheckSnafu, ExtractionError, SnapshotEncodeSnafu, SnapshotWriteSnafu};
use crate::merge;

/// A database the extractor can read table rows from.
#[async_trait]
pub trait TableSource: Send + Sync {
    /// Names of the tables available for extraction.
    async fn list_tables(&self) -> Result<Vec<String>, ExtractionError>;

    /// Rows of `table`; all of them when `since` is `None`, otherwise only
    /// rows with `last_updated > since`.
    async fn fetch(
        &self,
        table: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Record>, ExtractionError>;
}

/// Result of extracting one table.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractOutcome {
    pub table: String,
    /// Key of the written snapshot; `None` when nothing was written.
    pub snapshot_key: Option<SnapshotKey>,
    pub rows: usize,
    pub full: bool,
    /// Set when the query returned no rows. Nothing is written in that case.
    pub empty: bool,
    /// Successor watermark, to be persisted by the caller.
    pub watermark: Watermark,
}

/// Writes extraction snapshots into the ingestion store.
pub struct Extractor {
    storage: StorageProviderRef,
    policy: WindowPolicy,
}

impl Extractor {
    pub fn new(storage: StorageProviderRef, policy: WindowPolicy) -> Self {
        Self { storage, policy }
    }

    /// A table needs a full extraction until its baseline exists.
    pub async fn needs_full(&self, table: &str) -> Result<bool, ExtractionError> {
        let exists = self
            .storage
            .exists(&SnapshotKey::baseline(table).to_string())
            .await
            .context(BaselineCheckSnafu { table })?;
        Ok(!exists)
    }

    /// Extract one table.
    ///
    /// `now` is the invocation time: it fixes both the incremental cutoff
    /// and the timestamp embedded in the snapshot key.
    pub async fn extract(
        &self,
        source: &dyn TableSource,
        table: &str,
        watermark: Watermark,
        full: bool,
        now: DateTime<Utc>,
    ) -> Result<ExtractOutcome, ExtractionError> {
        let cutoff = self.policy.cutoff(&watermark.state, now);
        let since = (!full).then_some(cutoff);

        let rows = source.fetch(table, since).await?;
        emit!(RowsExtracted {
            count: rows.len() as u64,
            table: table.to_string(),
        });
        info!(table, rows = rows.len(), full, since = ?since, "Fetched rows");

        let next = watermark.advance(&rows, cutoff);

        if rows.is_empty() {
            info!(table, full, "No rows to capture, snapshot not written");
            return Ok(ExtractOutcome {
                table: table.to_string(),
                snapshot_key: None,
                rows: 0,
                full,
                empty: true,
                watermark: next,
            });
        }

        let key = if full {
            SnapshotKey::baseline(table)
        } else {
            SnapshotKey::updated(table, now)
        };
        let bytes = record::encode_records(&rows).context(SnapshotEncodeSnafu { table })?;
        let size = bytes.len() as u64;

        self.storage
            .put(&key.to_string(), bytes)
            .await
            .context(SnapshotWriteSnafu { table })?;
        emit!(SnapshotWritten {
            bytes: size,
            table: table.to_string(),
        });
        info!(table, key = %key, bytes = size, "Wrote snapshot");

        if full {
            let seeded = merge::seed_latest(&self.storage, table)
                .await
                .context(SnapshotWriteSnafu { table })?;
            debug!(table, seeded, "Checked latest seed from baseline");
        }

        Ok(ExtractOutcome {
            table: table.to_string(),
            snapshot_key: Some(key),
            rows: rows.len(),
            full,
            empty: false,
            watermark: next,
        })
    }
}
