//! Removal of redundant extraction snapshots.
//!
//! Repeated extractions over an unchanged window re-export the same rows.
//! Snapshots of one table are fingerprinted and scanned newest first; the
//! first snapshot with a given fingerprint is kept and every older one with
//! the same fingerprint is deleted.
//!
//! The default fingerprint is `(byte size, max last_updated)`. It avoids a
//! full content comparison but is a heuristic: two different record sets of
//! equal size and equal max timestamp collide, and the older one is deleted.
//! [`FingerprintStrategy::ContentHash`] trades that risk for a SHA-256 over
//! the bytes.
//!
//! Snapshots holding no records at all are deleted as well and reported
//! separately.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use snafu::prelude::*;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};

use floe_core::emit;
use floe_core::metrics::events::{DeleteReason, SnapshotDeleted, SnapshotSkipped, Stage};
use floe_core::snapshot::{SnapshotKey, SnapshotPrefix, SnapshotStats};
use floe_core::{ObjectEntry, StorageProviderRef};

use crate::config::FingerprintStrategy;
use crate::error::{DedupError, DedupStorageSnafu, ProtectedPrefixSnafu};

/// Snapshots this small cannot hold a record (`[]`).
const EMPTY_SNAPSHOT_MAX_BYTES: u64 = 2;

/// Identity used to decide that two snapshots carry the same export.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Fingerprint {
    SizeAndMaxTimestamp {
        size: u64,
        max_last_updated: Option<DateTime<Utc>>,
    },
    ContentHash([u8; 32]),
}

impl Fingerprint {
    fn compute(
        strategy: FingerprintStrategy,
        size: u64,
        bytes: &[u8],
        stats: &SnapshotStats,
    ) -> Self {
        match strategy {
            FingerprintStrategy::SizeAndMaxTimestamp => Fingerprint::SizeAndMaxTimestamp {
                size,
                max_last_updated: stats.max_last_updated,
            },
            FingerprintStrategy::ContentHash => {
                Fingerprint::ContentHash(Sha256::digest(bytes).into())
            }
        }
    }
}

/// Keys removed by one deduplication pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DedupReport {
    pub duplicates: Vec<String>,
    pub empties: Vec<String>,
}

impl DedupReport {
    /// Every deleted key.
    pub fn deleted(&self) -> Vec<String> {
        self.duplicates
            .iter()
            .chain(self.empties.iter())
            .cloned()
            .collect()
    }
}

pub struct Deduplicator {
    storage: StorageProviderRef,
    strategy: FingerprintStrategy,
}

impl Deduplicator {
    pub fn new(storage: StorageProviderRef, strategy: FingerprintStrategy) -> Self {
        Self { storage, strategy }
    }

    /// Deduplicate every table's snapshots under `prefix`.
    pub async fn deduplicate(&self, prefix: SnapshotPrefix) -> Result<DedupReport, DedupError> {
        ensure!(
            !prefix.is_protected(),
            ProtectedPrefixSnafu {
                prefix: prefix.as_str(),
            }
        );

        let entries = self
            .storage
            .list(prefix.as_str())
            .await
            .context(DedupStorageSnafu)?;

        let mut by_table: BTreeMap<String, Vec<(SnapshotKey, ObjectEntry)>> = BTreeMap::new();
        for entry in entries {
            match SnapshotKey::parse(&entry.key) {
                Some(key) if key.prefix == prefix => {
                    by_table
                        .entry(key.table.clone())
                        .or_default()
                        .push((key, entry));
                }
                _ => debug!(key = %entry.key, "Skipping object outside snapshot layout"),
            }
        }

        let mut report = DedupReport::default();
        for (table, snapshots) in by_table {
            self.deduplicate_table(&table, snapshots, &mut report).await?;
        }

        info!(
            prefix = %prefix,
            duplicates = report.duplicates.len(),
            empties = report.empties.len(),
            "Deduplication finished"
        );
        Ok(report)
    }

    async fn deduplicate_table(
        &self,
        table: &str,
        mut snapshots: Vec<(SnapshotKey, ObjectEntry)>,
        report: &mut DedupReport,
    ) -> Result<(), DedupError> {
        // Newest first; canonical (untimestamped) keys sort as newest.
        snapshots.sort_by(|(a, ea), (b, eb)| {
            let order = |k: &SnapshotKey| k.extracted_at.unwrap_or(DateTime::<Utc>::MAX_UTC);
            order(b).cmp(&order(a)).then_with(|| eb.key.cmp(&ea.key))
        });

        let mut seen: HashSet<Fingerprint> = HashSet::new();
        for (key, entry) in snapshots {
            if entry.size <= EMPTY_SNAPSHOT_MAX_BYTES {
                self.remove(table, &entry.key, DeleteReason::Empty).await?;
                report.empties.push(entry.key);
                continue;
            }

            let bytes = self
                .storage
                .get(&entry.key)
                .await
                .context(DedupStorageSnafu)?;
            let stats = match SnapshotStats::from_bytes(table, &bytes) {
                Ok(stats) => stats,
                Err(err) => {
                    warn!(key = %key, error = %err, "Unreadable snapshot left in place");
                    emit!(SnapshotSkipped {
                        stage: Stage::Dedup,
                        table: table.to_string(),
                    });
                    continue;
                }
            };

            if stats.is_empty() {
                self.remove(table, &entry.key, DeleteReason::Empty).await?;
                report.empties.push(entry.key);
                continue;
            }

            let fingerprint = Fingerprint::compute(self.strategy, entry.size, &bytes, &stats);
            if seen.insert(fingerprint) {
                debug!(key = %key, "Keeping snapshot");
            } else {
                self.remove(table, &entry.key, DeleteReason::Duplicate).await?;
                report.duplicates.push(entry.key);
            }
        }
        Ok(())
    }

    async fn remove(&self, table: &str, key: &str, reason: DeleteReason) -> Result<(), DedupError> {
        self.storage.delete(key).await.context(DedupStorageSnafu)?;
        emit!(SnapshotDeleted {
            reason,
            table: table.to_string(),
        });
        info!(table, key, reason = ?reason, "Deleted snapshot");
        Ok(())
    }
}
