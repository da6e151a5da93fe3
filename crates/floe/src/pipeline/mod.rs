//! Stage orchestration.
//!
//! Stages run one table at a time. A failure that only concerns one table
//! is logged, counted and the stage moves on; a fatal failure (missing
//! container, unreachable database) aborts the stage and the run.

mod report;

pub use report::{StageReport, TransformReport};

use chrono::{DateTime, Utc};
use snafu::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use floe_core::emit;
use floe_core::metrics::events::{Stage, StageCompleted, TableFailed};
use floe_core::snapshot::SnapshotPrefix;
use floe_core::watermark::Watermark;
use floe_core::{StorageProvider, StorageProviderRef};

use crate::config::Config;
use crate::dedup::Deduplicator;
use crate::error::{PipelineError, StorageSnafu, WatermarkStateSnafu};
use crate::extract::{ExtractOutcome, Extractor, TableSource};
use crate::load::{LOAD_ORDER, Loader, Warehouse};
use crate::merge::MergeStage;
use crate::relocate::Relocator;
use crate::transform::TransformStage;

/// Create a storage provider for one configured store.
pub(crate) async fn create_storage(
    url: &str,
    options: HashMap<String, String>,
) -> Result<StorageProviderRef, PipelineError> {
    Ok(Arc::new(
        StorageProvider::for_url_with_options(url, options)
            .await
            .context(StorageSnafu)?,
    ))
}

/// Record a per-table failure, or hand back a fatal one.
fn table_failed(
    report: &mut StageReport,
    table: &str,
    err: PipelineError,
) -> Result<(), PipelineError> {
    if err.is_fatal() {
        return Err(err);
    }
    error!(stage = %report.stage, table, error = %err, "Table failed");
    emit!(TableFailed {
        stage: report.stage,
        table: table.to_string(),
    });
    report.failed.push(table.to_string());
    Ok(())
}

fn finish(report: &StageReport, start: Instant) {
    emit!(StageCompleted {
        stage: report.stage,
        duration: start.elapsed(),
    });
    info!(
        stage = %report.stage,
        succeeded = report.succeeded.len(),
        failed = report.failed.len(),
        skipped = report.skipped.len(),
        "Stage finished"
    );
}

/// A configured pipeline over the ingestion and processed stores.
pub struct Pipeline {
    config: Config,
    ingestion: StorageProviderRef,
    processed: StorageProviderRef,
}

impl Pipeline {
    pub fn new(
        config: Config,
        ingestion: StorageProviderRef,
        processed: StorageProviderRef,
    ) -> Self {
        Self {
            config,
            ingestion,
            processed,
        }
    }

    /// Open both stores named in `config`.
    pub async fn from_config(config: Config) -> Result<Self, PipelineError> {
        let ingestion = create_storage(
            &config.ingestion.url,
            config.ingestion.storage_options.clone(),
        )
        .await?;
        let processed = create_storage(
            &config.processed.url,
            config.processed.storage_options.clone(),
        )
        .await?;
        Ok(Self::new(config, ingestion, processed))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ingestion(&self) -> &StorageProviderRef {
        &self.ingestion
    }

    pub fn processed(&self) -> &StorageProviderRef {
        &self.processed
    }

    /// Configured tables, or every source table, minus exclusions.
    async fn tables(&self, source: &dyn TableSource) -> Result<Vec<String>, PipelineError> {
        let (configured, exclude) = match &self.config.source {
            Some(s) => (s.tables.clone(), s.exclude.clone()),
            None => (Vec::new(), Vec::new()),
        };
        let tables = if configured.is_empty() {
            source.list_tables().await?
        } else {
            configured
        };
        Ok(tables.into_iter().filter(|t| !exclude.contains(t)).collect())
    }

    async fn extract_table(
        &self,
        extractor: &Extractor,
        source: &dyn TableSource,
        table: &str,
        now: DateTime<Utc>,
    ) -> Result<ExtractOutcome, PipelineError> {
        let watermark = Watermark::load(&self.ingestion, table)
            .await
            .context(WatermarkStateSnafu)?;
        let full = extractor.needs_full(table).await?;
        let outcome = extractor
            .extract(source, table, watermark, full, now)
            .await?;
        outcome
            .watermark
            .save(&self.ingestion)
            .await
            .context(WatermarkStateSnafu)?;
        Ok(outcome)
    }

    /// Extract every table from `source` at invocation time `now`.
    pub async fn extract(
        &self,
        source: &dyn TableSource,
        now: DateTime<Utc>,
    ) -> Result<StageReport, PipelineError> {
        let start = Instant::now();
        let mut report = StageReport::new(Stage::Extract);
        let extractor = Extractor::new(self.ingestion.clone(), self.config.extraction.policy());

        for table in self.tables(source).await? {
            match self.extract_table(&extractor, source, &table, now).await {
                Ok(outcome) if outcome.empty => report.skipped.push(table),
                Ok(_) => report.succeeded.push(table),
                Err(err) => table_failed(&mut report, &table, err)?,
            }
        }

        finish(&report, start);
        Ok(report)
    }

    /// Remove redundant and empty snapshots under `updated/` and `staging/`.
    pub async fn deduplicate(&self) -> Result<StageReport, PipelineError> {
        let start = Instant::now();
        let mut report = StageReport::new(Stage::Dedup);
        let dedup = Deduplicator::new(self.ingestion.clone(), self.config.dedup.fingerprint);

        for prefix in [SnapshotPrefix::Updated, SnapshotPrefix::Staging] {
            let deleted = dedup.deduplicate(prefix).await?;
            report.deleted += deleted.deleted().len();
            report.succeeded.push(prefix.to_string());
        }

        finish(&report, start);
        Ok(report)
    }

    /// Fold pending staging and updated snapshots into latest state.
    pub async fn merge(&self) -> Result<StageReport, PipelineError> {
        let start = Instant::now();
        let mut report = StageReport::new(Stage::Merge);
        let stage = MergeStage::new(self.ingestion.clone());

        for table in stage.pending_tables().await? {
            match stage.merge_table(&table).await {
                Ok(_) => report.succeeded.push(table),
                Err(err) => table_failed(&mut report, &table, err.into())?,
            }
        }

        finish(&report, start);
        Ok(report)
    }

    /// Transform every table with updated snapshots.
    ///
    /// The consumed keys of successful tables are returned for relocation.
    pub async fn transform(&self, now: DateTime<Utc>) -> Result<TransformReport, PipelineError> {
        let start = Instant::now();
        let mut result = TransformReport::default();
        let stage = TransformStage::new(
            self.ingestion.clone(),
            self.processed.clone(),
            self.config.transform.compression,
        );

        for table in stage.pending_tables().await? {
            match stage.transform_table(&table, now).await {
                Ok(done) => {
                    if done.outputs.is_empty() {
                        result.report.skipped.push(table);
                    } else {
                        result.report.succeeded.push(table);
                    }
                    result.outputs.extend(done.outputs);
                    result.consumed.extend(done.consumed);
                }
                Err(err) => table_failed(&mut result.report, &table, err.into())?,
            }
        }

        finish(&result.report, start);
        Ok(result)
    }

    /// Move consumed `updated/` snapshots to the configured relocation prefix.
    pub async fn relocate(&self, keys: &[String]) -> Result<StageReport, PipelineError> {
        let start = Instant::now();
        let mut report = StageReport::new(Stage::Relocate);
        let relocator = Relocator::new(
            self.ingestion.clone(),
            self.config.transform.relocate_to.prefix(),
        );

        report.succeeded = relocator.relocate(keys).await?;

        finish(&report, start);
        Ok(report)
    }

    /// Load the newest output of every target, dimensions first.
    pub async fn load(&self, warehouse: &dyn Warehouse) -> Result<StageReport, PipelineError> {
        let start = Instant::now();
        let mut report = StageReport::new(Stage::Load);
        let loader = Loader::new(self.processed.clone());

        for kind in LOAD_ORDER {
            let target = kind.target();
            let table = target.warehouse_table();
            match loader.load_target(warehouse, target).await {
                Ok(_) => report.succeeded.push(table),
                Err(err) if err.is_not_found() => {
                    info!(table = %table, "Nothing to load");
                    report.skipped.push(table);
                }
                Err(err) => table_failed(&mut report, &table, err.into())?,
            }
        }

        finish(&report, start);
        Ok(report)
    }

    /// Run every stage in order.
    ///
    /// Extraction is skipped without a source and loading without a
    /// warehouse.
    pub async fn run_all(
        &self,
        source: Option<&dyn TableSource>,
        warehouse: Option<&dyn Warehouse>,
        now: DateTime<Utc>,
    ) -> Result<Vec<StageReport>, PipelineError> {
        let mut reports = Vec::new();
        if let Some(source) = source {
            reports.push(self.extract(source, now).await?);
        }
        reports.push(self.deduplicate().await?);
        reports.push(self.merge().await?);

        let transformed = self.transform(now).await?;
        let relocated = self.relocate(&transformed.consumed).await?;
        reports.push(transformed.report);
        reports.push(relocated);

        if let Some(warehouse) = warehouse {
            reports.push(self.load(warehouse).await?);
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ExtractionError, StorageError};

    #[test]
    fn test_table_fault_is_recorded_and_stage_continues() {
        let mut report = StageReport::new(Stage::Extract);
        let err = PipelineError::from(ExtractionError::RowShape {
            table: "staff".into(),
        });

        table_failed(&mut report, "staff", err).unwrap();

        assert_eq!(report.failed, vec!["staff"]);
    }

    #[test]
    fn test_missing_container_is_handed_back() {
        let mut report = StageReport::new(Stage::Merge);
        let err = PipelineError::Storage {
            source: StorageError::ContainerNotFound {
                container: "ingestion-zone".into(),
            },
        };

        let err = table_failed(&mut report, "staff", err).unwrap_err();

        assert!(err.is_fatal());
        assert!(report.failed.is_empty());
    }
}
