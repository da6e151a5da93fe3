use chrono::{DateTime, Utc};
use snafu::prelude::*;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use floe_core::emit;
use floe_core::metrics::events::{RecordSkipped, RecordsTransformed, SnapshotSkipped, Stage};
use floe_core::record::{self, Record};
use floe_core::snapshot::{SnapshotKey, SnapshotPrefix};
use floe_core::{ParquetCompression, StorageProviderRef};

use super::{OutputTarget, TransformKind, TransformOutput};
use crate::encode::encode_parquet;
use crate::error::{EncodeSnafu, TransformError, TransformInputSnafu, TransformStorageSnafu};

/// One encoded object written to the processed store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenOutput {
    pub target: OutputTarget,
    pub key: String,
    pub records: usize,
}

/// Result of transforming one source table.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TransformedTable {
    pub table: String,
    pub outputs: Vec<WrittenOutput>,
    /// `updated/` keys whose content went into the outputs.
    pub consumed: Vec<String>,
    pub skipped: usize,
    /// `updated/` keys that could not be parsed; they stay in place.
    pub unreadable: Vec<String>,
}

/// Outcome of reading one input snapshot.
enum Input {
    Records(Vec<Record>),
    Missing,
    Unreadable,
}

/// Rows gathered from the updated snapshots of one table.
#[derive(Debug, Default)]
struct UpdatedRows {
    rows: Vec<Record>,
    consumed: Vec<String>,
    unreadable: Vec<String>,
}

/// Reads `updated/` snapshots from the ingestion store and writes star-schema
/// parquet files to the processed store.
pub struct TransformStage {
    ingestion: StorageProviderRef,
    processed: StorageProviderRef,
    compression: ParquetCompression,
}

impl TransformStage {
    pub fn new(
        ingestion: StorageProviderRef,
        processed: StorageProviderRef,
        compression: ParquetCompression,
    ) -> Self {
        Self {
            ingestion,
            processed,
            compression,
        }
    }

    /// Tables with at least one `updated/` snapshot.
    pub async fn pending_tables(&self) -> Result<Vec<String>, TransformError> {
        let mut tables: Vec<String> = self
            .ingestion
            .list(SnapshotPrefix::Updated.as_str())
            .await
            .context(TransformStorageSnafu { table: "*" })?
            .iter()
            .filter_map(|e| SnapshotKey::parse(&e.key))
            .filter(|k| k.prefix == SnapshotPrefix::Updated)
            .map(|k| k.table)
            .collect();
        tables.sort();
        tables.dedup();
        Ok(tables)
    }

    /// Updated snapshots of `table`, oldest first.
    async fn updated_keys(&self, table: &str) -> Result<Vec<SnapshotKey>, TransformError> {
        let mut keys: Vec<SnapshotKey> = self
            .ingestion
            .list(SnapshotPrefix::Updated.as_str())
            .await
            .context(TransformStorageSnafu { table })?
            .into_iter()
            .filter_map(|e| SnapshotKey::parse(&e.key))
            .filter(|k| k.table == table && k.prefix == SnapshotPrefix::Updated)
            .collect();
        keys.sort_by_key(|k| k.extracted_at);
        Ok(keys)
    }

    async fn read(&self, table: &str, key: &str) -> Result<Option<Vec<Record>>, TransformError> {
        match self.ingestion.get(key).await {
            Ok(bytes) => record::parse_records(&bytes)
                .map(Some)
                .context(TransformInputSnafu { key }),
            Err(err) if err.is_not_found() => Ok(None),
            Err(source) => Err(source).context(TransformStorageSnafu { table }),
        }
    }

    /// Like [`read`](Self::read), but an unparseable snapshot is logged and
    /// passed over instead of failing the table.
    async fn read_input(&self, table: &str, key: &str) -> Result<Input, TransformError> {
        match self.read(table, key).await {
            Ok(Some(records)) => Ok(Input::Records(records)),
            Ok(None) => Ok(Input::Missing),
            Err(TransformError::TransformInput { source, .. }) => {
                warn!(table, key, error = %source, "Skipped unreadable snapshot");
                emit!(SnapshotSkipped {
                    stage: Stage::Transform,
                    table: table.to_string(),
                });
                Ok(Input::Unreadable)
            }
            Err(err) => Err(err),
        }
    }

    /// Rows of every updated snapshot of `table`.
    ///
    /// A later snapshot replaces earlier rows with the same primary key.
    async fn read_updated(&self, table: &str) -> Result<UpdatedRows, TransformError> {
        let mut updated = UpdatedRows::default();
        let mut positions: HashMap<i64, usize> = HashMap::new();

        for key in self.updated_keys(table).await? {
            let key = key.to_string();
            let records = match self.read_input(table, &key).await? {
                Input::Records(records) => records,
                Input::Missing => continue,
                Input::Unreadable => {
                    updated.unreadable.push(key);
                    continue;
                }
            };
            for row in records {
                match record::primary_key(&row, table).ok() {
                    Some(id) => match positions.get(&id) {
                        Some(&at) => updated.rows[at] = row,
                        None => {
                            positions.insert(id, updated.rows.len());
                            updated.rows.push(row);
                        }
                    },
                    None => updated.rows.push(row),
                }
            }
            updated.consumed.push(key);
        }
        Ok(updated)
    }

    /// Address rows for the counterparty join.
    ///
    /// Prefers the merged latest state, then the newest updated snapshot,
    /// then the baseline.
    async fn addresses(&self) -> Result<Vec<Record>, TransformError> {
        let mut candidates = vec![SnapshotKey::latest("address").to_string()];
        if let Some(newest) = self.updated_keys("address").await?.pop() {
            candidates.push(newest.to_string());
        }
        candidates.push(SnapshotKey::baseline("address").to_string());

        for key in candidates {
            if let Input::Records(records) = self.read_input("address", &key).await? {
                debug!(key = %key, rows = records.len(), "Resolved address rows");
                return Ok(records);
            }
        }
        warn!("No address snapshot found; counterparties are not enriched");
        Ok(Vec::new())
    }

    async fn write(
        &self,
        table: &str,
        target: OutputTarget,
        output: &TransformOutput,
        now: DateTime<Utc>,
    ) -> Result<Option<WrittenOutput>, TransformError> {
        for skipped in &output.skipped {
            warn!(table, target = %target, error = %skipped, "Skipped record");
            emit!(RecordSkipped {
                stage: Stage::Transform,
                table: table.to_string(),
            });
        }

        if output.records.is_empty() {
            info!(table, target = %target, "No records to encode");
            return Ok(None);
        }

        let bytes = encode_parquet(&output.records, self.compression).context(EncodeSnafu {
            target: target.to_string(),
        })?;
        let key = target.key(now);
        self.processed
            .put_parquet(&key, bytes)
            .await
            .context(TransformStorageSnafu { table })?;

        emit!(RecordsTransformed {
            count: output.records.len() as u64,
            target: target.warehouse_table(),
        });
        info!(table, key = %key, records = output.records.len(), "Wrote transform output");

        Ok(Some(WrittenOutput {
            target,
            key,
            records: output.records.len(),
        }))
    }

    /// Transform the updated rows of `table`.
    ///
    /// Tables without a transform are reported with no outputs so their
    /// snapshots can still be relocated.
    pub async fn transform_table(
        &self,
        table: &str,
        now: DateTime<Utc>,
    ) -> Result<TransformedTable, TransformError> {
        let UpdatedRows {
            rows,
            consumed,
            unreadable,
        } = self.read_updated(table).await?;
        let mut result = TransformedTable {
            table: table.to_string(),
            consumed,
            unreadable,
            ..Default::default()
        };

        let Some(kind) = TransformKind::for_table(table) else {
            debug!(table, "No transform for table");
            return Ok(result);
        };

        let related = match kind {
            TransformKind::Counterparty => self.addresses().await?,
            _ => Vec::new(),
        };

        let output = kind.apply(&rows, &related);
        result.skipped += output.skipped.len();
        if let Some(written) = self.write(table, kind.target(), &output, now).await? {
            result.outputs.push(written);
        }

        if kind == TransformKind::SalesOrder {
            let dates = TransformKind::Date.apply(&output.records, &[]);
            result.skipped += dates.skipped.len();
            if let Some(written) = self
                .write(table, TransformKind::Date.target(), &dates, now)
                .await?
            {
                result.outputs.push(written);
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::decode_parquet;
    use chrono::TimeZone;
    use floe_core::StorageProvider;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn storage(dir: &TempDir) -> StorageProviderRef {
        Arc::new(
            StorageProvider::for_url_with_options(dir.path().to_str().unwrap(), Default::default())
                .await
                .unwrap(),
        )
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 24, 12, minute, 0).unwrap()
    }

    async fn put(storage: &StorageProviderRef, key: SnapshotKey, body: &str) {
        storage
            .put(&key.to_string(), body.as_bytes().to_vec())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_currency_dimension_written_to_processed() {
        let (ingestion_dir, processed_dir) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let (ingestion, processed) = (storage(&ingestion_dir).await, storage(&processed_dir).await);
        put(
            &ingestion,
            SnapshotKey::updated("currency", at(0)),
            r#"[{"currency_id":1,"currency_code":"USD","created_at":1,"last_updated":1}]"#,
        )
        .await;

        let stage = TransformStage::new(ingestion, processed.clone(), ParquetCompression::Snappy);
        let result = stage.transform_table("currency", at(30)).await.unwrap();

        assert_eq!(result.outputs.len(), 1);
        let key = &result.outputs[0].key;
        assert_eq!(key, "dimension/currency-20240524T123000000000Z.parquet");
        let rows = decode_parquet(processed.get(key).await.unwrap()).unwrap();
        assert_eq!(rows[0]["currency_name"], "US Dollar");
        assert_eq!(result.consumed, vec![SnapshotKey::updated("currency", at(0)).to_string()]);
    }

    #[tokio::test]
    async fn test_later_snapshot_replaces_rows_by_primary_key() {
        let (ingestion_dir, processed_dir) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let (ingestion, processed) = (storage(&ingestion_dir).await, storage(&processed_dir).await);
        put(
            &ingestion,
            SnapshotKey::updated("staff", at(20)),
            r#"[{"staff_id":1,"first_name":"Jeremy"}]"#,
        )
        .await;
        put(
            &ingestion,
            SnapshotKey::updated("staff", at(0)),
            r#"[{"staff_id":1,"first_name":"Jeremie"},{"staff_id":2,"first_name":"Deron"}]"#,
        )
        .await;

        let stage = TransformStage::new(ingestion, processed.clone(), ParquetCompression::Snappy);
        let result = stage.transform_table("staff", at(30)).await.unwrap();

        let rows = decode_parquet(processed.get(&result.outputs[0].key).await.unwrap()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["first_name"], "Jeremy");
        assert_eq!(result.consumed.len(), 2);
    }

    #[tokio::test]
    async fn test_sales_order_also_writes_date_dimension() {
        let (ingestion_dir, processed_dir) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let (ingestion, processed) = (storage(&ingestion_dir).await, storage(&processed_dir).await);
        put(
            &ingestion,
            SnapshotKey::updated("sales_order", at(0)),
            r#"[{"sales_order_id":2,"created_at":"2022-11-03T14:20:52.186","last_updated":"2022-11-03T14:20:52.186","staff_id":19,"agreed_payment_date":"2022-11-08","agreed_delivery_date":"2022-11-07"}]"#,
        )
        .await;

        let stage = TransformStage::new(ingestion, processed.clone(), ParquetCompression::Snappy);
        let result = stage.transform_table("sales_order", at(30)).await.unwrap();

        let families: Vec<_> = result.outputs.iter().map(|o| o.target.to_string()).collect();
        assert_eq!(families, vec!["fact/sales_order", "dimension/date"]);
        let dates = decode_parquet(processed.get(&result.outputs[1].key).await.unwrap()).unwrap();
        assert_eq!(dates.len(), 3);
    }

    #[tokio::test]
    async fn test_counterparty_joins_latest_address() {
        let (ingestion_dir, processed_dir) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let (ingestion, processed) = (storage(&ingestion_dir).await, storage(&processed_dir).await);
        put(
            &ingestion,
            SnapshotKey::baseline("address"),
            r#"[{"address_id":5,"city":"Leeds"}]"#,
        )
        .await;
        put(
            &ingestion,
            SnapshotKey::latest("address"),
            r#"[{"address_id":5,"city":"London"}]"#,
        )
        .await;
        put(
            &ingestion,
            SnapshotKey::updated("counterparty", at(0)),
            r#"[{"counterparty_id":1,"legal_address_id":5}]"#,
        )
        .await;

        let stage = TransformStage::new(ingestion, processed.clone(), ParquetCompression::Snappy);
        let result = stage.transform_table("counterparty", at(30)).await.unwrap();

        let rows = decode_parquet(processed.get(&result.outputs[0].key).await.unwrap()).unwrap();
        assert_eq!(rows[0]["counterparty_legal_city"], "London");
    }

    #[tokio::test]
    async fn test_table_without_transform_is_still_consumed() {
        let (ingestion_dir, processed_dir) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let (ingestion, processed) = (storage(&ingestion_dir).await, storage(&processed_dir).await);
        put(
            &ingestion,
            SnapshotKey::updated("payment", at(0)),
            r#"[{"payment_id":1}]"#,
        )
        .await;

        let stage = TransformStage::new(ingestion, processed.clone(), ParquetCompression::Snappy);
        assert_eq!(stage.pending_tables().await.unwrap(), vec!["payment"]);

        let result = stage.transform_table("payment", at(30)).await.unwrap();
        assert!(result.outputs.is_empty());
        assert_eq!(result.consumed.len(), 1);
        assert!(processed.list("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_snapshot_is_skipped_and_not_consumed() {
        let (ingestion_dir, processed_dir) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let (ingestion, processed) = (storage(&ingestion_dir).await, storage(&processed_dir).await);
        put(
            &ingestion,
            SnapshotKey::updated("staff", at(0)),
            r#"[{"staff_id":2,"first_"#,
        )
        .await;
        put(
            &ingestion,
            SnapshotKey::updated("staff", at(20)),
            r#"[{"staff_id":3,"first_name":"Deron"}]"#,
        )
        .await;

        let stage = TransformStage::new(ingestion, processed.clone(), ParquetCompression::Snappy);
        let result = stage.transform_table("staff", at(30)).await.unwrap();

        let rows = decode_parquet(processed.get(&result.outputs[0].key).await.unwrap()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["staff_id"], 3);
        assert_eq!(
            result.consumed,
            vec![SnapshotKey::updated("staff", at(20)).to_string()]
        );
        assert_eq!(
            result.unreadable,
            vec![SnapshotKey::updated("staff", at(0)).to_string()]
        );
    }

    #[tokio::test]
    async fn test_unreadable_latest_address_falls_back_to_baseline() {
        let (ingestion_dir, processed_dir) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let (ingestion, processed) = (storage(&ingestion_dir).await, storage(&processed_dir).await);
        put(&ingestion, SnapshotKey::latest("address"), r#"{"address"#).await;
        put(
            &ingestion,
            SnapshotKey::baseline("address"),
            r#"[{"address_id":5,"city":"Leeds"}]"#,
        )
        .await;
        put(
            &ingestion,
            SnapshotKey::updated("counterparty", at(0)),
            r#"[{"counterparty_id":1,"legal_address_id":5}]"#,
        )
        .await;

        let stage = TransformStage::new(ingestion, processed.clone(), ParquetCompression::Snappy);
        let result = stage.transform_table("counterparty", at(30)).await.unwrap();

        let rows = decode_parquet(processed.get(&result.outputs[0].key).await.unwrap()).unwrap();
        assert_eq!(rows[0]["counterparty_legal_city"], "Leeds");
    }
}
