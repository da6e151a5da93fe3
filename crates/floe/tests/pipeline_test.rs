//! End-to-end runs of the floe pipeline over local stores.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Mutex;
use tempfile::TempDir;

use floe::error::{ExtractionError, LoadError};
use floe::{Config, Pipeline, TableSource, Warehouse};
use floe_core::Record;
use floe_core::record::{self, normalize_timestamp};

/// Source database held in memory; tables can grow between runs.
#[derive(Default)]
struct MemorySource {
    tables: Mutex<HashMap<String, Vec<Record>>>,
}

impl MemorySource {
    fn insert(&self, table: &str, rows: Value) {
        let rows: Vec<Record> = serde_json::from_value(rows).unwrap();
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }
}

#[async_trait]
impl TableSource for MemorySource {
    async fn list_tables(&self) -> Result<Vec<String>, ExtractionError> {
        let mut names: Vec<_> = self.tables.lock().unwrap().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn fetch(
        &self,
        table: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Record>, ExtractionError> {
        let rows = self
            .tables
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default();
        Ok(rows
            .into_iter()
            .filter(|r| match since {
                None => true,
                Some(cutoff) => r
                    .get("last_updated")
                    .and_then(|v| normalize_timestamp("last_updated", v).ok())
                    .is_some_and(|ts| ts > cutoff),
            })
            .collect())
    }
}

/// Source whose fetch fails for one table.
struct FailingSource {
    inner: MemorySource,
    table: &'static str,
    /// Fail as if the database had gone away instead of with a bad row.
    unreachable: bool,
}

#[async_trait]
impl TableSource for FailingSource {
    async fn list_tables(&self) -> Result<Vec<String>, ExtractionError> {
        self.inner.list_tables().await
    }

    async fn fetch(
        &self,
        table: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Record>, ExtractionError> {
        if table != self.table {
            return self.inner.fetch(table, since).await;
        }
        if self.unreachable {
            Err(ExtractionError::SourceConnect {
                source: sqlx::Error::PoolTimedOut,
            })
        } else {
            Err(ExtractionError::RowShape {
                table: table.to_string(),
            })
        }
    }
}

#[derive(Default)]
struct MemoryWarehouse {
    tables: Mutex<HashMap<String, Vec<Record>>>,
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn load(&self, table: &str, rows: &[Record]) -> Result<u64, LoadError> {
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .extend(rows.iter().cloned());
        Ok(rows.len() as u64)
    }
}

const OLD: &str = "2022-11-03T14:20:51.563";
const NEW: &str = "2024-05-24T12:10:00";

fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 24, 12, minute, 0).unwrap()
}

fn seeded_source() -> MemorySource {
    let source = MemorySource::default();
    source.insert(
        "staff",
        json!([{"staff_id": 1, "first_name": "Jeremie", "created_at": OLD, "last_updated": OLD}]),
    );
    source.insert(
        "currency",
        json!([{"currency_id": 1, "currency_code": "USD", "created_at": OLD, "last_updated": OLD}]),
    );
    source.insert(
        "address",
        json!([{
            "address_id": 5,
            "address_line_1": "605 Haskell Trafficway",
            "address_line_2": null,
            "district": null,
            "city": "London",
            "postal_code": "28441",
            "country": "Turkey",
            "phone": "1803 637401",
            "created_at": OLD,
            "last_updated": OLD
        }]),
    );
    source.insert(
        "counterparty",
        json!([{
            "counterparty_id": 1,
            "legal_address_id": 5,
            "created_at": OLD,
            "last_updated": OLD
        }]),
    );
    source.insert(
        "design",
        json!([{"design_id": 1, "design_name": "Wooden", "created_at": OLD, "last_updated": OLD}]),
    );
    source.insert(
        "sales_order",
        json!([{
            "sales_order_id": 1,
            "created_at": OLD,
            "last_updated": OLD,
            "design_id": 1,
            "staff_id": 1,
            "agreed_payment_date": "2022-11-08",
            "agreed_delivery_date": "2022-11-07"
        }]),
    );
    source.insert("payment", json!([{"payment_id": 1, "created_at": OLD, "last_updated": OLD}]));
    source
}

fn add_new_rows(source: &MemorySource) {
    source.insert(
        "staff",
        json!([{"staff_id": 2, "first_name": "Deron", "created_at": NEW, "last_updated": NEW}]),
    );
    source.insert(
        "currency",
        json!([{"currency_id": 2, "currency_code": "GBP", "created_at": NEW, "last_updated": NEW}]),
    );
    source.insert(
        "counterparty",
        json!([{
            "counterparty_id": 2,
            "counterparty_legal_name": "Fahey and Sons",
            "legal_address_id": 5,
            "commercial_contact": "Micheal Toy",
            "delivery_contact": "Mrs. Lucy Runolfsdottir",
            "created_at": NEW,
            "last_updated": NEW
        }]),
    );
    source.insert(
        "sales_order",
        json!([{
            "sales_order_id": 2,
            "created_at": NEW,
            "last_updated": NEW,
            "design_id": 1,
            "staff_id": 2,
            "agreed_payment_date": "2024-06-01",
            "agreed_delivery_date": "2024-05-30"
        }]),
    );
    source.insert("payment", json!([{"payment_id": 2, "created_at": NEW, "last_updated": NEW}]));
}

struct Stores {
    ingestion: TempDir,
    processed: TempDir,
}

async fn pipeline() -> (Stores, Pipeline) {
    let stores = Stores {
        ingestion: TempDir::new().unwrap(),
        processed: TempDir::new().unwrap(),
    };
    let yaml = format!(
        "ingestion:\n  url: {}\nprocessed:\n  url: {}\n",
        stores.ingestion.path().display(),
        stores.processed.path().display()
    );
    let config = Config::parse(&yaml).unwrap();
    let pipeline = Pipeline::from_config(config).await.unwrap();
    (stores, pipeline)
}

async fn latest_ids(pipeline: &Pipeline, table: &str) -> Vec<i64> {
    let bytes = pipeline
        .ingestion()
        .get(&format!("latest/{table}.json"))
        .await
        .unwrap();
    record::parse_records(&bytes)
        .unwrap()
        .iter()
        .map(|r| record::primary_key(r, table).unwrap())
        .collect()
}

mod first_run {
    use super::*;

    #[tokio::test]
    async fn test_baselines_seed_latest_and_nothing_loads() {
        let (_stores, pipeline) = pipeline().await;
        let source = seeded_source();
        let warehouse = MemoryWarehouse::default();

        let reports = pipeline
            .run_all(Some(&source), Some(&warehouse), at(0))
            .await
            .unwrap();

        assert_eq!(reports[0].succeeded.len(), 7);
        for table in ["staff", "currency", "address", "payment"] {
            let storage = pipeline.ingestion();
            assert!(
                storage
                    .exists(&format!("baseline/{table}.json"))
                    .await
                    .unwrap()
            );
            assert!(
                storage
                    .exists(&format!("watermarks/{table}.json"))
                    .await
                    .unwrap()
            );
        }
        assert_eq!(latest_ids(&pipeline, "staff").await, vec![1]);
        assert!(
            pipeline
                .ingestion()
                .list("updated")
                .await
                .unwrap()
                .is_empty()
        );

        let load = reports.last().unwrap();
        assert!(load.succeeded.is_empty());
        assert_eq!(load.skipped.len(), 7);
        assert!(warehouse.tables.lock().unwrap().is_empty());
    }
}

mod incremental_run {
    use super::*;

    #[tokio::test]
    async fn test_new_rows_flow_into_warehouse() {
        let (_stores, pipeline) = pipeline().await;
        let source = seeded_source();
        let warehouse = MemoryWarehouse::default();
        pipeline.extract(&source, at(0)).await.unwrap();

        add_new_rows(&source);
        // A re-delivered invocation exports the same window twice.
        let first = pipeline.extract(&source, at(20)).await.unwrap();
        assert_eq!(first.succeeded.len(), 5);
        assert_eq!(first.skipped, vec!["address", "design"]);

        let reports = pipeline
            .run_all(Some(&source), Some(&warehouse), at(21))
            .await
            .unwrap();
        let dedup = &reports[1];
        assert_eq!(dedup.deleted, 5);

        // Merge appended the new staff member after the baseline one.
        assert_eq!(latest_ids(&pipeline, "staff").await, vec![1, 2]);
        assert_eq!(latest_ids(&pipeline, "payment").await, vec![1, 2]);

        let tables = warehouse.tables.lock().unwrap();
        assert_eq!(tables["dim_currency"].len(), 1);
        assert_eq!(tables["dim_currency"][0]["currency_name"], "British Pound");
        assert_eq!(tables["dim_counterparty"][0]["counterparty_legal_city"], "London");
        assert!(!tables["dim_counterparty"][0].contains_key("commercial_contact"));
        assert_eq!(tables["dim_staff"][0]["first_name"], "Deron");
        assert_eq!(tables["fact_sales_order"][0]["sales_staff_id"], 2);
        assert_eq!(tables["fact_sales_order"][0]["created_time"], "12:10:00");

        let dates: Vec<_> = tables["dim_date"]
            .iter()
            .map(|r| r["date_id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(dates, vec!["2024-05-24", "2024-05-30", "2024-06-01"]);
        assert!(!tables.contains_key("dim_design"));
        assert!(!tables.contains_key("dim_location"));
        drop(tables);

        // Consumed snapshots left updated/ for processed_updated/.
        assert!(
            pipeline
                .ingestion()
                .list("updated")
                .await
                .unwrap()
                .is_empty()
        );
        assert_eq!(
            pipeline
                .ingestion()
                .list("processed_updated")
                .await
                .unwrap()
                .len(),
            5
        );
    }

    #[tokio::test]
    async fn test_merge_is_safe_to_redeliver() {
        let (_stores, pipeline) = pipeline().await;
        let source = seeded_source();
        pipeline.extract(&source, at(0)).await.unwrap();
        add_new_rows(&source);
        pipeline.extract(&source, at(20)).await.unwrap();

        pipeline.merge().await.unwrap();
        pipeline.merge().await.unwrap();

        assert_eq!(latest_ids(&pipeline, "currency").await, vec![1, 2]);
    }
}

mod table_failures {
    use super::*;

    #[tokio::test]
    async fn test_failed_table_is_skipped_and_others_extract() {
        let (_stores, pipeline) = pipeline().await;
        let source = FailingSource {
            inner: seeded_source(),
            table: "currency",
            unreachable: false,
        };

        let report = pipeline.extract(&source, at(0)).await.unwrap();

        assert_eq!(report.failed, vec!["currency"]);
        assert!(report.has_failures());
        assert_eq!(report.succeeded.len(), 6);
        let storage = pipeline.ingestion();
        assert!(!storage.exists("baseline/currency.json").await.unwrap());
        assert!(!storage.exists("watermarks/currency.json").await.unwrap());
        assert!(storage.exists("baseline/staff.json").await.unwrap());
    }

    #[tokio::test]
    async fn test_unreachable_database_aborts_the_stage() {
        let (_stores, pipeline) = pipeline().await;
        let source = FailingSource {
            inner: seeded_source(),
            table: "currency",
            unreachable: true,
        };

        let err = pipeline.extract(&source, at(0)).await.unwrap_err();

        assert!(err.is_fatal());
        let storage = pipeline.ingestion();
        // Tables before the failure were extracted; later ones never ran.
        assert!(storage.exists("baseline/counterparty.json").await.unwrap());
        assert!(!storage.exists("baseline/design.json").await.unwrap());
        assert!(!storage.exists("baseline/staff.json").await.unwrap());
    }

    #[tokio::test]
    async fn test_unreadable_snapshot_does_not_stall_the_table() {
        let (_stores, pipeline) = pipeline().await;
        let source = seeded_source();
        let warehouse = MemoryWarehouse::default();
        pipeline.extract(&source, at(0)).await.unwrap();
        let broken = "updated/staff-20240524T120500000000Z.json";
        pipeline
            .ingestion()
            .put(broken, br#"[{"staff_id":9,"#.to_vec())
            .await
            .unwrap();
        add_new_rows(&source);

        let reports = pipeline
            .run_all(Some(&source), Some(&warehouse), at(20))
            .await
            .unwrap();

        assert!(reports.iter().all(|r| !r.has_failures()));
        assert_eq!(latest_ids(&pipeline, "staff").await, vec![1, 2]);
        let tables = warehouse.tables.lock().unwrap();
        assert_eq!(tables["dim_staff"].len(), 1);
        assert_eq!(tables["dim_staff"][0]["first_name"], "Deron");
        drop(tables);
        // Left where it was for inspection; only the good snapshot moved on.
        assert_eq!(pipeline.ingestion().list("updated").await.unwrap().len(), 1);
        assert!(pipeline.ingestion().exists(broken).await.unwrap());
    }
}

mod staging_merge {
    use super::*;

    #[tokio::test]
    async fn test_staging_snapshot_merges_into_latest() {
        let (_stores, pipeline) = pipeline().await;
        let storage = pipeline.ingestion();
        storage
            .put("latest/staff.json", br#"[{"staff_id":1,"first_name":"Jeremie"}]"#.to_vec())
            .await
            .unwrap();
        storage
            .put(
                "staging/staff.json",
                br#"[{"staff_id":1,"first_name":"Changed"},{"staff_id":2,"first_name":"Deron"}]"#
                    .to_vec(),
            )
            .await
            .unwrap();

        let report = pipeline.merge().await.unwrap();
        assert_eq!(report.succeeded, vec!["staff"]);

        let bytes = storage.get("latest/staff.json").await.unwrap();
        let latest = record::parse_records(&bytes).unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0]["first_name"], "Jeremie");
        assert!(!storage.exists("staging/staff.json").await.unwrap());
    }
}
