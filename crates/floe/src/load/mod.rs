//! Loading encoded star-schema files into the warehouse.
//!
//! For every target the loader picks the newest encoded object (keys embed a
//! sortable timestamp, so the lexicographic maximum wins) and hands its rows
//! to a [`Warehouse`] in one transaction.

mod postgres;

pub use postgres::PostgresWarehouse;

use async_trait::async_trait;
use snafu::prelude::*;
use tracing::info;

use floe_core::emit;
use floe_core::metrics::events::RowsLoaded;
use floe_core::{Record, StorageProvider, StorageProviderRef};

use crate::encode::decode_parquet;
use crate::error::{DecodeSnafu, LoadError, LoadStorageSnafu, NoSnapshotSnafu};
use crate::transform::{OutputTarget, TransformKind};

/// Dimensions first, so the fact's foreign keys resolve against loaded rows.
pub const LOAD_ORDER: [TransformKind; 7] = [
    TransformKind::Date,
    TransformKind::Currency,
    TransformKind::Counterparty,
    TransformKind::Design,
    TransformKind::Location,
    TransformKind::Staff,
    TransformKind::SalesOrder,
];

/// A destination for star-schema rows.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Insert `rows` into `table` atomically. Returns the number of rows
    /// inserted; on error nothing is committed.
    async fn load(&self, table: &str, rows: &[Record]) -> Result<u64, LoadError>;
}

/// Newest encoded object of `target` in `storage`.
pub async fn latest_key(
    storage: &StorageProvider,
    target: &OutputTarget,
) -> Result<String, LoadError> {
    let prefix = target.key_prefix();
    storage
        .list(target.family.as_str())
        .await
        .context(LoadStorageSnafu {
            key: prefix.as_str(),
        })?
        .into_iter()
        .map(|entry| entry.key)
        .filter(|key| key.starts_with(&prefix) && key.ends_with(".parquet"))
        .max()
        .context(NoSnapshotSnafu { prefix })
}

/// Outcome of loading one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedTable {
    pub table: String,
    pub key: String,
    pub rows: u64,
}

/// Reads encoded objects from the processed store and loads them.
pub struct Loader {
    storage: StorageProviderRef,
}

impl Loader {
    pub fn new(storage: StorageProviderRef) -> Self {
        Self { storage }
    }

    /// Load the newest object of `target` into its warehouse table.
    pub async fn load_target(
        &self,
        warehouse: &dyn Warehouse,
        target: OutputTarget,
    ) -> Result<LoadedTable, LoadError> {
        let key = latest_key(&self.storage, &target).await?;
        let bytes = self
            .storage
            .get(&key)
            .await
            .context(LoadStorageSnafu { key: key.as_str() })?;
        let rows = decode_parquet(bytes).context(DecodeSnafu { key: key.as_str() })?;

        let table = target.warehouse_table();
        let loaded = warehouse.load(&table, &rows).await?;

        emit!(RowsLoaded {
            count: loaded,
            table: table.clone(),
        });
        info!(table = %table, key = %key, rows = loaded, "Loaded rows");

        Ok(LoadedTable {
            table,
            key,
            rows: loaded,
        })
    }
}
