//! floe: incremental OLTP snapshots into a star-schema warehouse.
//!
//! This crate handles:
//! - Watermark extraction of changed rows into the ingestion store
//! - Deduplication of redundant extraction snapshots
//! - Append-only merging into per-table latest state
//! - Fact and dimension transforms, encoded as Parquet
//! - Transactional loading into the warehouse

pub mod cli;
pub mod config;
pub mod dedup;
pub mod encode;
pub mod error;
pub mod extract;
pub mod load;
pub mod merge;
pub mod pipeline;
pub mod relocate;
pub mod transform;

pub use cli::{CliArgs, Command};
pub use config::Config;
pub use error::PipelineError;
pub use extract::{PostgresSource, TableSource};
pub use load::{PostgresWarehouse, Warehouse};
pub use pipeline::{Pipeline, StageReport};

pub use floe_core::{StorageProvider, StorageProviderRef, init_metrics, init_tracing};
