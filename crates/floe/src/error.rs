//! Error types for the floe pipeline stages.
//!
//! Each stage has its own error enum. [`PipelineError`] wraps them and
//! decides which failures abort a run ([`PipelineError::is_fatal`]) and which
//! only cost the current table.

use snafu::prelude::*;

pub use floe_core::error::{ConfigError, RecordError, StorageError, WatermarkError};

/// Errors raised while pulling rows from the operational database.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ExtractionError {
    /// Could not connect to the source database.
    #[snafu(display("Failed to connect to source database: {source}"))]
    SourceConnect { source: sqlx::Error },

    /// The extraction query failed.
    #[snafu(display("Extraction query failed for table '{table}': {source}"))]
    Query { table: String, source: sqlx::Error },

    /// Listing source tables failed.
    #[snafu(display("Failed to list source tables: {source}"))]
    ListTables { source: sqlx::Error },

    /// A row could not be turned into a record.
    #[snafu(display("Row of table '{table}' is not a JSON object"))]
    RowShape { table: String },

    /// Writing the snapshot failed.
    #[snafu(display("Failed to write snapshot for table '{table}': {source}"))]
    SnapshotWrite { table: String, source: StorageError },

    /// Checking for an existing baseline failed.
    #[snafu(display("Failed to check baseline for table '{table}': {source}"))]
    BaselineCheck { table: String, source: StorageError },

    /// Records could not be serialized.
    #[snafu(display("Failed to serialize snapshot for table '{table}': {source}"))]
    SnapshotEncode { table: String, source: RecordError },

    /// Watermark persistence failed.
    #[snafu(display("{source}"))]
    WatermarkState { source: WatermarkError },
}

/// Errors raised by the snapshot deduplicator.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DedupError {
    /// Cleanup was asked to touch durable state.
    #[snafu(display("Refusing to deduplicate protected prefix '{prefix}'"))]
    ProtectedPrefix { prefix: String },

    /// Storage failure while listing, reading or deleting.
    #[snafu(display("Deduplication storage error: {source}"))]
    DedupStorage { source: StorageError },
}

/// Data fault found while merging; the record is skipped.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MergeError {
    /// A staging record lacks a usable primary key.
    #[snafu(display("Skipped staging record of table '{table}': {source}"))]
    InvalidRecord { table: String, source: RecordError },
}

/// Errors raised while merging a table into its latest snapshot.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MergeStageError {
    /// Storage failure while reading inputs or replacing latest.
    #[snafu(display("Merge storage error for table '{table}': {source}"))]
    MergeStorage { table: String, source: StorageError },

    /// An input snapshot could not be parsed.
    #[snafu(display("Unreadable snapshot '{key}': {source}"))]
    MergeInput { key: String, source: RecordError },
}

/// Errors raised by the dimensional transformer.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TransformError {
    /// Storage failure while reading inputs or writing outputs.
    #[snafu(display("Transform storage error for '{table}': {source}"))]
    TransformStorage { table: String, source: StorageError },

    /// An input snapshot could not be parsed.
    #[snafu(display("Unreadable transform input '{key}': {source}"))]
    TransformInput { key: String, source: RecordError },

    /// Encoding an output record set failed.
    #[snafu(display("Failed to encode output '{target}': {source}"))]
    Encode { target: String, source: EncodeError },
}

/// Errors raised by the columnar encoder.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum EncodeError {
    /// Arrow schema inference or batch decoding failed.
    #[snafu(display("Arrow conversion failed: {source}"))]
    Arrow { source: arrow::error::ArrowError },

    /// Parquet writing or reading failed.
    #[snafu(display("Parquet error: {source}"))]
    Parquet {
        source: parquet::errors::ParquetError,
    },

    /// Records could not be serialized for the Arrow decoder.
    #[snafu(display("Failed to convert rows: {source}"))]
    RowJson { source: serde_json::Error },

    /// Nothing to encode.
    #[snafu(display("Refusing to encode an empty record set"))]
    EmptyRecordSet,
}

/// Errors raised by the warehouse loader.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum LoadError {
    /// No encoded object exists for the target yet.
    #[snafu(display("No snapshot found under '{prefix}'"))]
    NoSnapshot { prefix: String },

    /// Storage failure while locating or reading a columnar object.
    #[snafu(display("Load storage error for '{key}': {source}"))]
    LoadStorage { key: String, source: StorageError },

    /// The columnar object could not be decoded.
    #[snafu(display("Failed to decode '{key}': {source}"))]
    Decode { key: String, source: EncodeError },

    /// Could not connect to the warehouse.
    #[snafu(display("Failed to connect to warehouse: {source}"))]
    WarehouseConnect { source: sqlx::Error },

    /// The load transaction failed and was rolled back.
    #[snafu(display("Warehouse load into '{table}' rolled back: {source}"))]
    Warehouse { table: String, source: sqlx::Error },
}

impl LoadError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, LoadError::NoSnapshot { .. })
    }
}

/// Errors that abort or fail a pipeline stage.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Configuration problem.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// Storage problem.
    #[snafu(display("Storage error: {source}"))]
    Storage { source: StorageError },

    /// Extraction stage failure.
    #[snafu(display("Extraction error: {source}"))]
    Extraction { source: ExtractionError },

    /// Deduplication stage failure.
    #[snafu(display("Deduplication error: {source}"))]
    Dedup { source: DedupError },

    /// Merge stage failure.
    #[snafu(display("Merge error: {source}"))]
    Merge { source: MergeStageError },

    /// Transform stage failure.
    #[snafu(display("Transform error: {source}"))]
    Transform { source: TransformError },

    /// Load stage failure.
    #[snafu(display("Load error: {source}"))]
    Load { source: LoadError },

    /// Metrics exporter failure.
    #[snafu(display("Metrics error: {source}"))]
    Metrics { source: floe_core::MetricsError },
}

impl PipelineError {
    /// Whether the failure must abort the remaining work of the run.
    ///
    /// A missing container or an unreachable database affects every table.
    pub fn is_fatal(&self) -> bool {
        match self {
            PipelineError::Config { .. } | PipelineError::Metrics { .. } => true,
            PipelineError::Storage { source } => source.is_container_missing(),
            PipelineError::Extraction { source } => match source {
                ExtractionError::SourceConnect { .. } | ExtractionError::ListTables { .. } => true,
                ExtractionError::SnapshotWrite { source, .. }
                | ExtractionError::BaselineCheck { source, .. } => source.is_container_missing(),
                ExtractionError::WatermarkState { source } => source.is_container_missing(),
                _ => false,
            },
            PipelineError::Dedup { source } => match source {
                DedupError::ProtectedPrefix { .. } => true,
                DedupError::DedupStorage { source } => source.is_container_missing(),
            },
            PipelineError::Merge { source } => match source {
                MergeStageError::MergeStorage { source, .. } => source.is_container_missing(),
                MergeStageError::MergeInput { .. } => false,
            },
            PipelineError::Transform { source } => match source {
                TransformError::TransformStorage { source, .. } => source.is_container_missing(),
                _ => false,
            },
            PipelineError::Load { source } => match source {
                LoadError::WarehouseConnect { .. } => true,
                LoadError::LoadStorage { source, .. } => source.is_container_missing(),
                _ => false,
            },
        }
    }
}

impl From<ConfigError> for PipelineError {
    fn from(source: ConfigError) -> Self {
        PipelineError::Config { source }
    }
}

impl From<StorageError> for PipelineError {
    fn from(source: StorageError) -> Self {
        PipelineError::Storage { source }
    }
}

impl From<ExtractionError> for PipelineError {
    fn from(source: ExtractionError) -> Self {
        PipelineError::Extraction { source }
    }
}

impl From<DedupError> for PipelineError {
    fn from(source: DedupError) -> Self {
        PipelineError::Dedup { source }
    }
}

impl From<MergeStageError> for PipelineError {
    fn from(source: MergeStageError) -> Self {
        PipelineError::Merge { source }
    }
}

impl From<TransformError> for PipelineError {
    fn from(source: TransformError) -> Self {
        PipelineError::Transform { source }
    }
}

impl From<LoadError> for PipelineError {
    fn from(source: LoadError) -> Self {
        PipelineError::Load { source }
    }
}
