//! Error types shared across the floe pipeline stages.
//!
//! Storage, configuration, metrics and record-level errors live here so
//! that every stage reports them the same way.

use snafu::prelude::*;

// ============ Storage Errors ============

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Invalid storage URL format.
    #[snafu(display("Invalid storage URL: {url}"))]
    InvalidUrl { url: String },

    /// The bucket or root directory backing the store does not exist.
    #[snafu(display("Storage container not found: {container}"))]
    ContainerNotFound { container: String },

    /// Object store operation failed.
    #[snafu(display("Storage operation failed: {source}"))]
    ObjectStore { source: object_store::Error },

    /// IO error during storage operations.
    #[snafu(display("IO error: {source}"))]
    Io { source: std::io::Error },

    /// S3 configuration error.
    #[snafu(display("S3 configuration error: {source}"))]
    S3Config { source: object_store::Error },
}

impl StorageError {
    /// Check if this error represents a "not found" condition (404, NoSuchKey, etc.)
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::ObjectStore { source } => {
                matches!(source, object_store::Error::NotFound { .. })
            }
            _ => false,
        }
    }

    /// Missing containers abort the whole batch rather than one table.
    pub fn is_container_missing(&self) -> bool {
        matches!(self, StorageError::ContainerNotFound { .. })
    }
}

// ============ Record Errors ============

/// Data faults found while reading snapshot records.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RecordError {
    /// Snapshot bytes were not valid JSON.
    #[snafu(display("Failed to parse snapshot JSON: {source}"))]
    JsonParse { source: serde_json::Error },

    /// Snapshot JSON was neither a record array nor a single-table wrapper.
    #[snafu(display("Unsupported snapshot shape: {message}"))]
    UnsupportedShape { message: String },

    /// Failed to serialize records.
    #[snafu(display("Failed to serialize records: {source}"))]
    JsonSerialize { source: serde_json::Error },

    /// A timestamp value could not be normalized.
    #[snafu(display("Unparseable timestamp in column '{column}': {value}"))]
    UnparseableTimestamp { column: String, value: String },

    /// A record lacks the expected primary-key column.
    #[snafu(display("Record is missing primary key column '{column}'"))]
    MissingPrimaryKey { column: String },

    /// The primary-key column holds something other than an integer.
    #[snafu(display("Primary key column '{column}' is not an integer: {value}"))]
    InvalidPrimaryKey { column: String, value: String },
}

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Storage URL is empty for a named store.
    #[snafu(display("Storage '{store}' has an empty url"))]
    EmptyStorageUrl { store: String },

    /// Database URL is empty for a named connection.
    #[snafu(display("Connection '{connection}' has an empty database_url"))]
    EmptyDatabaseUrl { connection: String },

    /// A command needs a config section that is absent.
    #[snafu(display("Missing '{section}' section in configuration"))]
    MissingSection { section: String },

    /// Window must cover some time.
    #[snafu(display("Extraction window must be at least one minute"))]
    EmptyWindow,

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file {}: {source}", path.display()))]
    ReadFile {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    /// Unsupported config file format.
    #[snafu(display("Unsupported config format for {}: only .yaml/.yml supported", path.display()))]
    UnsupportedFormat { path: std::path::PathBuf },

    /// Multiple configuration errors occurred.
    #[snafu(display("Multiple config errors:\n{}", errors.join("\n")))]
    MultipleErrors { errors: Vec<String> },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to parse metrics address.
    #[snafu(display("Failed to parse metrics address: {source}"))]
    AddressParse { source: std::net::AddrParseError },

    /// Failed to install the Prometheus exporter.
    #[snafu(display("Failed to initialize Prometheus exporter"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },
}

// ============ Watermark Errors ============

/// Errors that can occur while reading or persisting watermarks.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum WatermarkError {
    /// Failed to read or write the watermark object.
    #[snafu(display("Watermark storage error for table '{table}': {source}"))]
    WatermarkStorage { table: String, source: StorageError },

    /// The watermark could not be encoded or decoded.
    #[snafu(display("Invalid watermark JSON for table '{table}': {source}"))]
    WatermarkJson {
        table: String,
        source: serde_json::Error,
    },
}

impl WatermarkError {
    pub fn is_container_missing(&self) -> bool {
        match self {
            WatermarkError::WatermarkStorage { source, .. } => source.is_container_missing(),
            WatermarkError::WatermarkJson { .. } => false,
        }
    }
}
