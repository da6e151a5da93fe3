//! Configuration for a floe pipeline run.
//!
//! One YAML file describes the source database, the two blob stores, the
//! warehouse and the per-stage options:
//!
//! ```yaml
//! source:
//!   database_url: ${TOTESYS_DATABASE_URL}
//! ingestion:
//!   url: s3://ingestion-zone
//! processed:
//!   url: s3://processed-zone
//! warehouse:
//!   database_url: ${WAREHOUSE_DATABASE_URL}
//! ```

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::path::Path;

use floe_core::error::{ConfigError, MultipleErrorsSnafu};
pub use floe_core::config::{
    LogFormat, LoggingConfig, MetricsConfig, ParquetCompression, StorageConfig, parse_yaml,
    read_yaml,
};
pub use floe_core::watermark::{DEFAULT_WINDOW_MINUTES, WindowPolicy};
use floe_core::snapshot::SnapshotPrefix;

/// Operational database the extractor reads from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// Postgres connection URL.
    pub database_url: String,
    /// Schema holding the source tables.
    #[serde(default = "default_schema")]
    pub schema: String,
    /// Tables to extract. Empty means every table in the schema.
    #[serde(default)]
    pub tables: Vec<String>,
    /// Tables never extracted, even when discovered.
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,
    /// Maximum pooled connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_exclude() -> Vec<String> {
    vec!["_prisma_migrations".to_string()]
}

fn default_max_connections() -> u32 {
    2
}

/// How the incremental cutoff is computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    /// `now - minutes` on every run.
    #[default]
    Sliding,
    /// Resume from the persisted watermark position.
    HighWater,
}

/// Extraction options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractionConfig {
    #[serde(default)]
    pub window: WindowKind,
    /// Window length, and the first-run fallback for `high_water`.
    #[serde(default = "default_window_minutes")]
    pub minutes: u32,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            window: WindowKind::default(),
            minutes: default_window_minutes(),
        }
    }
}

fn default_window_minutes() -> u32 {
    DEFAULT_WINDOW_MINUTES
}

impl ExtractionConfig {
    pub fn policy(&self) -> WindowPolicy {
        match self.window {
            WindowKind::Sliding => WindowPolicy::Sliding {
                minutes: self.minutes,
            },
            WindowKind::HighWater => WindowPolicy::HighWater {
                minutes: self.minutes,
            },
        }
    }
}

/// Snapshot fingerprint used to detect redundant exports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintStrategy {
    /// (byte size, max `last_updated`). Cheap; can collide on genuinely
    /// different record sets of equal size and equal max timestamp.
    #[default]
    SizeAndMaxTimestamp,
    /// SHA-256 of the snapshot bytes.
    ContentHash,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DedupConfig {
    #[serde(default)]
    pub fingerprint: FingerprintStrategy,
}

/// Where consumed `updated/` objects are moved after processing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelocationTarget {
    #[default]
    ProcessedUpdated,
    Archived,
}

impl RelocationTarget {
    pub fn prefix(&self) -> SnapshotPrefix {
        match self {
            RelocationTarget::ProcessedUpdated => SnapshotPrefix::ProcessedUpdated,
            RelocationTarget::Archived => SnapshotPrefix::Archived,
        }
    }
}

/// Transform options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransformConfig {
    /// Parquet compression codec.
    #[serde(default)]
    pub compression: ParquetCompression,
    #[serde(default)]
    pub relocate_to: RelocationTarget,
}

/// Warehouse the loader writes into.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WarehouseConfig {
    /// Postgres connection URL.
    pub database_url: String,
    /// Schema holding the star-schema tables.
    #[serde(default = "default_schema")]
    pub schema: String,
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub source: Option<SourceConfig>,
    /// Blob store receiving extraction output and latest state.
    pub ingestion: StorageConfig,
    /// Blob store receiving fact and dimension parquet files.
    pub processed: StorageConfig,
    pub warehouse: Option<WarehouseConfig>,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub transform: TransformConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = read_yaml(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = parse_yaml(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every section, reporting all problems at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        for (store, storage) in [("ingestion", &self.ingestion), ("processed", &self.processed)] {
            if storage.url.trim().is_empty() {
                errors.push(ConfigError::EmptyStorageUrl { store: store.into() }.to_string());
            }
        }
        let connections = [
            ("source", self.source.as_ref().map(|s| &s.database_url)),
            ("warehouse", self.warehouse.as_ref().map(|w| &w.database_url)),
        ];
        for (connection, url) in connections {
            if url.is_some_and(|url| url.trim().is_empty()) {
                errors.push(
                    ConfigError::EmptyDatabaseUrl {
                        connection: connection.into(),
                    }
                    .to_string(),
                );
            }
        }
        if self.extraction.minutes == 0 {
            errors.push(ConfigError::EmptyWindow.to_string());
        }

        ensure!(errors.is_empty(), MultipleErrorsSnafu { errors });
        Ok(())
    }
}
