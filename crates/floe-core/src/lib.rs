//! Shared infrastructure for the floe warehouse pipeline.
//!
//! This crate provides:
//! - Blob storage over S3 and the local filesystem
//! - The record, snapshot key and watermark data model
//! - Configuration helpers with environment interpolation
//! - Metrics events and tracing setup

pub mod config;
pub mod error;
pub mod metrics;
pub mod record;
pub mod snapshot;
pub mod storage;
pub mod tracing;
pub mod watermark;

pub use config::{LogFormat, LoggingConfig, MetricsConfig, ParquetCompression, StorageConfig};
pub use error::{ConfigError, MetricsError, RecordError, StorageError, WatermarkError};
pub use metrics::init as init_metrics;
pub use record::Record;
pub use snapshot::{SnapshotKey, SnapshotPrefix, SnapshotStats};
pub use storage::{ObjectEntry, StorageProvider, StorageProviderRef};
pub use crate::tracing::init_tracing;
pub use watermark::{Watermark, WatermarkState, WindowPolicy};
