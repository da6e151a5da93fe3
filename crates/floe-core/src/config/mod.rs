//! Configuration types shared by every pipeline stage.

mod vars;

pub use vars::{interpolate, interpolate_with};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::HashMap;
use std::path::Path;

use crate::error::{ConfigError, ReadFileSnafu, UnsupportedFormatSnafu, YamlParseSnafu};
use crate::metrics::server::DEFAULT_METRICS_ADDR;

/// Location of one blob store plus backend options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Storage URL (`s3://bucket/prefix`, `/local/dir`, ...).
    pub url: String,
    /// Backend options (credentials, region, etc.).
    #[serde(default)]
    pub storage_options: HashMap<String, String>,
}

/// Metrics configuration for the Prometheus endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Expose the exporter while the run lasts.
    #[serde(default)]
    pub enabled: bool,
    /// Address to bind the metrics HTTP listener (default: "0.0.0.0:9090").
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_address() -> String {
    DEFAULT_METRICS_ADDR.to_string()
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

/// Parquet compression codec.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParquetCompression {
    Uncompressed,
    #[default]
    Snappy,
    Zstd,
}

/// Check if a path has a YAML extension.
pub fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext == "yaml" || ext == "yml")
        .unwrap_or(false)
}

/// Parse YAML text after environment interpolation.
pub fn parse_yaml<T: DeserializeOwned>(yaml: &str) -> Result<T, ConfigError> {
    let interpolated = interpolate(yaml)?;
    serde_yaml::from_str(&interpolated).context(YamlParseSnafu)
}

/// Read and parse a YAML config file.
pub fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    ensure!(is_yaml_file(path), UnsupportedFormatSnafu { path });
    let content = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
    parse_yaml(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_yaml_file() {
        assert!(is_yaml_file(Path::new("floe.yaml")));
        assert!(is_yaml_file(Path::new("conf/floe.yml")));
        assert!(!is_yaml_file(Path::new("floe.toml")));
    }

    #[test]
    fn test_read_yaml_rejects_other_formats() {
        let err = read_yaml::<MetricsConfig>(Path::new("floe.json")).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat { .. }));
    }

    #[test]
    fn test_metrics_defaults() {
        let config: MetricsConfig = parse_yaml("enabled: true").unwrap();
        assert!(config.enabled);
        assert_eq!(config.address, "0.0.0.0:9090");
    }
}
