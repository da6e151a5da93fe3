//! URL parsing for storage backends.
//!
//! Extracts backend configuration from S3 and local filesystem URL formats.

use object_store::path::Path;
use regex::Regex;
use snafu::prelude::*;
use std::sync::OnceLock;

use crate::error::{InvalidUrlSnafu, StorageError};

use super::{LocalConfig, S3Config};

const S3_PATH: &str =
    r"^https://s3\.(?P<region>[\w\-]+)\.amazonaws\.com/(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+))?$";
const S3_VIRTUAL: &str =
    r"^https://(?P<bucket>[a-z0-9\-\.]+)\.s3\.(?P<region>[\w\-]+)\.amazonaws\.com(/(?P<key>.+))?$";
const S3_URL: &str = r"^[sS]3[aA]?://(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+))?$";
const S3_ENDPOINT_URL: &str = r"^[sS]3[aA]?::(?<protocol>https?)://(?P<endpoint>[^:/]+):(?<port>\d+)/(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+))?$";

const FILE_URI: &str = r"^file://(?P<path>.*)$";
const FILE_URL: &str = r"^file:(?P<path>.*)$";
const FILE_PATH: &str = r"^/(?P<path>.*)$";

/// Matchers are tried in order; the first backend with a hit wins.
fn matchers() -> &'static [(Backend, Vec<Regex>)] {
    static MATCHERS: OnceLock<Vec<(Backend, Vec<Regex>)>> = OnceLock::new();
    MATCHERS.get_or_init(|| {
        let compile = |patterns: &[&str]| -> Vec<Regex> {
            patterns
                .iter()
                .map(|p| Regex::new(p).expect("static storage URL pattern"))
                .collect()
        };

        vec![
            (
                Backend::S3,
                compile(&[S3_PATH, S3_VIRTUAL, S3_ENDPOINT_URL, S3_URL]),
            ),
            (Backend::Local, compile(&[FILE_URI, FILE_URL, FILE_PATH])),
        ]
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    S3,
    Local,
}

/// Backend configuration enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    S3(S3Config),
    Local(LocalConfig),
}

impl BackendConfig {
    /// Parse a URL into a backend configuration.
    pub fn parse_url(url: &str) -> Result<Self, StorageError> {
        for (backend, patterns) in matchers() {
            if let Some(matches) = patterns.iter().find_map(|r| r.captures(url)) {
                return match backend {
                    Backend::S3 => Self::parse_s3(url, &matches),
                    Backend::Local => Self::parse_local(url, &matches),
                };
            }
        }

        InvalidUrlSnafu {
            url: url.to_string(),
        }
        .fail()
    }

    fn parse_s3(url: &str, matches: &regex::Captures) -> Result<Self, StorageError> {
        let bucket = matches
            .name("bucket")
            .map(|m| m.as_str().to_string())
            .context(InvalidUrlSnafu { url })?;

        let region = std::env::var("AWS_DEFAULT_REGION")
            .ok()
            .or_else(|| matches.name("region").map(|m| m.as_str().to_string()));

        let endpoint = std::env::var("AWS_ENDPOINT").ok().or_else(|| {
            matches.name("endpoint").map(|endpoint| {
                let port = matches
                    .name("port")
                    .and_then(|p| p.as_str().parse::<u16>().ok())
                    .unwrap_or(443);
                let protocol = matches
                    .name("protocol")
                    .map(|p| p.as_str())
                    .unwrap_or("https");
                format!("{protocol}://{}:{port}", endpoint.as_str())
            })
        });

        let key = matches.name("key").map(|m| m.as_str().into());

        Ok(BackendConfig::S3(S3Config {
            endpoint,
            region,
            bucket,
            key,
        }))
    }

    fn parse_local(url: &str, matches: &regex::Captures) -> Result<Self, StorageError> {
        let path = matches
            .name("path")
            .map(|m| m.as_str())
            .context(InvalidUrlSnafu { url })?;

        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        let path = path.trim_end_matches('/');

        Ok(BackendConfig::Local(LocalConfig {
            path: if path.is_empty() { "/" } else { path }.to_string(),
        }))
    }

    /// Key prefix applied to every operation, if any.
    pub(crate) fn key(&self) -> Option<&Path> {
        match self {
            BackendConfig::S3(s3) => s3.key.as_ref(),
            BackendConfig::Local(_) => None,
        }
    }

    /// Human-readable name of the container (bucket or root directory).
    pub fn container(&self) -> &str {
        match self {
            BackendConfig::S3(s3) => &s3.bucket,
            BackendConfig::Local(local) => &local.path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_s3_url_parsing() {
        let config = BackendConfig::parse_url("s3://ingestion-zone/raw").unwrap();
        match config {
            BackendConfig::S3(s3) => {
                assert_eq!(s3.bucket, "ingestion-zone");
                assert_eq!(s3.key, Some(Path::from("raw")));
            }
            _ => panic!("Expected S3 config"),
        }
    }

    #[test]
    fn test_s3_bucket_only() {
        let config = BackendConfig::parse_url("s3://processed-zone").unwrap();
        assert_eq!(config.container(), "processed-zone");
        assert!(config.key().is_none());
    }

    #[test]
    fn test_s3_virtual_hosted_url() {
        let config =
            BackendConfig::parse_url("https://totes.s3.eu-west-2.amazonaws.com/snapshots").unwrap();
        match config {
            BackendConfig::S3(s3) => {
                assert_eq!(s3.bucket, "totes");
                assert_eq!(s3.key, Some(Path::from("snapshots")));
            }
            _ => panic!("Expected S3 config"),
        }
    }

    #[test]
    fn test_s3_endpoint_url() {
        let config = BackendConfig::parse_url("s3::http://localhost:9000/ingestion").unwrap();
        match config {
            BackendConfig::S3(s3) => {
                assert_eq!(s3.bucket, "ingestion");
                assert!(s3.endpoint.is_some());
                assert!(s3.key.is_none());
            }
            _ => panic!("Expected S3 config"),
        }
    }

    #[test]
    fn test_local_url_forms() {
        for url in ["/data/ingestion", "file:///data/ingestion", "file:/data/ingestion/"] {
            match BackendConfig::parse_url(url).unwrap() {
                BackendConfig::Local(local) => assert_eq!(local.path, "/data/ingestion"),
                _ => panic!("Expected Local config for {url}"),
            }
        }
    }

    #[test]
    fn test_invalid_url() {
        assert!(BackendConfig::parse_url("ftp://somewhere").is_err());
    }
}
