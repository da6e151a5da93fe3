//! Per-table extraction watermark.
//!
//! The watermark is a plain value: the extractor is handed one and hands back
//! its successor. Persistence is a separate step so tests and concurrent
//! table runs never share hidden state.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::error::{WatermarkError, WatermarkJsonSnafu, WatermarkStorageSnafu};
use crate::record::{self, Record};
use crate::storage::StorageProvider;

/// Namespace holding persisted watermarks in the ingestion store.
pub const WATERMARK_PREFIX: &str = "watermarks";

/// Tracked position of a table.
///
/// Serializes as a tagged enum:
/// ```json
/// {"state": "Active", "value": "2024-05-24T14:35:22Z"}
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "state", content = "value")]
pub enum WatermarkState {
    /// Nothing captured yet.
    #[default]
    Initial,
    /// Last extraction returned rows; the value is their max `last_updated`.
    Active(DateTime<Utc>),
    /// Last extraction returned nothing above this position.
    Idle(DateTime<Utc>),
}

impl WatermarkState {
    pub fn position(&self) -> Option<DateTime<Utc>> {
        match self {
            WatermarkState::Initial => None,
            WatermarkState::Active(ts) | WatermarkState::Idle(ts) => Some(*ts),
        }
    }

    pub fn is_initial(&self) -> bool {
        matches!(self, WatermarkState::Initial)
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, WatermarkState::Idle(_))
    }
}

/// How the extraction cutoff is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPolicy {
    /// Rows modified within the last `minutes` before the invocation.
    Sliding { minutes: u32 },
    /// Rows modified after the highest `last_updated` captured so far,
    /// falling back to a sliding window on first run.
    HighWater { minutes: u32 },
}

pub const DEFAULT_WINDOW_MINUTES: u32 = 20;

impl Default for WindowPolicy {
    fn default() -> Self {
        WindowPolicy::Sliding {
            minutes: DEFAULT_WINDOW_MINUTES,
        }
    }
}

impl WindowPolicy {
    pub fn minutes(&self) -> u32 {
        match self {
            WindowPolicy::Sliding { minutes } | WindowPolicy::HighWater { minutes } => *minutes,
        }
    }

    /// Cutoff for an extraction invoked at `now`.
    pub fn cutoff(&self, state: &WatermarkState, now: DateTime<Utc>) -> DateTime<Utc> {
        let sliding = now - Duration::minutes(i64::from(self.minutes()));
        match self {
            WindowPolicy::Sliding { .. } => sliding,
            WindowPolicy::HighWater { .. } => state.position().unwrap_or(sliding),
        }
    }
}

/// Watermark of one table, threaded through each extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    pub table: String,
    pub state: WatermarkState,
}

impl Watermark {
    pub fn initial(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            state: WatermarkState::Initial,
        }
    }

    /// Successor after an extraction whose window started at `cutoff`.
    ///
    /// Rows move the position to their max `last_updated`; an empty result
    /// leaves the position where it was.
    pub fn advance(&self, rows: &[Record], cutoff: DateTime<Utc>) -> Self {
        let previous = self.state.position().unwrap_or(cutoff);
        let state = match record::max_last_updated(rows) {
            Some(max) => WatermarkState::Active(max.max(previous)),
            None if rows.is_empty() => WatermarkState::Idle(previous),
            None => WatermarkState::Active(previous),
        };
        Self {
            table: self.table.clone(),
            state,
        }
    }

    fn key(table: &str) -> String {
        format!("{WATERMARK_PREFIX}/{table}.json")
    }

    /// Load the persisted watermark for `table`; absent means `Initial`.
    pub async fn load(storage: &StorageProvider, table: &str) -> Result<Self, WatermarkError> {
        match storage.get(&Self::key(table)).await {
            Ok(bytes) => serde_json::from_slice(&bytes).context(WatermarkJsonSnafu { table }),
            Err(err) if err.is_not_found() => Ok(Self::initial(table)),
            Err(source) => Err(source).context(WatermarkStorageSnafu { table }),
        }
    }

    /// Persist this watermark, replacing the previous one.
    pub async fn save(&self, storage: &StorageProvider) -> Result<(), WatermarkError> {
        let bytes = serde_json::to_vec(self).context(WatermarkJsonSnafu {
            table: &self.table,
        })?;
        storage
            .atomic_write(&Self::key(&self.table), bytes)
            .await
            .context(WatermarkStorageSnafu {
                table: &self.table,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 24, h, m, 0).unwrap()
    }

    fn rows(value: serde_json::Value) -> Vec<Record> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_sliding_cutoff_defaults_to_twenty_minutes() {
        let cutoff = WindowPolicy::default().cutoff(&WatermarkState::Active(at(9, 0)), at(12, 0));
        assert_eq!(cutoff, at(11, 40));
    }

    #[test]
    fn test_high_water_uses_position_then_falls_back() {
        let policy = WindowPolicy::HighWater { minutes: 5 };
        assert_eq!(policy.cutoff(&WatermarkState::Idle(at(9, 0)), at(12, 0)), at(9, 0));
        assert_eq!(policy.cutoff(&WatermarkState::Initial, at(12, 0)), at(11, 55));
    }

    #[test]
    fn test_advance_moves_to_max_last_updated() {
        let watermark = Watermark::initial("staff");
        let next = watermark.advance(
            &rows(json!([
                {"staff_id": 1, "last_updated": "2024-05-24T11:45:00"},
                {"staff_id": 2, "last_updated": "2024-05-24T11:50:00"}
            ])),
            at(11, 40),
        );
        assert_eq!(next.state, WatermarkState::Active(at(11, 50)));
    }

    #[test]
    fn test_advance_on_empty_goes_idle_without_moving() {
        let watermark = Watermark {
            table: "staff".into(),
            state: WatermarkState::Active(at(10, 0)),
        };
        let next = watermark.advance(&[], at(11, 40));
        assert_eq!(next.state, WatermarkState::Idle(at(10, 0)));
    }

    #[test]
    fn test_serialization_format() {
        let watermark = Watermark {
            table: "currency".into(),
            state: WatermarkState::Active(at(10, 0)),
        };
        let value = serde_json::to_value(&watermark).unwrap();
        assert_eq!(value["table"], "currency");
        assert_eq!(value["state"]["state"], "Active");
    }

    #[tokio::test]
    async fn test_load_missing_then_save_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let storage =
            StorageProvider::for_url_with_options(temp_dir.path().to_str().unwrap(), HashMap::new())
                .await
                .unwrap();

        let loaded = Watermark::load(&storage, "design").await.unwrap();
        assert!(loaded.state.is_initial());

        let saved = Watermark {
            table: "design".into(),
            state: WatermarkState::Idle(at(8, 30)),
        };
        saved.save(&storage).await.unwrap();

        assert_eq!(Watermark::load(&storage, "design").await.unwrap(), saved);
    }
}
