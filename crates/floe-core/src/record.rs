//! Row-level data model.
//!
//! A [`Record`] is one row of a source table: an insertion-ordered map of
//! column name to scalar JSON value. Snapshot files hold a JSON array of
//! records.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use snafu::prelude::*;

use crate::error::{
    InvalidPrimaryKeySnafu, JsonParseSnafu, JsonSerializeSnafu, MissingPrimaryKeySnafu,
    RecordError, UnparseableTimestampSnafu, UnsupportedShapeSnafu,
};

/// One row, with column order preserved.
pub type Record = serde_json::Map<String, Value>;

/// Audit column holding the row creation time.
pub const CREATED_AT: &str = "created_at";
/// Audit column holding the row modification time.
pub const LAST_UPDATED: &str = "last_updated";

/// Primary-key column name for a table, by convention `<table>_id`.
pub fn primary_key_column(table: &str) -> String {
    format!("{table}_id")
}

/// Integer primary key of `record` for `table`.
pub fn primary_key(record: &Record, table: &str) -> Result<i64, RecordError> {
    let column = primary_key_column(table);
    let value = record
        .get(&column)
        .filter(|v| !v.is_null())
        .context(MissingPrimaryKeySnafu { column: &column })?;

    value.as_i64().context(InvalidPrimaryKeySnafu {
        column: &column,
        value: value.to_string(),
    })
}

/// Parse snapshot bytes into records.
///
/// Accepts a bare array of objects or an object wrapping a single array
/// (`{"staff": [...]}`).
pub fn parse_records(bytes: &[u8]) -> Result<Vec<Record>, RecordError> {
    let value: Value = serde_json::from_slice(bytes).context(JsonParseSnafu)?;

    let rows = match value {
        Value::Array(rows) => rows,
        Value::Object(mut wrapper) if wrapper.len() == 1 => {
            match wrapper.values_mut().next().map(Value::take) {
                Some(Value::Array(rows)) => rows,
                _ => {
                    return UnsupportedShapeSnafu {
                        message: "wrapper key does not hold an array",
                    }
                    .fail();
                }
            }
        }
        other => {
            return UnsupportedShapeSnafu {
                message: format!("expected an array of records, found {}", kind(&other)),
            }
            .fail();
        }
    };

    rows.into_iter()
        .map(|row| match row {
            Value::Object(record) => Ok(record),
            other => UnsupportedShapeSnafu {
                message: format!("expected a record object, found {}", kind(&other)),
            }
            .fail(),
        })
        .collect()
}

/// Serialize records as a JSON array.
pub fn encode_records(records: &[Record]) -> Result<Vec<u8>, RecordError> {
    serde_json::to_vec(records).context(JsonSerializeSnafu)
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Normalize a timestamp cell to UTC.
///
/// Both encodings found in snapshots are accepted: epoch milliseconds and
/// ISO-8601 strings (with or without `T`, fraction, or offset). Date-only
/// strings resolve to midnight. Naive values are taken as UTC.
pub fn normalize_timestamp(column: &str, value: &Value) -> Result<DateTime<Utc>, RecordError> {
    let parsed = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .and_then(DateTime::from_timestamp_millis),
        Value::String(s) => parse_timestamp_str(s.trim()),
        _ => None,
    };

    parsed.context(UnparseableTimestampSnafu {
        column,
        value: value.to_string(),
    })
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Some(dt) = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
    {
        return Some(dt.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Largest normalized `last_updated` across `records`, ignoring bad cells.
pub fn max_last_updated(records: &[Record]) -> Option<DateTime<Utc>> {
    records
        .iter()
        .filter_map(|r| r.get(LAST_UPDATED))
        .filter_map(|v| normalize_timestamp(LAST_UPDATED, v).ok())
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_parse_array_and_wrapper() {
        let bare = parse_records(br#"[{"staff_id": 1}, {"staff_id": 2}]"#).unwrap();
        assert_eq!(bare.len(), 2);

        let wrapped = parse_records(br#"{"staff": [{"staff_id": 1}]}"#).unwrap();
        assert_eq!(wrapped.len(), 1);
        assert_eq!(wrapped[0]["staff_id"], json!(1));
    }

    #[test]
    fn test_parse_rejects_scalars_and_wide_wrappers() {
        assert!(parse_records(b"42").is_err());
        assert!(parse_records(br#"{"a": [], "b": []}"#).is_err());
        assert!(parse_records(br#"[1, 2]"#).is_err());
    }

    #[test]
    fn test_column_order_preserved() {
        let records = parse_records(br#"[{"z": 1, "a": 2, "m": 3}]"#).unwrap();
        let columns: Vec<_> = records[0].keys().map(String::as_str).collect();
        assert_eq!(columns, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_normalize_epoch_millis_and_strings() {
        let expected = Utc.with_ymd_and_hms(2022, 11, 3, 14, 20, 52).unwrap()
            + chrono::Duration::milliseconds(186);

        let from_millis = normalize_timestamp("created_at", &json!(1667485252186i64)).unwrap();
        assert_eq!(from_millis, expected);

        for s in [
            "2022-11-03T14:20:52.186",
            "2022-11-03 14:20:52.186",
            "2022-11-03T14:20:52.186Z",
            "2022-11-03T14:20:52.186+00:00",
        ] {
            assert_eq!(normalize_timestamp("created_at", &json!(s)).unwrap(), expected, "{s}");
        }
    }

    #[test]
    fn test_normalize_date_only_and_failures() {
        let midnight = normalize_timestamp("d", &json!("2023-01-15")).unwrap();
        assert_eq!(midnight, Utc.with_ymd_and_hms(2023, 1, 15, 0, 0, 0).unwrap());

        assert!(normalize_timestamp("d", &json!("yesterday")).is_err());
        assert!(normalize_timestamp("d", &json!(true)).is_err());
    }

    #[test]
    fn test_primary_key() {
        let r = record(json!({"currency_id": 3}));
        assert_eq!(primary_key(&r, "currency").unwrap(), 3);

        let missing = record(json!({"id": 3}));
        assert!(matches!(
            primary_key(&missing, "currency"),
            Err(RecordError::MissingPrimaryKey { .. })
        ));

        let text = record(json!({"currency_id": "3"}));
        assert!(matches!(
            primary_key(&text, "currency"),
            Err(RecordError::InvalidPrimaryKey { .. })
        ));
    }

    #[test]
    fn test_max_last_updated_skips_bad_cells() {
        let records = vec![
            record(json!({"last_updated": "2022-11-03T14:20:52.186"})),
            record(json!({"last_updated": "garbage"})),
            record(json!({"last_updated": 1700000000000i64})),
        ];
        let max = max_last_updated(&records).unwrap();
        assert_eq!(max.timestamp_millis(), 1700000000000);
    }
}
