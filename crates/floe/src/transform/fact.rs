//! Sales order fact.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::warn;

use floe_core::RecordError;
use floe_core::record::{CREATED_AT, LAST_UPDATED, Record, normalize_timestamp};

use super::TransformOutput;

pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.f";

fn split(ts: DateTime<Utc>) -> (Value, Value) {
    (
        Value::String(ts.format(DATE_FORMAT).to_string()),
        Value::String(ts.format(TIME_FORMAT).to_string()),
    )
}

fn fact_row(row: &Record) -> Result<Record, RecordError> {
    let mut out = Record::new();
    for (column, value) in row {
        match column.as_str() {
            CREATED_AT => {
                let (date, time) = split(normalize_timestamp(column, value)?);
                out.insert("created_date".into(), date);
                out.insert("created_time".into(), time);
            }
            LAST_UPDATED => {
                let (date, time) = split(normalize_timestamp(column, value)?);
                out.insert("last_updated_date".into(), date);
                out.insert("last_updated_time".into(), time);
            }
            "staff_id" => {
                out.insert("sales_staff_id".into(), value.clone());
            }
            _ => {
                out.insert(column.clone(), value.clone());
            }
        }
    }
    Ok(out)
}

/// Split audit timestamps into date and time parts and rename `staff_id`.
///
/// Rows with an unparseable audit timestamp are skipped.
pub fn sales_order(records: &[Record]) -> TransformOutput {
    let mut output = TransformOutput::default();
    for row in records {
        match fact_row(row) {
            Ok(fact) => output.records.push(fact),
            Err(err) => {
                warn!(error = %err, "Skipping sales order row");
                output.skipped.push(err);
            }
        }
    }
    output
}
