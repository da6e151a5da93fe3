//! Date dimension synthesized from the sales fact.

use chrono::{Datelike, NaiveDate};
use std::collections::BTreeSet;
use tracing::debug;

use floe_core::record::{Record, normalize_timestamp};

use super::TransformOutput;
use super::fact::DATE_FORMAT;

/// Fact columns holding dates.
const DATE_COLUMNS: &[&str] = &[
    "created_date",
    "last_updated_date",
    "agreed_payment_date",
    "agreed_delivery_date",
];

fn date_row(date: NaiveDate) -> Record {
    let mut row = Record::new();
    row.insert("date_id".into(), date.format(DATE_FORMAT).to_string().into());
    row.insert("year".into(), date.year().into());
    row.insert("month".into(), date.month().into());
    row.insert("day".into(), date.day().into());
    row.insert(
        "day_of_week".into(),
        date.weekday().number_from_monday().into(),
    );
    row.insert("day_name".into(), date.format("%A").to_string().into());
    row.insert("month_name".into(), date.format("%B").to_string().into());
    row.insert("quarter".into(), ((date.month() - 1) / 3 + 1).into());
    row
}

/// One row per distinct date found in the fact's date columns, sorted by
/// `date_id`.
///
/// Absent or unparseable cells contribute nothing.
pub fn date_dimension(facts: &[Record]) -> TransformOutput {
    let mut dates = BTreeSet::new();
    for fact in facts {
        for column in DATE_COLUMNS {
            let Some(value) = fact.get(*column).filter(|v| !v.is_null()) else {
                continue;
            };
            match normalize_timestamp(column, value) {
                Ok(ts) => {
                    dates.insert(ts.date_naive());
                }
                Err(err) => debug!(error = %err, "Ignoring date cell"),
            }
        }
    }

    TransformOutput {
        records: dates.into_iter().map(date_row).collect(),
        skipped: Vec::new(),
    }
}
