//! Dimension transforms over a single source table.

use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

use floe_core::record::{self, Record};

use super::{TransformOutput, is_audit_column};

/// Counterparty columns that never reach the dimension.
const COUNTERPARTY_DROPPED: &[&str] =
    &["commercial_contact", "delivery_contact", "legal_address_id"];

/// Address columns copied onto a counterparty, with their output names.
const LEGAL_ADDRESS_FIELDS: &[(&str, &str)] = &[
    ("address_line_1", "counterparty_legal_address_line_1"),
    ("address_line_2", "counterparty_legal_address_line_2"),
    ("district", "counterparty_legal_district"),
    ("city", "counterparty_legal_city"),
    ("postal_code", "counterparty_legal_postal_code"),
    ("country", "counterparty_legal_country"),
    ("phone", "counterparty_legal_phone_number"),
];

fn without_audit(row: &Record) -> Record {
    row.iter()
        .filter(|(column, _)| !is_audit_column(column))
        .map(|(column, value)| (column.clone(), value.clone()))
        .collect()
}

/// Drop audit columns, keep everything else (design, staff).
pub fn pass_through(records: &[Record]) -> TransformOutput {
    TransformOutput {
        records: records.iter().map(without_audit).collect(),
        skipped: Vec::new(),
    }
}

/// Rename `address_id` to `location_id` and drop audit columns.
pub fn location(records: &[Record]) -> TransformOutput {
    let records = records
        .iter()
        .map(|row| {
            row.iter()
                .filter(|(column, _)| !is_audit_column(column))
                .map(|(column, value)| {
                    let column = if column == "address_id" {
                        "location_id".to_string()
                    } else {
                        column.clone()
                    };
                    (column, value.clone())
                })
                .collect()
        })
        .collect();

    TransformOutput {
        records,
        skipped: Vec::new(),
    }
}

/// Display name of a currency code.
pub fn currency_name(code: &str) -> Option<&'static str> {
    match code {
        "USD" => Some("US Dollar"),
        "EUR" => Some("Euro"),
        "GBP" => Some("British Pound"),
        _ => None,
    }
}

/// Add `currency_name` after `currency_code` and drop audit columns.
///
/// Unknown codes get a null name.
pub fn currency(records: &[Record]) -> TransformOutput {
    let records = records
        .iter()
        .map(|row| {
            let mut out = Record::new();
            for (column, value) in row {
                if is_audit_column(column) {
                    continue;
                }
                out.insert(column.clone(), value.clone());
                if column == "currency_code" {
                    let name = value.as_str().and_then(|code| currency_name(code.trim()));
                    out.insert(
                        "currency_name".into(),
                        name.map_or(Value::Null, |n| Value::String(n.to_string())),
                    );
                }
            }
            out
        })
        .collect();

    TransformOutput {
        records,
        skipped: Vec::new(),
    }
}

/// Enrich counterparties with their legal address.
///
/// A counterparty whose `legal_address_id` matches no address keeps its own
/// columns only.
pub fn counterparty(records: &[Record], addresses: &[Record]) -> TransformOutput {
    let by_id: HashMap<i64, &Record> = addresses
        .iter()
        .filter_map(|a| record::primary_key(a, "address").ok().map(|id| (id, a)))
        .collect();

    let records = records
        .iter()
        .map(|row| {
            let mut out: Record = row
                .iter()
                .filter(|(column, _)| {
                    !is_audit_column(column) && !COUNTERPARTY_DROPPED.contains(&column.as_str())
                })
                .map(|(column, value)| (column.clone(), value.clone()))
                .collect();

            let address = row
                .get("legal_address_id")
                .and_then(Value::as_i64)
                .and_then(|id| by_id.get(&id));

            match address {
                Some(address) => {
                    for (field, renamed) in LEGAL_ADDRESS_FIELDS {
                        let value = address.get(*field).cloned().unwrap_or(Value::Null);
                        out.insert((*renamed).to_string(), value);
                    }
                }
                None => debug!(
                    counterparty_id = ?row.get("counterparty_id"),
                    "No legal address match for counterparty"
                ),
            }
            out
        })
        .collect();

    TransformOutput {
        records,
        skipped: Vec::new(),
    }
}
