//! Star-schema transforms.
//!
//! Each [`TransformKind`] maps one source table (or, for the date dimension,
//! the sales fact) to one output record set. Transforms are pure: the same
//! input always produces the same records. Only the output key carries the
//! invocation timestamp.

mod date;
mod dimension;
mod fact;
mod stage;

pub use date::date_dimension;
pub use dimension::{counterparty, currency, currency_name, location, pass_through};
pub use fact::sales_order;
pub use stage::{TransformStage, TransformedTable, WrittenOutput};

use std::fmt;

use floe_core::RecordError;
use floe_core::record::{CREATED_AT, LAST_UPDATED, Record};
use floe_core::snapshot::key_timestamp;

use chrono::{DateTime, Utc};

/// Output family, which is also the key prefix in the processed store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFamily {
    Fact,
    Dimension,
}

impl OutputFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFamily::Fact => "fact",
            OutputFamily::Dimension => "dimension",
        }
    }

    /// Warehouse table prefix.
    fn table_prefix(&self) -> &'static str {
        match self {
            OutputFamily::Fact => "fact",
            OutputFamily::Dimension => "dim",
        }
    }
}

/// Where a transform's output goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputTarget {
    pub family: OutputFamily,
    pub name: &'static str,
}

impl OutputTarget {
    /// Prefix shared by every encoded object of this target.
    pub fn key_prefix(&self) -> String {
        format!("{}/{}-", self.family.as_str(), self.name)
    }

    /// `<family>/<name>-<timestamp>.parquet`
    pub fn key(&self, now: DateTime<Utc>) -> String {
        format!("{}{}.parquet", self.key_prefix(), key_timestamp(now))
    }

    /// Warehouse table receiving this target, e.g. `dim_currency`.
    pub fn warehouse_table(&self) -> String {
        format!("{}_{}", self.family.table_prefix(), self.name)
    }
}

impl fmt::Display for OutputTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.family.as_str(), self.name)
    }
}

/// The fixed set of star-schema transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransformKind {
    SalesOrder,
    Counterparty,
    Currency,
    Date,
    Design,
    Location,
    Staff,
}

impl TransformKind {
    pub const ALL: [TransformKind; 7] = [
        TransformKind::SalesOrder,
        TransformKind::Counterparty,
        TransformKind::Currency,
        TransformKind::Date,
        TransformKind::Design,
        TransformKind::Location,
        TransformKind::Staff,
    ];

    /// Transform fed by a source table. The date dimension has none.
    pub fn for_table(table: &str) -> Option<Self> {
        Some(match table {
            "sales_order" => TransformKind::SalesOrder,
            "counterparty" => TransformKind::Counterparty,
            "currency" => TransformKind::Currency,
            "design" => TransformKind::Design,
            "address" => TransformKind::Location,
            "staff" => TransformKind::Staff,
            _ => return None,
        })
    }

    pub fn source_table(&self) -> Option<&'static str> {
        match self {
            TransformKind::SalesOrder => Some("sales_order"),
            TransformKind::Counterparty => Some("counterparty"),
            TransformKind::Currency => Some("currency"),
            TransformKind::Design => Some("design"),
            TransformKind::Location => Some("address"),
            TransformKind::Staff => Some("staff"),
            TransformKind::Date => None,
        }
    }

    pub fn target(&self) -> OutputTarget {
        let (family, name) = match self {
            TransformKind::SalesOrder => (OutputFamily::Fact, "sales_order"),
            TransformKind::Counterparty => (OutputFamily::Dimension, "counterparty"),
            TransformKind::Currency => (OutputFamily::Dimension, "currency"),
            TransformKind::Date => (OutputFamily::Dimension, "date"),
            TransformKind::Design => (OutputFamily::Dimension, "design"),
            TransformKind::Location => (OutputFamily::Dimension, "location"),
            TransformKind::Staff => (OutputFamily::Dimension, "staff"),
        };
        OutputTarget { family, name }
    }

    /// Run the transform.
    ///
    /// `records` are the rows of the source table, or the fact rows for the
    /// date dimension. `related` carries join-side rows (addresses for the
    /// counterparty dimension) and is ignored otherwise.
    pub fn apply(&self, records: &[Record], related: &[Record]) -> TransformOutput {
        match self {
            TransformKind::SalesOrder => sales_order(records),
            TransformKind::Counterparty => counterparty(records, related),
            TransformKind::Currency => currency(records),
            TransformKind::Date => date_dimension(records),
            TransformKind::Design | TransformKind::Staff => pass_through(records),
            TransformKind::Location => location(records),
        }
    }
}

/// Records produced by a transform plus the rows it had to drop.
#[derive(Debug, Default)]
pub struct TransformOutput {
    pub records: Vec<Record>,
    pub skipped: Vec<RecordError>,
}

pub(crate) fn is_audit_column(column: &str) -> bool {
    column == CREATED_AT || column == LAST_UPDATED
}
