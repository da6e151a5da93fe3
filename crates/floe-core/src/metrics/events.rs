//! Internal events for floe metrics emission.
//!
//! Each event struct represents a measurable occurrence in a pipeline stage.
//! Events implement the `InternalEvent` trait which emits the corresponding
//! Prometheus metric.
//!
//! ## Table Labels
//!
//! Per-table events carry a `table` label (e.g. `"sales_order"`, `"staff"`)
//! so each source table can be followed through the stages.

use metrics::{counter, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Pipeline stage a metric belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extract,
    Dedup,
    Merge,
    Transform,
    Relocate,
    Load,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Extract => "extract",
            Stage::Dedup => "dedup",
            Stage::Merge => "merge",
            Stage::Transform => "transform",
            Stage::Relocate => "relocate",
            Stage::Load => "load",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event emitted when rows are fetched from the source database.
pub struct RowsExtracted {
    pub count: u64,
    pub table: String,
}

impl InternalEvent for RowsExtracted {
    fn emit(self) {
        trace!(count = self.count, table = %self.table, "Rows extracted");
        counter!("floe_rows_extracted_total", "table" => self.table).increment(self.count);
    }
}

/// Event emitted when a snapshot object is written.
pub struct SnapshotWritten {
    pub bytes: u64,
    pub table: String,
}

impl InternalEvent for SnapshotWritten {
    fn emit(self) {
        trace!(bytes = self.bytes, table = %self.table, "Snapshot written");
        counter!("floe_snapshots_written_total", "table" => self.table.clone()).increment(1);
        counter!("floe_snapshot_bytes_written_total", "table" => self.table).increment(self.bytes);
    }
}

/// Why a snapshot was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteReason {
    Duplicate,
    Empty,
}

impl DeleteReason {
    fn as_str(&self) -> &'static str {
        match self {
            DeleteReason::Duplicate => "duplicate",
            DeleteReason::Empty => "empty",
        }
    }
}

/// Event emitted when the deduplicator deletes a snapshot.
pub struct SnapshotDeleted {
    pub reason: DeleteReason,
    pub table: String,
}

impl InternalEvent for SnapshotDeleted {
    fn emit(self) {
        trace!(reason = self.reason.as_str(), table = %self.table, "Snapshot deleted");
        counter!(
            "floe_snapshots_deleted_total",
            "reason" => self.reason.as_str(),
            "table" => self.table
        )
        .increment(1);
    }
}

/// Event emitted when records are appended to a latest snapshot.
pub struct RecordsMerged {
    pub count: u64,
    pub table: String,
}

impl InternalEvent for RecordsMerged {
    fn emit(self) {
        trace!(count = self.count, table = %self.table, "Records merged");
        counter!("floe_records_merged_total", "table" => self.table).increment(self.count);
    }
}

/// Event emitted when a record is skipped as a data fault.
pub struct RecordSkipped {
    pub stage: Stage,
    pub table: String,
}

impl InternalEvent for RecordSkipped {
    fn emit(self) {
        trace!(stage = self.stage.as_str(), table = %self.table, "Record skipped");
        counter!(
            "floe_records_skipped_total",
            "stage" => self.stage.as_str(),
            "table" => self.table
        )
        .increment(1);
    }
}

/// Event emitted when a whole snapshot cannot be parsed and is passed over.
pub struct SnapshotSkipped {
    pub stage: Stage,
    pub table: String,
}

impl InternalEvent for SnapshotSkipped {
    fn emit(self) {
        trace!(stage = self.stage.as_str(), table = %self.table, "Snapshot skipped");
        counter!(
            "floe_snapshots_skipped_total",
            "stage" => self.stage.as_str(),
            "table" => self.table
        )
        .increment(1);
    }
}

/// Event emitted when a transform produces output records.
pub struct RecordsTransformed {
    pub count: u64,
    /// Output target name (e.g. `"dim_currency"`).
    pub target: String,
}

impl InternalEvent for RecordsTransformed {
    fn emit(self) {
        trace!(count = self.count, target = %self.target, "Records transformed");
        counter!("floe_records_transformed_total", "target" => self.target).increment(self.count);
    }
}

/// Event emitted when consumed objects are moved out of `updated/`.
pub struct ObjectsRelocated {
    pub count: u64,
}

impl InternalEvent for ObjectsRelocated {
    fn emit(self) {
        trace!(count = self.count, "Objects relocated");
        counter!("floe_objects_relocated_total").increment(self.count);
    }
}

/// Event emitted when rows are committed to the warehouse.
pub struct RowsLoaded {
    pub count: u64,
    pub table: String,
}

impl InternalEvent for RowsLoaded {
    fn emit(self) {
        trace!(count = self.count, table = %self.table, "Rows loaded");
        counter!("floe_rows_loaded_total", "table" => self.table).increment(self.count);
    }
}

/// Event emitted when a stage gives up on one table.
pub struct TableFailed {
    pub stage: Stage,
    pub table: String,
}

impl InternalEvent for TableFailed {
    fn emit(self) {
        trace!(stage = self.stage.as_str(), table = %self.table, "Table failed");
        counter!(
            "floe_table_failures_total",
            "stage" => self.stage.as_str(),
            "table" => self.table
        )
        .increment(1);
    }
}

/// Event emitted when a stage finishes.
pub struct StageCompleted {
    pub stage: Stage,
    pub duration: Duration,
}

impl InternalEvent for StageCompleted {
    fn emit(self) {
        trace!(
            stage = self.stage.as_str(),
            duration_ms = self.duration.as_millis() as u64,
            "Stage completed"
        );
        histogram!("floe_stage_duration_seconds", "stage" => self.stage.as_str())
            .record(self.duration.as_secs_f64());
    }
}

/// Storage operation type for metrics labeling.
#[derive(Debug, Clone, Copy)]
pub enum StorageOperation {
    Get,
    Head,
    Put,
    Delete,
    List,
    Copy,
    Rename,
}

impl StorageOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::Get => "get",
            StorageOperation::Head => "head",
            StorageOperation::Put => "put",
            StorageOperation::Delete => "delete",
            StorageOperation::List => "list",
            StorageOperation::Copy => "copy",
            StorageOperation::Rename => "rename",
        }
    }
}

/// Request status for metrics labeling.
#[derive(Debug, Clone, Copy)]
pub enum RequestStatus {
    Success,
    Error,
}

impl RequestStatus {
    fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Error => "error",
        }
    }
}

/// Event emitted for each storage request.
pub struct StorageRequest {
    pub operation: StorageOperation,
    pub status: RequestStatus,
}

impl InternalEvent for StorageRequest {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            status = self.status.as_str(),
            "Storage request"
        );
        counter!(
            "floe_storage_requests_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str()
        )
        .increment(1);
    }
}

/// Event emitted with the latency of each storage request.
pub struct StorageRequestDuration {
    pub operation: StorageOperation,
    pub duration: Duration,
}

impl InternalEvent for StorageRequestDuration {
    fn emit(self) {
        histogram!(
            "floe_storage_request_duration_seconds",
            "operation" => self.operation.as_str()
        )
        .record(self.duration.as_secs_f64());
    }
}
