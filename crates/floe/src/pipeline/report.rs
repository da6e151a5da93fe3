use floe_core::metrics::events::Stage;

use crate::transform::WrittenOutput;

/// What one stage did, by table (or by prefix for dedup, by key for
/// relocation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub stage: Stage,
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    /// Nothing to do: empty extraction, no transform, nothing to load.
    pub skipped: Vec<String>,
    /// Objects removed by dedup.
    pub deleted: usize,
}

impl StageReport {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            succeeded: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            deleted: 0,
        }
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Transform stage result, carrying what relocation needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformReport {
    pub report: StageReport,
    pub outputs: Vec<WrittenOutput>,
    /// `updated/` keys of tables that transformed cleanly.
    pub consumed: Vec<String>,
}

impl Default for TransformReport {
    fn default() -> Self {
        Self {
            report: StageReport::new(Stage::Transform),
            outputs: Vec::new(),
            consumed: Vec::new(),
        }
    }
}
