use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::options::ExecutionMode;
use crate::error::ItemFailure;
use crate::observe::ExecutionMetrics;
use crate::transport::Response;
use crate::validate::ValidationResult;

/// Overall outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Partial,
    Failed,
}

impl ExecutionStatus {
    /// `success` when nothing failed and every item is accounted for,
    /// `failed` when nothing succeeded, `partial` otherwise.
    pub fn derive(total: usize, successful: usize, failed: usize, skipped: usize) -> Self {
        if failed == 0 && successful + skipped == total {
            ExecutionStatus::Success
        } else if successful == 0 {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Partial
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Partial => "partial",
            ExecutionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Aggregated outcome of one `execute` / `execute_workflow` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub id: String,
    pub mode: ExecutionMode,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Workflow steps whose condition was not met
    #[serde(default)]
    pub skipped: usize,
    /// Keyed by `request_{i}` for item runs, by step id for workflows
    pub responses: IndexMap<String, Response>,
    pub validations: IndexMap<String, ValidationResult>,
    pub errors: IndexMap<String, ItemFailure>,
    #[serde(default)]
    pub metrics: Option<ExecutionMetrics>,
    pub started_at_ms: u64,
    pub duration_ms: u64,
    pub status: ExecutionStatus,
    /// Steps dependency leveling could not place
    #[serde(default)]
    pub unscheduled: Vec<String>,
    /// The run stopped dispatching because it was aborted
    #[serde(default)]
    pub cancelled: bool,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    /// Items that were never dispatched (stopped early, aborted)
    pub fn not_dispatched(&self) -> usize {
        self.total
            .saturating_sub(self.successful + self.failed + self.skipped)
    }

    pub fn response(&self, key: &str) -> Option<&Response> {
        self.responses.get(key)
    }

    pub fn error(&self, key: &str) -> Option<&ItemFailure> {
        self.errors.get(key)
    }
}
