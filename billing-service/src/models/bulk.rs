//! Bulk operation model.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of work a bulk operation fans out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkOperationKind {
    Send,
    Fetch,
    Generate,
}

impl BulkOperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BulkOperationKind::Send => "send",
            BulkOperationKind::Fetch => "fetch",
            BulkOperationKind::Generate => "generate",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "send" => BulkOperationKind::Send,
            "generate" => BulkOperationKind::Generate,
            _ => BulkOperationKind::Fetch,
        }
    }
}

/// Bulk operation lifecycle.
///
/// `Completed` means every target was attempted, successfully or not.
/// `Failed` is reserved for operations that could not start at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkOperationStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl BulkOperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BulkOperationStatus::Pending => "pending",
            BulkOperationStatus::Running => "running",
            BulkOperationStatus::Completed => "completed",
            BulkOperationStatus::Failed => "failed",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "running" => BulkOperationStatus::Running,
            "completed" => BulkOperationStatus::Completed,
            "failed" => BulkOperationStatus::Failed,
            _ => BulkOperationStatus::Pending,
        }
    }
}

/// Outcome for a single target workspace. Written overwrite-by-key:
/// re-processing a target replaces its entry, never duplicates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TargetOutcome {
    Pending,
    Succeeded {
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    Failed {
        error: String,
    },
}

impl TargetOutcome {
    pub fn succeeded(detail: impl Into<String>) -> Self {
        TargetOutcome::Succeeded {
            detail: Some(detail.into()),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        TargetOutcome::Failed {
            error: error.into(),
        }
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, TargetOutcome::Succeeded { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TargetOutcome::Failed { .. })
    }
}

/// One row per administrative fan-out request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkOperation {
    pub operation_id: Uuid,
    /// The originating (agency) workspace.
    pub workspace_id: Uuid,
    pub kind: String,
    pub target_workspaces: Vec<Uuid>,
    pub status: String,
    pub progress: BTreeMap<Uuid, TargetOutcome>,
    pub succeeded_count: i32,
    pub failed_count: i32,
    /// Set only when the operation could not start.
    pub error_message: Option<String>,
    pub created_by: Uuid,
    pub created_utc: DateTime<Utc>,
    pub started_utc: Option<DateTime<Utc>>,
    pub completed_utc: Option<DateTime<Utc>>,
}

impl BulkOperation {
    /// Aggregate view of the per-target progress map.
    pub fn summary(&self) -> OperationSummary {
        let mut failures = Vec::new();
        let mut succeeded = 0;
        let mut failed = 0;
        for (workspace_id, outcome) in &self.progress {
            match outcome {
                TargetOutcome::Succeeded { .. } => succeeded += 1,
                TargetOutcome::Failed { error } => {
                    failed += 1;
                    failures.push(TargetFailure {
                        workspace_id: *workspace_id,
                        error: error.clone(),
                    });
                }
                TargetOutcome::Pending => {}
            }
        }
        OperationSummary {
            total: self.target_workspaces.len(),
            succeeded,
            failed,
            failures,
        }
    }
}

/// Input for creating a bulk operation.
#[derive(Debug, Clone)]
pub struct CreateBulkOperation {
    pub workspace_id: Uuid,
    pub kind: BulkOperationKind,
    pub target_workspaces: Vec<Uuid>,
    pub created_by: Uuid,
}

/// Aggregate counts plus failing targets with reasons.
#[derive(Debug, Clone, Serialize)]
pub struct OperationSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<TargetFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetFailure {
    pub workspace_id: Uuid,
    pub error: String,
}
