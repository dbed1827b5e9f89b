// src/models/repair.rs
use super::RepairStrategy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    Timeout,
    Crash,
    Dependency,
    Security,
}

impl IssueType {
    pub fn as_str(self) -> &'static str {
        match self {
            IssueType::Timeout => "timeout",
            IssueType::Crash => "crash",
            IssueType::Dependency => "dependency",
            IssueType::Security => "security",
        }
    }
}

impl std::fmt::Display for IssueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairOutcome {
    Success,
    Failed,
    Skipped,
}

impl RepairOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            RepairOutcome::Success => "success",
            RepairOutcome::Failed => "failed",
            RepairOutcome::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggeredBy {
    Automatic,
    Manual,
}

/// Audit record of one repair decision, including skips and no-ops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairAction {
    #[serde(default)]
    pub id: Option<u64>,
    pub service: String,
    pub issue_type: IssueType,
    pub strategy: RepairStrategy,
    pub outcome: RepairOutcome,
    pub triggered_by: TriggeredBy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}
