// src/repair/security.rs
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityFinding {
    pub service: String,
    pub id: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl SecurityFinding {
    /// Only high and critical findings drive remediation.
    pub fn is_actionable(&self) -> bool {
        self.severity >= Severity::High
    }
}

/// Source of vulnerability findings, produced outside this subsystem.
#[async_trait]
pub trait SecurityScanner: Send + Sync {
    async fn findings(&self, service: &str) -> Vec<SecurityFinding>;
}

pub struct NoopScanner;

#[async_trait]
impl SecurityScanner for NoopScanner {
    async fn findings(&self, _service: &str) -> Vec<SecurityFinding> {
        Vec::new()
    }
}

/// Reads a JSON array of findings exported by an external scanner. The file
/// is re-read on every lookup so a fresh export is picked up without restart.
pub struct FileScanner {
    path: PathBuf,
}

impl FileScanner {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SecurityScanner for FileScanner {
    async fn findings(&self, service: &str) -> Vec<SecurityFinding> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "cannot read security findings");
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<SecurityFinding>>(&contents) {
            Ok(findings) => findings.into_iter().filter(|f| f.service == service).collect(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "malformed security findings");
                Vec::new()
            }
        }
    }
}
