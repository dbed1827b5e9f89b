// src/models/report.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Outcome of a single probe. Ordered from best to worst so the overall
/// status of a report is simply the maximum of its results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warn,
    Fail,
}

impl HealthStatus {
    pub fn is_healthy(self) -> bool {
        self == HealthStatus::Healthy
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Warn => "warn",
            HealthStatus::Fail => "fail",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeErrorKind {
    Timeout,
    ConnectionRefused,
    Connection,
    HttpStatus,
    Cancelled,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceCheckResult {
    pub service: String,
    pub status: HealthStatus,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ProbeErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl ServiceCheckResult {
    /// A probe that received an HTTP response.
    pub fn responded(
        service: impl Into<String>,
        status: HealthStatus,
        http_status: u16,
        latency_ms: u64,
    ) -> Self {
        let (error_kind, error) = if status == HealthStatus::Fail {
            (Some(ProbeErrorKind::HttpStatus), Some(format!("HTTP {}", http_status)))
        } else {
            (None, None)
        };

        Self {
            service: service.into(),
            status,
            latency_ms,
            http_status: Some(http_status),
            error_kind,
            error,
            checked_at: Utc::now(),
        }
    }

    /// A probe that never got a response.
    pub fn failed(
        service: impl Into<String>,
        kind: ProbeErrorKind,
        detail: impl Into<String>,
        latency_ms: u64,
    ) -> Self {
        Self {
            service: service.into(),
            status: HealthStatus::Fail,
            latency_ms,
            http_status: None,
            error_kind: Some(kind),
            error: Some(detail.into()),
            checked_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepTrigger {
    Scheduled,
    Manual,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total: usize,
    pub healthy: usize,
    pub warn: usize,
    pub fail: usize,
}

impl ReportSummary {
    fn tally(results: &[ServiceCheckResult]) -> Self {
        results.iter().fold(
            Self {
                total: results.len(),
                ..Self::default()
            },
            |mut summary, result| {
                match result.status {
                    HealthStatus::Healthy => summary.healthy += 1,
                    HealthStatus::Warn => summary.warn += 1,
                    HealthStatus::Fail => summary.fail += 1,
                }
                summary
            },
        )
    }
}

/// Aggregate outcome of one sweep. Immutable once persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckReport {
    #[serde(default)]
    pub id: Option<u64>,
    pub sweep_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub triggered_by: SweepTrigger,
    pub status: HealthStatus,
    pub duration_ms: u64,
    pub summary: ReportSummary,
    pub results: Vec<ServiceCheckResult>,
}

impl HealthCheckReport {
    pub fn new(
        sweep_id: Uuid,
        timestamp: DateTime<Utc>,
        triggered_by: SweepTrigger,
        results: Vec<ServiceCheckResult>,
        duration: Duration,
    ) -> Self {
        let status = results
            .iter()
            .map(|r| r.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        Self {
            id: None,
            sweep_id,
            timestamp,
            triggered_by,
            status,
            duration_ms: duration.as_millis() as u64,
            summary: ReportSummary::tally(&results),
            results,
        }
    }

    pub fn result_for(&self, service: &str) -> Option<&ServiceCheckResult> {
        self.results.iter().find(|r| r.service == service)
    }

    pub fn unhealthy(&self) -> impl Iterator<Item = &ServiceCheckResult> {
        self.results.iter().filter(|r| !r.status.is_healthy())
    }
}
