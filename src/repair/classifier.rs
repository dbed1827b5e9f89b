// src/repair/classifier.rs
//! Issue classification for non-healthy probe results.
//!
//! Rules are evaluated in priority order and the first match wins; when
//! none matches the issue is treated as a crash.

use super::security::SecurityFinding;
use crate::models::{
    HealthPolicy, HealthStatus, IssueType, ProbeErrorKind, RepairStrategy, ServiceCheckResult,
};

/// What is known about a failing service at classification time.
#[derive(Debug, Clone, Copy)]
pub struct IssueContext<'a> {
    pub result: &'a ServiceCheckResult,
    pub policy: &'a HealthPolicy,
    pub findings: &'a [SecurityFinding],
    /// Declared dependencies that were not healthy in the same sweep.
    pub unhealthy_dependencies: &'a [String],
}

pub type Rule = fn(&IssueContext<'_>) -> bool;

pub const RULES: [(IssueType, Rule); 4] = [
    (IssueType::Security, has_security_finding),
    (IssueType::Timeout, exceeded_response_time),
    (IssueType::Crash, not_running),
    (IssueType::Dependency, upstream_unready),
];

const NOT_RUNNING_MARKERS: &[&str] = &["not running", "exited", "killed", "crash"];
const UPSTREAM_MARKERS: &[&str] = &[
    "dependency",
    "database",
    "postgres",
    "cache",
    "redis",
    "upstream",
];

pub fn classify(ctx: &IssueContext<'_>) -> IssueType {
    RULES
        .iter()
        .find(|(_, matches)| matches(ctx))
        .map(|(issue, _)| *issue)
        .unwrap_or(IssueType::Crash)
}

pub fn has_security_finding(ctx: &IssueContext<'_>) -> bool {
    ctx.findings
        .iter()
        .any(|f| f.service == ctx.result.service && f.is_actionable())
}

/// The service answered, only too slowly, or the request ran out of time
/// after connecting.
pub fn exceeded_response_time(ctx: &IssueContext<'_>) -> bool {
    let result = ctx.result;
    result.status == HealthStatus::Warn
        || result.error_kind == Some(ProbeErrorKind::Timeout)
        || (result.http_status.is_some() && result.latency_ms > ctx.policy.max_response_time_ms)
}

pub fn not_running(ctx: &IssueContext<'_>) -> bool {
    ctx.result.error_kind == Some(ProbeErrorKind::ConnectionRefused)
        || detail_mentions(ctx.result, NOT_RUNNING_MARKERS)
}

pub fn upstream_unready(ctx: &IssueContext<'_>) -> bool {
    !ctx.unhealthy_dependencies.is_empty() || detail_mentions(ctx.result, UPSTREAM_MARKERS)
}

fn detail_mentions(result: &ServiceCheckResult, markers: &[&str]) -> bool {
    result
        .error
        .as_deref()
        .map(str::to_lowercase)
        .is_some_and(|detail| markers.iter().any(|m| detail.contains(m)))
}

pub fn default_strategy(issue: IssueType) -> RepairStrategy {
    match issue {
        IssueType::Timeout => RepairStrategy::Restart,
        IssueType::Crash | IssueType::Security => RepairStrategy::Rebuild,
        IssueType::Dependency => RepairStrategy::None,
    }
}

/// Strategy for an automatic repair. A policy strategy other than `none`
/// replaces the per-issue default, except for dependency issues, which are
/// never acted on automatically.
pub fn resolve_strategy(issue: IssueType, policy: &HealthPolicy) -> RepairStrategy {
    match (issue, policy.repair_strategy) {
        (IssueType::Dependency, _) => RepairStrategy::None,
        (_, RepairStrategy::None) => default_strategy(issue),
        (_, configured) => configured,
    }
}
