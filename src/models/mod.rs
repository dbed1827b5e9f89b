// src/models/mod.rs
mod policy;
mod repair;
mod report;

pub use policy::{HealthPolicy, PolicyPatch, RepairStrategy, UnknownStrategy};
pub use repair::{IssueType, RepairAction, RepairOutcome, TriggeredBy};
pub use report::{
    HealthCheckReport, HealthStatus, ProbeErrorKind, ReportSummary, ServiceCheckResult,
    SweepTrigger,
};
