// src/repair/mod.rs
mod classifier;
mod executor;
mod security;
mod service;

pub use classifier::{
    classify, default_strategy, resolve_strategy, IssueContext, Rule, RULES,
};
pub use executor::{CommandExecutor, ExecutorError, RepairExecutor};
pub use security::{FileScanner, NoopScanner, SecurityFinding, SecurityScanner, Severity};
pub use service::{AutoRepairService, RepairError, RepairTimeouts};
