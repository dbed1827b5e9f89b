// src/models/policy.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairStrategy {
    Restart,
    Rebuild,
    None,
}

impl RepairStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            RepairStrategy::Restart => "restart",
            RepairStrategy::Rebuild => "rebuild",
            RepairStrategy::None => "none",
        }
    }
}

impl std::fmt::Display for RepairStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown repair strategy `{0}` (expected restart, rebuild or none)")]
pub struct UnknownStrategy(pub String);

impl FromStr for RepairStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "restart" => Ok(RepairStrategy::Restart),
            "rebuild" => Ok(RepairStrategy::Rebuild),
            "none" => Ok(RepairStrategy::None),
            other => Err(UnknownStrategy(other.to_string())),
        }
    }
}

/// Per-service repair and alerting configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthPolicy {
    pub service: String,
    pub max_response_time_ms: u64,
    pub auto_repair_enabled: bool,
    pub repair_strategy: RepairStrategy,
    pub alert_on_warn: bool,
    pub alert_on_fail: bool,
    pub updated_at: DateTime<Utc>,
}

impl HealthPolicy {
    pub fn default_for(service: impl Into<String>, max_response_time_ms: u64) -> Self {
        Self {
            service: service.into(),
            max_response_time_ms,
            auto_repair_enabled: false,
            repair_strategy: RepairStrategy::None,
            alert_on_warn: false,
            alert_on_fail: true,
            updated_at: Utc::now(),
        }
    }

    /// Applies an already validated patch; unspecified fields keep their value.
    pub fn merged(&self, patch: &PolicyPatch, strategy: Option<RepairStrategy>) -> Self {
        Self {
            service: self.service.clone(),
            max_response_time_ms: patch
                .max_response_time_ms
                .map(|ms| ms as u64)
                .unwrap_or(self.max_response_time_ms),
            auto_repair_enabled: patch.auto_repair_enabled.unwrap_or(self.auto_repair_enabled),
            repair_strategy: strategy.unwrap_or(self.repair_strategy),
            alert_on_warn: patch.alert_on_warn.unwrap_or(self.alert_on_warn),
            alert_on_fail: patch.alert_on_fail.unwrap_or(self.alert_on_fail),
            updated_at: Utc::now(),
        }
    }
}

/// Partial update as received from the API or a config seed. Kept loosely
/// typed so that bad values surface as validation errors, not parse errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyPatch {
    #[serde(default)]
    pub max_response_time_ms: Option<i64>,
    #[serde(default)]
    pub auto_repair_enabled: Option<bool>,
    #[serde(default)]
    pub repair_strategy: Option<String>,
    #[serde(default)]
    pub alert_on_warn: Option<bool>,
    #[serde(default)]
    pub alert_on_fail: Option<bool>,
}
