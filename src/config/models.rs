// src/config/models.rs
use crate::health::ServiceDescriptor;
use crate::models::PolicyPatch;
use serde::Deserialize;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("service `{0}` is registered more than once")]
    DuplicateService(String),

    #[error("service `{service}` depends on unregistered service `{dependency}`")]
    UnknownDependency { service: String, dependency: String },

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub repair: RepairConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
    #[serde(default)]
    pub policies: Vec<PolicySeed>,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for service in &self.services {
            if service.name.trim().is_empty() {
                return Err(invalid("services.name", "must not be empty"));
            }
            if !names.insert(service.name.as_str()) {
                return Err(ConfigError::DuplicateService(service.name.clone()));
            }
            if service.max_response_time_ms == Some(0) {
                return Err(invalid("services.max_response_time_ms", "must be positive"));
            }
            if service.timeout_ms == Some(0) {
                return Err(invalid("services.timeout_ms", "must be positive"));
            }
        }

        for service in &self.services {
            if let Some(dependency) = service.depends_on.iter().find(|d| !names.contains(d.as_str())) {
                return Err(ConfigError::UnknownDependency {
                    service: service.name.clone(),
                    dependency: dependency.clone(),
                });
            }
        }

        if self.scheduler.interval_secs == 0 {
            return Err(invalid("scheduler.interval_secs", "must be positive"));
        }
        if self.scheduler.barrier_timeout_secs == 0 {
            return Err(invalid("scheduler.barrier_timeout_secs", "must be positive"));
        }
        if self.scheduler.max_in_flight == 0 {
            return Err(invalid("scheduler.max_in_flight", "must be positive"));
        }
        if self.scheduler.compaction_interval_secs == 0 {
            return Err(invalid("scheduler.compaction_interval_secs", "must be positive"));
        }
        if self.probe.timeout_ms == 0 || self.probe.max_response_time_ms == 0 {
            return Err(invalid("probe", "timeout and threshold must be positive"));
        }
        if self.storage.retention_days <= 0 {
            return Err(invalid("storage.retention_days", "must be positive"));
        }
        if self.repair.restart_command.is_empty() || self.repair.rebuild_command.is_empty() {
            return Err(invalid("repair", "restart and rebuild commands must not be empty"));
        }
        if self.policies.iter().any(|p| p.service.trim().is_empty()) {
            return Err(invalid("policies.service", "must not be empty"));
        }

        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8090)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub interval_secs: u64,
    pub barrier_timeout_secs: u64,
    pub max_in_flight: usize,
    pub stop_grace_secs: u64,
    pub compaction_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            barrier_timeout_secs: 30,
            max_in_flight: 8,
            stop_grace_secs: 10,
            compaction_interval_secs: 3600,
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn barrier_timeout(&self) -> Duration {
        Duration::from_secs(self.barrier_timeout_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn compaction_interval(&self) -> Duration {
        Duration::from_secs(self.compaction_interval_secs)
    }
}

/// Defaults applied to registered services that do not set their own.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub timeout_ms: u64,
    pub max_response_time_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            max_response_time_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    Sled,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackendKind,
    pub path: PathBuf,
    pub retention_days: i64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::Sled,
            path: PathBuf::from("./data/health.db"),
            retention_days: 30,
        }
    }
}

impl StorageConfig {
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days)
    }
}

/// External command templates; `{service}` is replaced with the service name.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    pub restart_timeout_secs: u64,
    pub rebuild_timeout_secs: u64,
    pub restart_command: Vec<String>,
    pub rebuild_command: Vec<String>,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            restart_timeout_secs: 30,
            rebuild_timeout_secs: 120,
            restart_command: ["docker", "compose", "restart", "{service}"]
                .map(String::from)
                .to_vec(),
            rebuild_command: ["docker", "compose", "up", "-d", "--build", "{service}"]
                .map(String::from)
                .to_vec(),
        }
    }
}

impl RepairConfig {
    pub fn restart_timeout(&self) -> Duration {
        Duration::from_secs(self.restart_timeout_secs)
    }

    pub fn rebuild_timeout(&self) -> Duration {
        Duration::from_secs(self.rebuild_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub findings_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9090,
            path: "/metrics".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub url: Url,
    #[serde(default)]
    pub max_response_time_ms: Option<u64>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl ServiceConfig {
    pub fn descriptor(&self, defaults: &ProbeConfig) -> ServiceDescriptor {
        ServiceDescriptor {
            name: self.name.clone(),
            url: self.url.clone(),
            max_response_time_ms: self
                .max_response_time_ms
                .unwrap_or(defaults.max_response_time_ms),
            timeout_ms: self.timeout_ms.unwrap_or(defaults.timeout_ms),
            depends_on: self.depends_on.clone(),
        }
    }
}

/// Policy written at startup only when the service has none stored yet.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicySeed {
    pub service: String,
    #[serde(flatten)]
    pub patch: PolicyPatch,
}
