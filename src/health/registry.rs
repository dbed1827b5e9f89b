// src/health/registry.rs
use crate::config::Config;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Everything a probe needs to check one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub name: String,
    pub url: Url,
    pub max_response_time_ms: u64,
    pub timeout_ms: u64,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl ServiceDescriptor {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Source of the monitored fleet. Registration and discovery live elsewhere.
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    async fn services(&self) -> Vec<ServiceDescriptor>;

    async fn find(&self, name: &str) -> Option<ServiceDescriptor> {
        self.services().await.into_iter().find(|s| s.name == name)
    }
}

/// Registry backed by the `services` section of the config file.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    services: Vec<ServiceDescriptor>,
}

impl StaticRegistry {
    pub fn new(services: Vec<ServiceDescriptor>) -> Self {
        Self { services }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config
                .services
                .iter()
                .map(|s| s.descriptor(&config.probe))
                .collect(),
        )
    }
}

#[async_trait]
impl ServiceRegistry for StaticRegistry {
    async fn services(&self) -> Vec<ServiceDescriptor> {
        self.services.clone()
    }
}
