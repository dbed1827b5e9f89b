// src/health/probe.rs
use super::ServiceDescriptor;
use crate::models::{HealthStatus, ProbeErrorKind, ServiceCheckResult};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Instant;
use tokio::time::timeout;
use tracing::debug;

/// Runs one health check against one service. Implementations never fail:
/// every problem is folded into a `fail` result.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, service: &ServiceDescriptor) -> ServiceCheckResult;
}

/// Latency rule for a successful response. The threshold itself is still healthy.
pub fn status_for_latency(latency_ms: u64, threshold_ms: u64) -> HealthStatus {
    if latency_ms <= threshold_ms {
        HealthStatus::Healthy
    } else {
        HealthStatus::Warn
    }
}

/// HTTP prober: GET on the service's health URL, bounded by its timeout.
#[derive(Debug, Clone)]
pub struct HealthProbe {
    client: Client,
}

impl HealthProbe {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .pool_max_idle_per_host(0)
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Prober for HealthProbe {
    async fn probe(&self, service: &ServiceDescriptor) -> ServiceCheckResult {
        let start = Instant::now();

        let result = timeout(
            service.timeout(),
            self.client.get(service.url.as_str()).send(),
        )
        .await;

        let latency_ms = start.elapsed().as_millis() as u64;

        let check = match result {
            Ok(Ok(response)) => {
                let code = response.status();
                let status = if code.is_success() {
                    status_for_latency(latency_ms, service.max_response_time_ms)
                } else {
                    HealthStatus::Fail
                };
                ServiceCheckResult::responded(&service.name, status, code.as_u16(), latency_ms)
            }
            Ok(Err(e)) => ServiceCheckResult::failed(
                &service.name,
                error_kind(&e),
                e.to_string(),
                latency_ms,
            ),
            Err(_) => ServiceCheckResult::failed(
                &service.name,
                ProbeErrorKind::Timeout,
                format!("Request timeout after {}ms", service.timeout_ms),
                latency_ms,
            ),
        };

        debug!(
            service = %service.name,
            status = %check.status,
            latency_ms,
            "probe finished"
        );
        check
    }
}

fn error_kind(err: &reqwest::Error) -> ProbeErrorKind {
    if err.is_connect() {
        if is_connection_refused(err) {
            ProbeErrorKind::ConnectionRefused
        } else {
            ProbeErrorKind::Connection
        }
    } else if err.is_timeout() {
        ProbeErrorKind::Timeout
    } else {
        ProbeErrorKind::Other
    }
}

fn is_connection_refused(err: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        source = cause.source();
    }
    false
}
