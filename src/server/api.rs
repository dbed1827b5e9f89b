// src/server/api.rs
use crate::events::EventBroadcaster;
use crate::models::{PolicyPatch, RepairOutcome, RepairStrategy, SweepTrigger};
use crate::policy::{HealthPolicyService, PolicyError};
use crate::repair::{AutoRepairService, RepairError};
use crate::scheduler::{HealthScheduler, SchedulerError};
use crate::storage::{HealthStorageService, StorageError};
use hyper::header::{HeaderValue, CACHE_CONTROL, CONTENT_TYPE};
use hyper::{Body, Method, Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::ops::RangeInclusive;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, warn};

const DEFAULT_LIMIT: usize = 50;
const LIMIT_RANGE: RangeInclusive<usize> = 1..=1000;
const DEFAULT_HOURS: i64 = 24;
const HOURS_RANGE: RangeInclusive<i64> = 1..=720;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Not Found")]
    NotFound,

    #[error("Method Not Allowed")]
    MethodNotAllowed,

    #[error("failed to read request body: {0}")]
    Body(#[from] hyper::Error),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Repair(#[from] RepairError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::Body(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Policy(PolicyError::Validation(_)) => StatusCode::BAD_REQUEST,
            ApiError::Repair(RepairError::UnknownService(_)) => StatusCode::NOT_FOUND,
            ApiError::Repair(RepairError::Rejected { .. }) => StatusCode::FORBIDDEN,
            ApiError::Repair(RepairError::InvalidStrategy) => StatusCode::BAD_REQUEST,
            ApiError::Scheduler(_) => StatusCode::CONFLICT,
            ApiError::Policy(PolicyError::Storage(_))
            | ApiError::Repair(RepairError::Policy(_))
            | ApiError::Repair(RepairError::Storage(_))
            | ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RepairRequest {
    #[serde(default)]
    strategy: Option<String>,
}

/// REST and event-stream surface of the health subsystem.
pub struct HealthApi {
    scheduler: Arc<HealthScheduler>,
    storage: Arc<HealthStorageService>,
    policies: Arc<HealthPolicyService>,
    repair: Arc<AutoRepairService>,
    events: EventBroadcaster,
}

impl HealthApi {
    pub fn new(
        scheduler: Arc<HealthScheduler>,
        storage: Arc<HealthStorageService>,
        policies: Arc<HealthPolicyService>,
        repair: Arc<AutoRepairService>,
        events: EventBroadcaster,
    ) -> Self {
        Self {
            scheduler,
            storage,
            policies,
            repair,
            events,
        }
    }

    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        debug!(%method, %path, "api request");

        match self.route(req).await {
            Ok(response) => response,
            Err(err) => {
                let status = err.status();
                if status.is_server_error() {
                    error!(%method, %path, error = %err, "api request failed");
                } else {
                    debug!(%method, %path, %status, error = %err, "api request rejected");
                }
                json_response(status, &json!({ "success": false, "error": err.to_string() }))
            }
        }
    }

    async fn route(&self, req: Request<Body>) -> Result<Response<Body>, ApiError> {
        let method = req.method().clone();
        let path = req.uri().path().trim_matches('/').to_string();
        let query = req.uri().query().unwrap_or_default().to_string();
        let segments: Vec<&str> = path.split('/').collect();

        match (&method, segments.as_slice()) {
            (&Method::GET, ["healthz"]) => Ok(json_response(StatusCode::OK, &json!({ "status": "ok" }))),
            (&Method::GET, ["health", "history"]) => {
                let limit = query_param(&query, "limit", DEFAULT_LIMIT, LIMIT_RANGE);
                let reports = self.storage.get_recent(limit).await?;
                Ok(list_response(&reports, reports.len()))
            }
            (&Method::GET, ["health", "trends", service]) => {
                let hours = query_param(&query, "hours", DEFAULT_HOURS, HOURS_RANGE);
                let trends = self.storage.get_trends(service, hours).await?;
                Ok(json_response(
                    StatusCode::OK,
                    &json!({
                        "success": true,
                        "service": service,
                        "hours": hours,
                        "data": trends,
                        "count": trends.len(),
                    }),
                ))
            }
            (&Method::GET, ["health", "policies"]) => {
                let policies = self.policies.get_all_policies();
                Ok(list_response(&policies, policies.len()))
            }
            (&Method::GET, ["health", "policies", service]) => {
                let policy = self.policies.get_policy(service).await?;
                Ok(data_response(&policy))
            }
            (&Method::PUT, ["health", "policies", service]) => {
                let service = service.to_string();
                let patch: PolicyPatch = read_json(req).await?;
                let policy = self.policies.update_policy(&service, &patch).await?;
                Ok(json_response(
                    StatusCode::OK,
                    &json!({
                        "success": true,
                        "message": "Policy updated successfully",
                        "data": policy,
                    }),
                ))
            }
            (&Method::GET, ["health", "repairs"]) => {
                let limit = query_param(&query, "limit", DEFAULT_LIMIT, LIMIT_RANGE);
                let repairs = self.storage.get_repair_history(limit).await?;
                Ok(list_response(&repairs, repairs.len()))
            }
            (&Method::POST, ["health", "repair", service]) => {
                let service = service.to_string();
                self.manual_repair(&service, req).await
            }
            (&Method::POST, ["health", "check"]) => {
                let report = self.scheduler.run_sweep(SweepTrigger::Manual).await?;
                Ok(data_response(&report))
            }
            (&Method::GET, ["health", "stream"]) => Ok(self.stream()),
            (_, ["healthz"])
            | (_, ["health", "history" | "policies" | "repairs" | "check" | "stream"])
            | (_, ["health", "trends" | "policies" | "repair", _]) => Err(ApiError::MethodNotAllowed),
            _ => Err(ApiError::NotFound),
        }
    }

    async fn manual_repair(
        &self,
        service: &str,
        req: Request<Body>,
    ) -> Result<Response<Body>, ApiError> {
        let request: RepairRequest = read_json_or_default(req).await?;
        let strategy = request
            .strategy
            .as_deref()
            .map(str::parse::<RepairStrategy>)
            .transpose()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;

        let action = self.repair.manual_repair(service, strategy).await?;
        let (status, body) = match action.outcome {
            RepairOutcome::Success => (
                StatusCode::OK,
                json!({ "success": true, "message": "Repair completed", "data": action }),
            ),
            RepairOutcome::Skipped => (
                StatusCode::CONFLICT,
                json!({
                    "success": false,
                    "error": "Repair skipped",
                    "detail": action.detail,
                    "data": action,
                }),
            ),
            RepairOutcome::Failed => (
                StatusCode::BAD_GATEWAY,
                json!({
                    "success": false,
                    "error": "Repair failed",
                    "detail": action.detail,
                    "data": action,
                }),
            ),
        };
        Ok(json_response(status, &body))
    }

    /// Server-Sent Events, one JSON event per `data:` line.
    fn stream(&self) -> Response<Body> {
        let rx = self.events.subscribe();
        let events = futures::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => match event.to_json() {
                        Ok(json) => {
                            return Some((Ok::<_, Infallible>(format!("data: {}\n\n", json)), rx))
                        }
                        Err(e) => warn!(error = %e, "failed to encode health event"),
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event stream subscriber lagged");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        });

        let mut response = Response::new(Body::wrap_stream(events));
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        response
    }
}

/// Out-of-range or unparsable values fall back to the default.
fn query_param<T>(query: &str, name: &str, default: T, range: RangeInclusive<T>) -> T
where
    T: std::str::FromStr + PartialOrd,
{
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == name)
        .and_then(|(_, value)| value.parse::<T>().ok())
        .filter(|value| range.contains(value))
        .unwrap_or(default)
}

async fn read_json<T: DeserializeOwned>(req: Request<Body>) -> Result<T, ApiError> {
    let bytes = hyper::body::to_bytes(req.into_body()).await?;
    serde_json::from_slice(&bytes)
        .map_err(|e| ApiError::BadRequest(format!("Invalid request body: {}", e)))
}

async fn read_json_or_default<T: DeserializeOwned + Default>(
    req: Request<Body>,
) -> Result<T, ApiError> {
    let bytes = hyper::body::to_bytes(req.into_body()).await?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(&bytes)
        .map_err(|e| ApiError::BadRequest(format!("Invalid request body: {}", e)))
}

fn data_response<T: Serialize>(data: &T) -> Response<Body> {
    json_response(StatusCode::OK, &json!({ "success": true, "data": data }))
}

fn list_response<T: Serialize>(items: &T, count: usize) -> Response<Body> {
    json_response(
        StatusCode::OK,
        &json!({ "success": true, "data": items, "count": count }),
    )
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Body> {
    let (status, bytes) = match serde_json::to_vec(body) {
        Ok(bytes) => (status, bytes),
        Err(e) => {
            error!(error = %e, "failed to encode response body");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                br#"{"success":false,"error":"Internal Server Error"}"#.to_vec(),
            )
        }
    };

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_params_fall_back_to_defaults() {
        assert_eq!(query_param("", "limit", DEFAULT_LIMIT, LIMIT_RANGE), 50);
        assert_eq!(query_param("limit=10", "limit", DEFAULT_LIMIT, LIMIT_RANGE), 10);
        assert_eq!(query_param("limit=0", "limit", DEFAULT_LIMIT, LIMIT_RANGE), 50);
        assert_eq!(query_param("limit=5000", "limit", DEFAULT_LIMIT, LIMIT_RANGE), 50);
        assert_eq!(query_param("limit=abc", "limit", DEFAULT_LIMIT, LIMIT_RANGE), 50);
        assert_eq!(query_param("x=1&hours=48", "hours", DEFAULT_HOURS, HOURS_RANGE), 48);
        assert_eq!(query_param("hours=721", "hours", DEFAULT_HOURS, HOURS_RANGE), 24);
    }

    #[test]
    fn errors_map_to_distinct_statuses() {
        assert_eq!(ApiError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::Repair(RepairError::Rejected {
                service: "logs".to_string()
            })
            .status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::Policy(PolicyError::Validation("bad".to_string())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Scheduler(SchedulerError::ConcurrentSweepSkipped).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::Storage(StorageError::Unavailable("down".to_string())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
