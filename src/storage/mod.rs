// src/storage/mod.rs
//! Persistence for sweep reports, repair actions and policies.
//!
//! Reports and repair actions are append-only; rows older than the
//! retention window are removed by row-level deletes during compaction,
//! so writers never wait on a sweep.

mod memory;
mod sled_store;

pub use memory::MemoryStore;
pub use sled_store::SledStore;

use crate::models::{HealthCheckReport, HealthPolicy, RepairAction, ServiceCheckResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CompactionStats {
    pub reports_deleted: usize,
    pub repairs_deleted: usize,
}

/// Storage backend for the health subsystem.
#[async_trait]
pub trait HealthStore: Send + Sync {
    /// Appends a report and returns its assigned id.
    async fn insert_report(&self, report: &HealthCheckReport) -> Result<u64, StorageError>;

    /// Newest first.
    async fn recent_reports(&self, limit: usize) -> Result<Vec<HealthCheckReport>, StorageError>;

    /// Oldest first.
    async fn reports_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<HealthCheckReport>, StorageError>;

    async fn insert_repair(&self, action: &RepairAction) -> Result<u64, StorageError>;

    /// Newest first.
    async fn recent_repairs(&self, limit: usize) -> Result<Vec<RepairAction>, StorageError>;

    /// Deletes reports and repair actions strictly older than `cutoff`.
    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<CompactionStats, StorageError>;

    async fn load_policies(&self) -> Result<Vec<HealthPolicy>, StorageError>;

    /// Upsert keyed by service name.
    async fn save_policy(&self, policy: &HealthPolicy) -> Result<(), StorageError>;
}

/// One bucket of a service's trend series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    pub bucket_start: DateTime<Utc>,
    pub samples: usize,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
}

const TREND_BUCKET_SECS: i64 = 3600;
const LATEST_RESULT_LOOKBACK: usize = 10;

pub struct HealthStorageService {
    store: Arc<dyn HealthStore>,
    retention: Duration,
}

impl HealthStorageService {
    pub fn new(store: Arc<dyn HealthStore>, retention: Duration) -> Self {
        Self { store, retention }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub async fn create(&self, report: &HealthCheckReport) -> Result<u64, StorageError> {
        self.store.insert_report(report).await
    }

    pub async fn get_recent(&self, limit: usize) -> Result<Vec<HealthCheckReport>, StorageError> {
        self.store.recent_reports(limit).await
    }

    pub async fn latest_report(&self) -> Result<Option<HealthCheckReport>, StorageError> {
        Ok(self.store.recent_reports(1).await?.into_iter().next())
    }

    /// The service's result from the most recent report that probed it,
    /// along with that report's id.
    pub async fn latest_result_for(
        &self,
        service: &str,
    ) -> Result<Option<(Option<u64>, ServiceCheckResult)>, StorageError> {
        let recent = self.store.recent_reports(LATEST_RESULT_LOOKBACK).await?;
        Ok(recent.into_iter().find_map(|report| {
            let id = report.id;
            report
                .results
                .into_iter()
                .find(|r| r.service == service)
                .map(|r| (id, r))
        }))
    }

    pub async fn get_trends(
        &self,
        service: &str,
        hours: i64,
    ) -> Result<Vec<TrendPoint>, StorageError> {
        self.get_trends_at(service, hours, Utc::now()).await
    }

    /// Hourly buckets over `[now - hours, now]`. A result counts as a
    /// success when the service answered, i.e. its status is not `fail`.
    /// Buckets without samples are omitted.
    pub async fn get_trends_at(
        &self,
        service: &str,
        hours: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<TrendPoint>, StorageError> {
        let since = now - Duration::hours(hours);
        let reports = self.store.reports_since(since).await?;

        // bucket start (unix secs) -> (samples, successes, latency sum)
        let mut buckets: BTreeMap<i64, (usize, usize, u64)> = BTreeMap::new();
        for report in reports.iter().filter(|r| r.timestamp <= now) {
            if let Some(result) = report.result_for(service) {
                let secs = report.timestamp.timestamp();
                let bucket = buckets
                    .entry(secs - secs.rem_euclid(TREND_BUCKET_SECS))
                    .or_default();
                bucket.0 += 1;
                if result.status != crate::models::HealthStatus::Fail {
                    bucket.1 += 1;
                }
                bucket.2 += result.latency_ms;
            }
        }

        Ok(buckets
            .into_iter()
            .filter_map(|(start, (samples, successes, latency_sum))| {
                Some(TrendPoint {
                    bucket_start: DateTime::<Utc>::from_timestamp(start, 0)?,
                    samples,
                    success_rate: successes as f64 / samples as f64,
                    avg_latency_ms: latency_sum as f64 / samples as f64,
                })
            })
            .collect())
    }

    pub async fn record_repair(&self, action: &RepairAction) -> Result<u64, StorageError> {
        self.store.insert_repair(action).await
    }

    pub async fn get_repair_history(
        &self,
        limit: usize,
    ) -> Result<Vec<RepairAction>, StorageError> {
        self.store.recent_repairs(limit).await
    }

    /// Retention sweep. Idempotent.
    pub async fn compact(&self) -> Result<CompactionStats, StorageError> {
        self.compact_at(Utc::now()).await
    }

    pub async fn compact_at(&self, now: DateTime<Utc>) -> Result<CompactionStats, StorageError> {
        self.store.delete_before(now - self.retention).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HealthStatus, ServiceCheckResult, SweepTrigger};
    use uuid::Uuid;

    fn report_at(timestamp: DateTime<Utc>, results: Vec<ServiceCheckResult>) -> HealthCheckReport {
        HealthCheckReport::new(
            Uuid::new_v4(),
            timestamp,
            SweepTrigger::Scheduled,
            results,
            std::time::Duration::from_millis(25),
        )
    }

    fn service() -> HealthStorageService {
        HealthStorageService::new(Arc::new(MemoryStore::new()), Duration::days(30))
    }

    #[tokio::test]
    async fn trends_are_empty_without_data() {
        let storage = service();
        let trends = storage.get_trends("logs", 24).await.unwrap();
        assert!(trends.is_empty());
    }

    #[tokio::test]
    async fn trends_bucket_by_hour() {
        let storage = service();
        let now = DateTime::<Utc>::from_timestamp(1_760_000_000 - 1_760_000_000 % 3600 + 1800, 0).unwrap();

        let samples = [
            (now - Duration::minutes(20), HealthStatus::Healthy, 100),
            (now - Duration::minutes(10), HealthStatus::Fail, 300),
            (now - Duration::minutes(70), HealthStatus::Warn, 1500),
            (now - Duration::hours(30), HealthStatus::Healthy, 10),
        ];
        for (ts, status, latency) in samples {
            let result = ServiceCheckResult::responded("logs", status, 200, latency);
            storage.create(&report_at(ts, vec![result])).await.unwrap();
        }

        let trends = storage.get_trends_at("logs", 24, now).await.unwrap();
        assert_eq!(trends.len(), 2);

        let older = &trends[0];
        assert_eq!(older.samples, 1);
        assert_eq!(older.success_rate, 1.0);
        assert_eq!(older.avg_latency_ms, 1500.0);

        let current = &trends[1];
        assert_eq!(current.samples, 2);
        assert_eq!(current.success_rate, 0.5);
        assert_eq!(current.avg_latency_ms, 200.0);
        assert!(current.bucket_start <= now);
        assert_eq!(current.bucket_start.timestamp() % 3600, 0);

        assert!(storage.get_trends_at("review", 24, now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn compaction_respects_retention_window() {
        let storage = service();
        let now = Utc::now();

        let old = report_at(now - Duration::days(31), Vec::new());
        let recent = report_at(now - Duration::days(29), Vec::new());
        storage.create(&old).await.unwrap();
        let kept_id = storage.create(&recent).await.unwrap();

        let stats = storage.compact_at(now).await.unwrap();
        assert_eq!(stats.reports_deleted, 1);

        let remaining = storage.get_recent(10).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, Some(kept_id));

        let again = storage.compact_at(now).await.unwrap();
        assert_eq!(again, CompactionStats::default());
    }
}
