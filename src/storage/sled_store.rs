// src/storage/sled_store.rs
//! Sled-backed store.
//!
//! Reports and repair actions live in their own trees keyed by
//! `timestamp_millis (u64 BE) ++ id (u64 BE)`, so iteration order is
//! chronological and a retention sweep is a prefix range delete.
//! Policies are keyed by service name. Values are JSON.

use super::{CompactionStats, HealthStore, StorageError};
use crate::models::{HealthCheckReport, HealthPolicy, RepairAction};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::path::Path;
use tracing::warn;

const REPORTS_TREE: &str = "reports";
const REPAIRS_TREE: &str = "repairs";
const POLICIES_TREE: &str = "policies";

#[derive(Clone)]
pub struct SledStore {
    db: sled::Db,
    reports: sled::Tree,
    repairs: sled::Tree,
    policies: sled::Tree,
}

impl SledStore {
    /// Open or create the store at the specified path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Self::from_db(sled::open(path)?)
    }

    /// Store that is removed when dropped
    pub fn temporary() -> Result<Self, StorageError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: sled::Db) -> Result<Self, StorageError> {
        Ok(Self {
            reports: db.open_tree(REPORTS_TREE)?,
            repairs: db.open_tree(REPAIRS_TREE)?,
            policies: db.open_tree(POLICIES_TREE)?,
            db,
        })
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

fn row_key(timestamp: DateTime<Utc>, id: u64) -> [u8; 16] {
    let millis = timestamp.timestamp_millis().max(0) as u64;
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&millis.to_be_bytes());
    key[8..].copy_from_slice(&id.to_be_bytes());
    key
}

fn decode<T: DeserializeOwned>(tree: &str, value: &[u8]) -> Option<T> {
    match serde_json::from_slice(value) {
        Ok(row) => Some(row),
        Err(e) => {
            warn!(tree, error = %e, "skipping undecodable row");
            None
        }
    }
}

fn newest<T: DeserializeOwned>(
    tree: &sled::Tree,
    name: &str,
    limit: usize,
) -> Result<Vec<T>, StorageError> {
    let mut rows = Vec::with_capacity(limit.min(256));
    for item in tree.iter().rev() {
        if rows.len() >= limit {
            break;
        }
        let (_, value) = item?;
        if let Some(row) = decode(name, &value) {
            rows.push(row);
        }
    }
    Ok(rows)
}

fn remove_before(tree: &sled::Tree, cutoff: &[u8; 16]) -> Result<usize, StorageError> {
    let mut deleted = 0;
    for item in tree.range(..&cutoff[..]) {
        let (key, _) = item?;
        if tree.remove(key)?.is_some() {
            deleted += 1;
        }
    }
    Ok(deleted)
}

/// Runs range scans off the async workers.
async fn blocking<T, F>(work: F) -> Result<T, StorageError>
where
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| StorageError::Unavailable(format!("storage task failed: {}", e)))?
}

#[async_trait]
impl HealthStore for SledStore {
    async fn insert_report(&self, report: &HealthCheckReport) -> Result<u64, StorageError> {
        let id = self.db.generate_id()?;
        let mut stored = report.clone();
        stored.id = Some(id);
        self.reports
            .insert(row_key(report.timestamp, id), serde_json::to_vec(&stored)?)?;
        Ok(id)
    }

    async fn recent_reports(&self, limit: usize) -> Result<Vec<HealthCheckReport>, StorageError> {
        newest(&self.reports, REPORTS_TREE, limit)
    }

    async fn reports_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<HealthCheckReport>, StorageError> {
        let reports = self.reports.clone();
        blocking(move || {
            let mut rows = Vec::new();
            for item in reports.range(row_key(since, 0)..) {
                let (_, value) = item?;
                if let Some(report) = decode(REPORTS_TREE, &value) {
                    rows.push(report);
                }
            }
            Ok(rows)
        })
        .await
    }

    async fn insert_repair(&self, action: &RepairAction) -> Result<u64, StorageError> {
        let id = self.db.generate_id()?;
        let mut stored = action.clone();
        stored.id = Some(id);
        self.repairs
            .insert(row_key(action.timestamp, id), serde_json::to_vec(&stored)?)?;
        Ok(id)
    }

    async fn recent_repairs(&self, limit: usize) -> Result<Vec<RepairAction>, StorageError> {
        newest(&self.repairs, REPAIRS_TREE, limit)
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<CompactionStats, StorageError> {
        let cutoff = row_key(cutoff, 0);
        let (reports, repairs) = (self.reports.clone(), self.repairs.clone());
        blocking(move || {
            Ok(CompactionStats {
                reports_deleted: remove_before(&reports, &cutoff)?,
                repairs_deleted: remove_before(&repairs, &cutoff)?,
            })
        })
        .await
    }

    async fn load_policies(&self) -> Result<Vec<HealthPolicy>, StorageError> {
        let mut policies = Vec::new();
        for item in self.policies.iter() {
            let (_, value) = item?;
            if let Some(policy) = decode(POLICIES_TREE, &value) {
                policies.push(policy);
            }
        }
        Ok(policies)
    }

    async fn save_policy(&self, policy: &HealthPolicy) -> Result<(), StorageError> {
        self.policies
            .insert(policy.service.as_bytes(), serde_json::to_vec(policy)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        HealthStatus, IssueType, RepairOutcome, RepairStrategy, ServiceCheckResult, SweepTrigger,
        TriggeredBy,
    };
    use chrono::Duration;
    use uuid::Uuid;

    fn report_at(timestamp: DateTime<Utc>) -> HealthCheckReport {
        HealthCheckReport::new(
            Uuid::new_v4(),
            timestamp,
            SweepTrigger::Scheduled,
            vec![ServiceCheckResult::responded("portal", HealthStatus::Healthy, 200, 30)],
            std::time::Duration::from_millis(30),
        )
    }

    fn repair_at(timestamp: DateTime<Utc>) -> RepairAction {
        RepairAction {
            id: None,
            service: "portal".to_string(),
            issue_type: IssueType::Crash,
            strategy: RepairStrategy::Rebuild,
            outcome: RepairOutcome::Success,
            triggered_by: TriggeredBy::Automatic,
            report_id: None,
            detail: None,
            duration_ms: 1200,
            timestamp,
        }
    }

    #[tokio::test]
    async fn recent_reports_are_newest_first() {
        let store = SledStore::temporary().unwrap();
        let now = Utc::now();

        for minutes in [30, 10, 20] {
            store.insert_report(&report_at(now - Duration::minutes(minutes))).await.unwrap();
        }

        let recent = store.recent_reports(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].timestamp > recent[1].timestamp);
        assert_eq!(recent[0].timestamp, now - Duration::minutes(10));
        assert!(recent.iter().all(|r| r.id.is_some()));
    }

    #[tokio::test]
    async fn delete_before_removes_only_expired_rows() {
        let store = SledStore::temporary().unwrap();
        let now = Utc::now();

        store.insert_report(&report_at(now - Duration::days(31))).await.unwrap();
        store.insert_report(&report_at(now - Duration::days(29))).await.unwrap();
        store.insert_repair(&repair_at(now - Duration::days(40))).await.unwrap();
        store.insert_repair(&repair_at(now - Duration::hours(1))).await.unwrap();

        let stats = store.delete_before(now - Duration::days(30)).await.unwrap();
        assert_eq!(stats.reports_deleted, 1);
        assert_eq!(stats.repairs_deleted, 1);

        let reports = store.recent_reports(10).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].timestamp, now - Duration::days(29));
        assert_eq!(store.recent_repairs(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reports_since_is_chronological() {
        let store = SledStore::temporary().unwrap();
        let now = Utc::now();
        for hours in [5, 1, 3, 30] {
            store.insert_report(&report_at(now - Duration::hours(hours))).await.unwrap();
        }

        let reports = store.reports_since(now - Duration::hours(24)).await.unwrap();
        let timestamps: Vec<_> = reports.iter().map(|r| r.timestamp).collect();
        assert_eq!(
            timestamps,
            vec![
                now - Duration::hours(5),
                now - Duration::hours(3),
                now - Duration::hours(1),
            ]
        );
    }

    #[tokio::test]
    async fn policies_upsert_by_service() {
        let store = SledStore::temporary().unwrap();
        let mut policy = HealthPolicy::default_for("logs", 500);
        store.save_policy(&policy).await.unwrap();

        policy.auto_repair_enabled = true;
        policy.repair_strategy = RepairStrategy::Restart;
        store.save_policy(&policy).await.unwrap();

        let policies = store.load_policies().await.unwrap();
        assert_eq!(policies, vec![policy]);
    }

    #[tokio::test]
    async fn concurrent_writes_during_compaction() {
        let store = std::sync::Arc::new(SledStore::temporary().unwrap());
        let now = Utc::now();
        for day in 31..41 {
            store.insert_report(&report_at(now - Duration::days(day))).await.unwrap();
        }

        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for _ in 0..20 {
                    store.insert_report(&report_at(Utc::now())).await.unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };
        let stats = store.delete_before(now - Duration::days(30)).await.unwrap();
        writer.await.unwrap();

        assert_eq!(stats.reports_deleted, 10);
        assert_eq!(store.recent_reports(100).await.unwrap().len(), 20);
    }
}
