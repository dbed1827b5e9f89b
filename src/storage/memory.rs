// src/storage/memory.rs
// In-memory backend for tests and ephemeral runs.

use super::{CompactionStats, HealthStore, StorageError};
use crate::models::{HealthCheckReport, HealthPolicy, RepairAction};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

type RowKey = (i64, u64);

pub struct MemoryStore {
    reports: RwLock<BTreeMap<RowKey, HealthCheckReport>>,
    repairs: RwLock<BTreeMap<RowKey, RepairAction>>,
    policies: RwLock<HashMap<String, HealthPolicy>>,
    next_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            reports: RwLock::new(BTreeMap::new()),
            repairs: RwLock::new(BTreeMap::new()),
            policies: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>, StorageError> {
    lock.read()
        .map_err(|e| StorageError::Unavailable(format!("Lock poisoned: {}", e)))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>, StorageError> {
    lock.write()
        .map_err(|e| StorageError::Unavailable(format!("Lock poisoned: {}", e)))
}

/// Removes expired rows one at a time so writers interleave with compaction.
fn remove_before<V>(
    lock: &RwLock<BTreeMap<RowKey, V>>,
    cutoff: RowKey,
) -> Result<usize, StorageError> {
    let expired: Vec<RowKey> = read(lock)?.range(..cutoff).map(|(key, _)| *key).collect();
    let mut deleted = 0;
    for key in expired {
        if write(lock)?.remove(&key).is_some() {
            deleted += 1;
        }
    }
    Ok(deleted)
}

#[async_trait]
impl HealthStore for MemoryStore {
    async fn insert_report(&self, report: &HealthCheckReport) -> Result<u64, StorageError> {
        let id = self.next_id();
        let mut stored = report.clone();
        stored.id = Some(id);
        write(&self.reports)?.insert((report.timestamp.timestamp_millis(), id), stored);
        Ok(id)
    }

    async fn recent_reports(&self, limit: usize) -> Result<Vec<HealthCheckReport>, StorageError> {
        Ok(read(&self.reports)?.values().rev().take(limit).cloned().collect())
    }

    async fn reports_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<HealthCheckReport>, StorageError> {
        Ok(read(&self.reports)?
            .range((since.timestamp_millis(), 0)..)
            .map(|(_, report)| report.clone())
            .collect())
    }

    async fn insert_repair(&self, action: &RepairAction) -> Result<u64, StorageError> {
        let id = self.next_id();
        let mut stored = action.clone();
        stored.id = Some(id);
        write(&self.repairs)?.insert((action.timestamp.timestamp_millis(), id), stored);
        Ok(id)
    }

    async fn recent_repairs(&self, limit: usize) -> Result<Vec<RepairAction>, StorageError> {
        Ok(read(&self.repairs)?.values().rev().take(limit).cloned().collect())
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<CompactionStats, StorageError> {
        let cutoff = (cutoff.timestamp_millis(), 0);
        Ok(CompactionStats {
            reports_deleted: remove_before(&self.reports, cutoff)?,
            repairs_deleted: remove_before(&self.repairs, cutoff)?,
        })
    }

    async fn load_policies(&self) -> Result<Vec<HealthPolicy>, StorageError> {
        Ok(read(&self.policies)?.values().cloned().collect())
    }

    async fn save_policy(&self, policy: &HealthPolicy) -> Result<(), StorageError> {
        write(&self.policies)?.insert(policy.service.clone(), policy.clone());
        Ok(())
    }
}
