// src/policy/mod.rs
//! Per-service health policies.
//!
//! Lookups are served from a sharded in-memory map and never wait on a
//! writer. Writes (default creation and updates) are serialized per service
//! and persisted before they become visible.

use crate::config::PolicySeed;
use crate::locks::ServiceLocks;
use crate::models::{HealthPolicy, PolicyPatch, RepairStrategy};
use crate::storage::{HealthStore, StorageError};
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("invalid policy: {0}")]
    Validation(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub struct HealthPolicyService {
    store: Arc<dyn HealthStore>,
    policies: DashMap<String, HealthPolicy>,
    write_locks: ServiceLocks,
    thresholds: HashMap<String, u64>,
    default_threshold_ms: u64,
}

impl HealthPolicyService {
    /// Loads persisted policies. `thresholds` supplies the registry's latency
    /// threshold per service, used when a default policy is created.
    pub async fn load(
        store: Arc<dyn HealthStore>,
        thresholds: HashMap<String, u64>,
        default_threshold_ms: u64,
    ) -> Result<Self, PolicyError> {
        let policies = DashMap::new();
        for policy in store.load_policies().await? {
            policies.insert(policy.service.clone(), policy);
        }
        debug!(count = policies.len(), "loaded health policies");

        Ok(Self {
            store,
            policies,
            write_locks: ServiceLocks::new(),
            thresholds,
            default_threshold_ms,
        })
    }

    fn default_policy(&self, service: &str) -> HealthPolicy {
        let threshold = self
            .thresholds
            .get(service)
            .copied()
            .unwrap_or(self.default_threshold_ms);
        HealthPolicy::default_for(service, threshold)
    }

    fn cached(&self, service: &str) -> Option<HealthPolicy> {
        self.policies.get(service).map(|p| p.value().clone())
    }

    /// Returns the stored policy, creating and persisting the default once.
    pub async fn get_policy(&self, service: &str) -> Result<HealthPolicy, PolicyError> {
        if let Some(policy) = self.cached(service) {
            return Ok(policy);
        }

        let _guard = self.write_locks.acquire(service).await;
        if let Some(policy) = self.cached(service) {
            return Ok(policy);
        }

        let policy = self.default_policy(service);
        self.store.save_policy(&policy).await?;
        self.policies.insert(service.to_string(), policy.clone());
        info!(service, "created default health policy");
        Ok(policy)
    }

    /// Validates and merges `patch` over the current policy.
    pub async fn update_policy(
        &self,
        service: &str,
        patch: &PolicyPatch,
    ) -> Result<HealthPolicy, PolicyError> {
        let strategy = validate(patch)?;

        let _guard = self.write_locks.acquire(service).await;
        let current = self
            .cached(service)
            .unwrap_or_else(|| self.default_policy(service));
        let updated = current.merged(patch, strategy);

        self.store.save_policy(&updated).await?;
        self.policies.insert(service.to_string(), updated.clone());
        info!(
            service,
            auto_repair = updated.auto_repair_enabled,
            strategy = %updated.repair_strategy,
            "health policy updated"
        );
        Ok(updated)
    }

    pub fn get_all_policies(&self) -> BTreeMap<String, HealthPolicy> {
        self.policies
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Writes configured policies for services that have none yet.
    pub async fn seed(&self, seeds: &[PolicySeed]) -> Result<usize, PolicyError> {
        let mut created = 0;
        for seed in seeds {
            let strategy = validate(&seed.patch)?;

            let _guard = self.write_locks.acquire(&seed.service).await;
            if self.policies.contains_key(&seed.service) {
                continue;
            }
            let policy = self.default_policy(&seed.service).merged(&seed.patch, strategy);
            self.store.save_policy(&policy).await?;
            self.policies.insert(seed.service.clone(), policy);
            created += 1;
        }
        if created > 0 {
            info!(created, "seeded health policies from config");
        }
        Ok(created)
    }
}

fn validate(patch: &PolicyPatch) -> Result<Option<RepairStrategy>, PolicyError> {
    if let Some(ms) = patch.max_response_time_ms {
        if ms <= 0 {
            return Err(PolicyError::Validation(format!(
                "max_response_time_ms must be positive, got {}",
                ms
            )));
        }
    }

    patch
        .repair_strategy
        .as_deref()
        .map(str::parse::<RepairStrategy>)
        .transpose()
        .map_err(|e| PolicyError::Validation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    async fn service() -> (Arc<MemoryStore>, HealthPolicyService) {
        let store = Arc::new(MemoryStore::new());
        let thresholds = HashMap::from([("review".to_string(), 1000)]);
        let policies = HealthPolicyService::load(store.clone(), thresholds, 500)
            .await
            .unwrap();
        (store, policies)
    }

    #[tokio::test]
    async fn default_policy_is_created_once() {
        let (store, policies) = service().await;

        let first = policies.get_policy("review").await.unwrap();
        let second = policies.get_policy("review").await.unwrap();

        assert_eq!(first, second);
        assert!(!first.auto_repair_enabled);
        assert_eq!(first.repair_strategy, RepairStrategy::None);
        assert!(first.alert_on_fail);
        assert_eq!(first.max_response_time_ms, 1000);
        assert_eq!(store.load_policies().await.unwrap(), vec![first]);
    }

    #[tokio::test]
    async fn concurrent_first_lookups_agree() {
        let (_, policies) = service().await;
        let policies = Arc::new(policies);

        let lookups = (0..8).map(|_| {
            let policies = policies.clone();
            tokio::spawn(async move { policies.get_policy("portal").await.unwrap() })
        });
        let results = futures::future::join_all(lookups).await;

        let first = results[0].as_ref().unwrap().clone();
        assert!(results.iter().all(|r| r.as_ref().unwrap() == &first));
        assert_eq!(first.max_response_time_ms, 500);
    }

    #[tokio::test]
    async fn update_merges_over_existing_fields() {
        let (_, policies) = service().await;
        let before = policies.get_policy("logs").await.unwrap();

        let patch = PolicyPatch {
            auto_repair_enabled: Some(true),
            repair_strategy: Some("restart".to_string()),
            ..PolicyPatch::default()
        };
        let updated = policies.update_policy("logs", &patch).await.unwrap();
        let fetched = policies.get_policy("logs").await.unwrap();

        assert_eq!(updated, fetched);
        assert!(fetched.auto_repair_enabled);
        assert_eq!(fetched.repair_strategy, RepairStrategy::Restart);
        assert_eq!(fetched.max_response_time_ms, before.max_response_time_ms);
        assert_eq!(fetched.alert_on_fail, before.alert_on_fail);
        assert_eq!(fetched.alert_on_warn, before.alert_on_warn);
    }

    #[tokio::test]
    async fn invalid_patches_are_rejected_and_not_applied() {
        let (_, policies) = service().await;
        let before = policies.get_policy("portal").await.unwrap();

        let bad_strategy = PolicyPatch {
            repair_strategy: Some("reboot".to_string()),
            ..PolicyPatch::default()
        };
        assert!(matches!(
            policies.update_policy("portal", &bad_strategy).await,
            Err(PolicyError::Validation(_))
        ));

        for ms in [0, -5] {
            let bad_threshold = PolicyPatch {
                max_response_time_ms: Some(ms),
                auto_repair_enabled: Some(true),
                ..PolicyPatch::default()
            };
            assert!(matches!(
                policies.update_policy("portal", &bad_threshold).await,
                Err(PolicyError::Validation(_))
            ));
        }

        assert_eq!(policies.get_policy("portal").await.unwrap(), before);
    }

    #[tokio::test]
    async fn seeds_never_override_stored_policies() {
        let (store, policies) = service().await;
        let existing = policies
            .update_policy(
                "portal",
                &PolicyPatch {
                    alert_on_warn: Some(true),
                    ..PolicyPatch::default()
                },
            )
            .await
            .unwrap();

        let seeds = vec![
            PolicySeed {
                service: "portal".to_string(),
                patch: PolicyPatch {
                    auto_repair_enabled: Some(true),
                    ..PolicyPatch::default()
                },
            },
            PolicySeed {
                service: "analytics".to_string(),
                patch: PolicyPatch {
                    auto_repair_enabled: Some(true),
                    repair_strategy: Some("restart".to_string()),
                    max_response_time_ms: Some(2000),
                    ..PolicyPatch::default()
                },
            },
        ];
        assert_eq!(policies.seed(&seeds).await.unwrap(), 1);

        assert_eq!(policies.get_policy("portal").await.unwrap(), existing);
        let analytics = policies.get_policy("analytics").await.unwrap();
        assert!(analytics.auto_repair_enabled);
        assert_eq!(analytics.max_response_time_ms, 2000);

        let reloaded = HealthPolicyService::load(store, HashMap::new(), 500).await.unwrap();
        assert_eq!(reloaded.get_all_policies().len(), 2);
    }
}
