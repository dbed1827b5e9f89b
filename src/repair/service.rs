// src/repair/service.rs
use super::classifier::{classify, resolve_strategy, IssueContext};
use super::executor::RepairExecutor;
use super::security::SecurityScanner;
use crate::config::RepairConfig;
use crate::events::{EventBroadcaster, HealthEvent};
use crate::health::ServiceRegistry;
use crate::locks::ServiceLocks;
use crate::metrics::MetricsCollector;
use crate::models::{
    HealthPolicy, IssueType, RepairAction, RepairOutcome, RepairStrategy, ServiceCheckResult,
    TriggeredBy,
};
use crate::policy::{HealthPolicyService, PolicyError};
use crate::storage::{HealthStorageService, StorageError};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum RepairError {
    #[error("unknown service `{0}`")]
    UnknownService(String),

    #[error("auto-repair is disabled by policy for `{service}`")]
    Rejected { service: String },

    #[error("strategy `none` cannot be executed")]
    InvalidStrategy,

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, Copy)]
pub struct RepairTimeouts {
    pub restart: Duration,
    pub rebuild: Duration,
}

impl RepairTimeouts {
    pub fn from_config(config: &RepairConfig) -> Self {
        Self {
            restart: config.restart_timeout(),
            rebuild: config.rebuild_timeout(),
        }
    }

    pub fn for_strategy(&self, strategy: RepairStrategy) -> Duration {
        match strategy {
            RepairStrategy::Rebuild => self.rebuild,
            RepairStrategy::Restart | RepairStrategy::None => self.restart,
        }
    }
}

impl Default for RepairTimeouts {
    fn default() -> Self {
        Self {
            restart: Duration::from_secs(30),
            rebuild: Duration::from_secs(120),
        }
    }
}

struct RepairPlan<'a> {
    service: &'a str,
    issue_type: IssueType,
    strategy: RepairStrategy,
    triggered_by: TriggeredBy,
    report_id: Option<u64>,
}

/// Decides how to remediate failing services and hands the work to the
/// repair executor. Every decision is recorded, skips included.
pub struct AutoRepairService {
    executor: Arc<dyn RepairExecutor>,
    scanner: Arc<dyn SecurityScanner>,
    registry: Arc<dyn ServiceRegistry>,
    policies: Arc<HealthPolicyService>,
    storage: Arc<HealthStorageService>,
    events: EventBroadcaster,
    metrics: Option<Arc<MetricsCollector>>,
    locks: ServiceLocks,
    timeouts: RepairTimeouts,
}

impl AutoRepairService {
    pub fn new(
        executor: Arc<dyn RepairExecutor>,
        scanner: Arc<dyn SecurityScanner>,
        registry: Arc<dyn ServiceRegistry>,
        policies: Arc<HealthPolicyService>,
        storage: Arc<HealthStorageService>,
        events: EventBroadcaster,
        timeouts: RepairTimeouts,
    ) -> Self {
        Self {
            executor,
            scanner,
            registry,
            policies,
            storage,
            events,
            metrics: None,
            locks: ServiceLocks::new(),
            timeouts,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    async fn classify_result(
        &self,
        result: &ServiceCheckResult,
        policy: &HealthPolicy,
        unhealthy_dependencies: &[String],
    ) -> IssueType {
        let findings = self.scanner.findings(&result.service).await;
        classify(&IssueContext {
            result,
            policy,
            findings: &findings,
            unhealthy_dependencies,
        })
    }

    /// Automatic path, called by the scheduler for a non-healthy result
    /// whose policy enables auto-repair.
    pub async fn handle(
        &self,
        report_id: Option<u64>,
        result: &ServiceCheckResult,
        unhealthy_dependencies: &[String],
        policy: &HealthPolicy,
    ) -> RepairAction {
        let issue_type = self
            .classify_result(result, policy, unhealthy_dependencies)
            .await;
        let strategy = resolve_strategy(issue_type, policy);

        self.execute(RepairPlan {
            service: &result.service,
            issue_type,
            strategy,
            triggered_by: TriggeredBy::Automatic,
            report_id,
        })
        .await
    }

    /// Operator-requested repair. An explicit strategy runs as given; without
    /// one the policy must allow auto-repair and the strategy is derived
    /// from the latest probe result.
    pub async fn manual_repair(
        &self,
        service: &str,
        strategy: Option<RepairStrategy>,
    ) -> Result<RepairAction, RepairError> {
        if strategy == Some(RepairStrategy::None) {
            return Err(RepairError::InvalidStrategy);
        }
        if self.registry.find(service).await.is_none() {
            return Err(RepairError::UnknownService(service.to_string()));
        }

        let policy = self.policies.get_policy(service).await?;
        if strategy.is_none() && !policy.auto_repair_enabled {
            return Err(RepairError::Rejected {
                service: service.to_string(),
            });
        }

        let latest = match self.storage.latest_result_for(service).await {
            Ok(latest) => latest.filter(|(_, result)| !result.status.is_healthy()),
            Err(e) => {
                warn!(service, error = %e, "could not load latest result for manual repair");
                None
            }
        };
        let (report_id, issue_type) = match &latest {
            Some((report_id, result)) => (*report_id, self.classify_result(result, &policy, &[]).await),
            None => (None, IssueType::Crash),
        };
        let strategy = strategy.unwrap_or_else(|| resolve_strategy(issue_type, &policy));

        Ok(self
            .execute(RepairPlan {
                service,
                issue_type,
                strategy,
                triggered_by: TriggeredBy::Manual,
                report_id,
            })
            .await)
    }

    async fn execute(&self, plan: RepairPlan<'_>) -> RepairAction {
        let started = Instant::now();

        let (outcome, detail) = if plan.strategy == RepairStrategy::None {
            (
                RepairOutcome::Skipped,
                Some(format!("{} issue: no automated action", plan.issue_type)),
            )
        } else {
            match self.locks.try_acquire(plan.service) {
                None => (
                    RepairOutcome::Skipped,
                    Some("repair already in flight".to_string()),
                ),
                Some(_guard) => {
                    let limit = self.timeouts.for_strategy(plan.strategy);
                    info!(
                        service = plan.service,
                        issue = %plan.issue_type,
                        strategy = %plan.strategy,
                        "executing repair"
                    );
                    match timeout(limit, self.executor.execute(plan.service, plan.strategy)).await {
                        Ok(Ok(())) => (RepairOutcome::Success, None),
                        Ok(Err(e)) => (RepairOutcome::Failed, Some(e.to_string())),
                        Err(_) => (
                            RepairOutcome::Failed,
                            Some(format!("repair timed out after {}s", limit.as_secs())),
                        ),
                    }
                }
            }
        };

        let mut action = RepairAction {
            id: None,
            service: plan.service.to_string(),
            issue_type: plan.issue_type,
            strategy: plan.strategy,
            outcome,
            triggered_by: plan.triggered_by,
            report_id: plan.report_id,
            detail,
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        };

        match outcome {
            RepairOutcome::Failed => warn!(
                service = %action.service,
                strategy = %action.strategy,
                detail = action.detail.as_deref().unwrap_or_default(),
                "repair failed"
            ),
            _ => info!(
                service = %action.service,
                strategy = %action.strategy,
                outcome = outcome.as_str(),
                "repair recorded"
            ),
        }

        match self.storage.record_repair(&action).await {
            Ok(id) => action.id = Some(id),
            Err(e) => error!(service = %action.service, error = %e, "failed to persist repair action"),
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_repair(&action);
        }
        self.events.publish(HealthEvent::Repair(action.clone()));

        action
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{ServiceDescriptor, StaticRegistry};
    use crate::models::{HealthCheckReport, HealthStatus, PolicyPatch, ProbeErrorKind, SweepTrigger};
    use crate::repair::executor::ExecutorError;
    use crate::repair::security::NoopScanner;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    struct FakeExecutor {
        calls: Mutex<Vec<(String, RepairStrategy)>>,
        delay: Duration,
        failure: Option<String>,
        started: Notify,
    }

    impl FakeExecutor {
        fn new(delay: Duration, failure: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                delay,
                failure: failure.map(str::to_string),
                started: Notify::new(),
            })
        }

        fn calls(&self) -> Vec<(String, RepairStrategy)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RepairExecutor for FakeExecutor {
        async fn execute(&self, service: &str, strategy: RepairStrategy) -> Result<(), ExecutorError> {
            self.calls.lock().unwrap().push((service.to_string(), strategy));
            self.started.notify_one();
            tokio::time::sleep(self.delay).await;
            match &self.failure {
                Some(msg) => Err(ExecutorError::Other(msg.clone())),
                None => Ok(()),
            }
        }
    }

    struct Fixture {
        repair: Arc<AutoRepairService>,
        policies: Arc<HealthPolicyService>,
        storage: Arc<HealthStorageService>,
        events: EventBroadcaster,
    }

    fn descriptor(name: &str) -> ServiceDescriptor {
        ServiceDescriptor {
            name: name.to_string(),
            url: format!("http://{}.internal/health", name).parse().unwrap(),
            max_response_time_ms: 1000,
            timeout_ms: 5000,
            depends_on: Vec::new(),
        }
    }

    async fn fixture(executor: Arc<FakeExecutor>) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let storage = Arc::new(HealthStorageService::new(store.clone(), chrono::Duration::days(30)));
        let policies = Arc::new(
            HealthPolicyService::load(store, HashMap::new(), 1000)
                .await
                .unwrap(),
        );
        let registry = Arc::new(StaticRegistry::new(
            ["portal", "logs", "analytics"].iter().map(|s| descriptor(s)).collect(),
        ));
        let events = EventBroadcaster::new(16);
        let repair = Arc::new(AutoRepairService::new(
            executor,
            Arc::new(NoopScanner),
            registry,
            policies.clone(),
            storage.clone(),
            events.clone(),
            RepairTimeouts::default(),
        ));
        Fixture {
            repair,
            policies,
            storage,
            events,
        }
    }

    async fn enable(policies: &HealthPolicyService, service: &str, strategy: &str) -> HealthPolicy {
        policies
            .update_policy(
                service,
                &PolicyPatch {
                    auto_repair_enabled: Some(true),
                    repair_strategy: Some(strategy.to_string()),
                    ..PolicyPatch::default()
                },
            )
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn second_failure_during_active_repair_is_skipped() {
        let executor = FakeExecutor::new(Duration::from_secs(10), None);
        let fx = fixture(executor.clone()).await;
        let policy = enable(&fx.policies, "portal", "restart").await;
        let result = ServiceCheckResult::failed("portal", ProbeErrorKind::ConnectionRefused, "connection refused", 3);

        let first = tokio::spawn({
            let repair = fx.repair.clone();
            let result = result.clone();
            let policy = policy.clone();
            async move { repair.handle(Some(1), &result, &[], &policy).await }
        });
        executor.started.notified().await;

        let second = fx.repair.handle(Some(2), &result, &[], &policy).await;
        assert_eq!(second.outcome, RepairOutcome::Skipped);
        assert_eq!(second.detail.as_deref(), Some("repair already in flight"));

        let first = first.await.unwrap();
        assert_eq!(first.outcome, RepairOutcome::Success);
        assert_eq!(first.strategy, RepairStrategy::Restart);
        assert_eq!(executor.calls().len(), 1);

        let history = fx.storage.get_repair_history(10).await.unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn executor_failure_is_recorded_without_retry() {
        let executor = FakeExecutor::new(Duration::ZERO, Some("compose exited 1"));
        let fx = fixture(executor.clone()).await;
        let policy = enable(&fx.policies, "portal", "none").await;
        let result = ServiceCheckResult::failed("portal", ProbeErrorKind::ConnectionRefused, "connection refused", 3);

        let action = fx.repair.handle(None, &result, &[], &policy).await;
        assert_eq!(action.issue_type, IssueType::Crash);
        assert_eq!(action.strategy, RepairStrategy::Rebuild);
        assert_eq!(action.outcome, RepairOutcome::Failed);
        assert_eq!(action.detail.as_deref(), Some("compose exited 1"));
        assert_eq!(executor.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_executor_times_out_as_failed() {
        let executor = FakeExecutor::new(Duration::from_secs(45), None);
        let fx = fixture(executor.clone()).await;
        let policy = enable(&fx.policies, "logs", "restart").await;
        let result = ServiceCheckResult::failed("logs", ProbeErrorKind::Timeout, "Request timeout after 5000ms", 5000);

        let action = fx.repair.handle(None, &result, &[], &policy).await;
        assert_eq!(action.outcome, RepairOutcome::Failed);
        assert_eq!(action.detail.as_deref(), Some("repair timed out after 30s"));
    }

    #[tokio::test]
    async fn dependency_issue_is_recorded_as_noop() {
        let executor = FakeExecutor::new(Duration::ZERO, None);
        let fx = fixture(executor.clone()).await;
        let mut events = fx.events.subscribe();
        let policy = enable(&fx.policies, "logs", "rebuild").await;
        let result = ServiceCheckResult::responded("logs", HealthStatus::Fail, 503, 20);

        let action = fx
            .repair
            .handle(None, &result, &["postgres".to_string()], &policy)
            .await;
        assert_eq!(action.issue_type, IssueType::Dependency);
        assert_eq!(action.strategy, RepairStrategy::None);
        assert_eq!(action.outcome, RepairOutcome::Skipped);
        assert!(action.id.is_some());
        assert!(executor.calls().is_empty());

        match events.recv().await.unwrap() {
            HealthEvent::Repair(published) => assert_eq!(published, action),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn manual_strategy_bypasses_disabled_policy() {
        let executor = FakeExecutor::new(Duration::ZERO, None);
        let fx = fixture(executor.clone()).await;

        let action = fx
            .repair
            .manual_repair("analytics", Some(RepairStrategy::Rebuild))
            .await
            .unwrap();
        assert_eq!(action.triggered_by, TriggeredBy::Manual);
        assert_eq!(action.strategy, RepairStrategy::Rebuild);
        assert_eq!(action.outcome, RepairOutcome::Success);
        assert_eq!(
            executor.calls(),
            vec![("analytics".to_string(), RepairStrategy::Rebuild)]
        );
    }

    #[tokio::test]
    async fn manual_without_strategy_follows_policy() {
        let executor = FakeExecutor::new(Duration::ZERO, None);
        let fx = fixture(executor.clone()).await;

        let err = fx.repair.manual_repair("logs", None).await.unwrap_err();
        assert!(matches!(err, RepairError::Rejected { .. }));
        assert!(matches!(
            fx.repair.manual_repair("logs", Some(RepairStrategy::None)).await,
            Err(RepairError::InvalidStrategy)
        ));
        assert!(matches!(
            fx.repair.manual_repair("billing", Some(RepairStrategy::Restart)).await,
            Err(RepairError::UnknownService(_))
        ));
        assert!(executor.calls().is_empty());

        // enabled policy, latest result timed out -> default restart
        fx.policies
            .update_policy(
                "logs",
                &PolicyPatch {
                    auto_repair_enabled: Some(true),
                    ..PolicyPatch::default()
                },
            )
            .await
            .unwrap();
        let report = HealthCheckReport::new(
            uuid::Uuid::new_v4(),
            Utc::now(),
            SweepTrigger::Scheduled,
            vec![ServiceCheckResult::failed("logs", ProbeErrorKind::Timeout, "Request timeout after 5000ms", 5000)],
            Duration::from_secs(5),
        );
        let report_id = fx.storage.create(&report).await.unwrap();

        let action = fx.repair.manual_repair("logs", None).await.unwrap();
        assert_eq!(action.issue_type, IssueType::Timeout);
        assert_eq!(action.strategy, RepairStrategy::Restart);
        assert_eq!(action.report_id, Some(report_id));
    }
}
