// src/scheduler/mod.rs
//! Timer-driven health sweeps.
//!
//! A sweep probes every registered service with bounded concurrency, waits
//! for all probes or the sweep barrier, persists the report, evaluates
//! policies and triggers repairs, then broadcasts the report. Sweeps never
//! overlap: a tick that fires mid-sweep is skipped.

use crate::config::SchedulerConfig;
use crate::events::{Alert, EventBroadcaster, HealthEvent};
use crate::health::{Prober, ServiceDescriptor, ServiceRegistry};
use crate::metrics::MetricsCollector;
use crate::models::{
    HealthCheckReport, HealthStatus, ProbeErrorKind, ServiceCheckResult, SweepTrigger,
};
use crate::policy::HealthPolicyService;
use crate::repair::AutoRepairService;
use crate::storage::{CompactionStats, HealthStorageService, StorageError};
use chrono::Utc;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, interval_at, sleep_until, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("a health sweep is already running")]
    ConcurrentSweepSkipped,

    #[error("scheduler already started")]
    AlreadyStarted,
}

/// Marks the scheduler idle again when the sweep ends, however it ends.
struct SweepGuard<'a> {
    running: &'a watch::Sender<bool>,
}

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.running.send_replace(false);
    }
}

pub struct HealthScheduler {
    config: SchedulerConfig,
    registry: Arc<dyn ServiceRegistry>,
    prober: Arc<dyn Prober>,
    storage: Arc<HealthStorageService>,
    policies: Arc<HealthPolicyService>,
    repair: Arc<AutoRepairService>,
    events: EventBroadcaster,
    metrics: Option<Arc<MetricsCollector>>,
    running: watch::Sender<bool>,
    cancel_tx: watch::Sender<bool>,
    shutdown_tx: watch::Sender<bool>,
    ticker: Mutex<Option<JoinHandle<JoinSet<()>>>>,
}

impl HealthScheduler {
    pub fn new(
        config: SchedulerConfig,
        registry: Arc<dyn ServiceRegistry>,
        prober: Arc<dyn Prober>,
        storage: Arc<HealthStorageService>,
        policies: Arc<HealthPolicyService>,
        repair: Arc<AutoRepairService>,
        events: EventBroadcaster,
    ) -> Self {
        Self {
            config,
            registry,
            prober,
            storage,
            policies,
            repair,
            events,
            metrics: None,
            running: watch::channel(false).0,
            cancel_tx: watch::channel(false).0,
            shutdown_tx: watch::channel(false).0,
            ticker: Mutex::new(None),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Spawns the tick loop. The first sweep runs immediately.
    pub fn start(self: &Arc<Self>) -> Result<(), SchedulerError> {
        let mut ticker = self.ticker.lock().unwrap_or_else(PoisonError::into_inner);
        if ticker.is_some() {
            return Err(SchedulerError::AlreadyStarted);
        }

        self.shutdown_tx.send_replace(false);
        self.cancel_tx.send_replace(false);
        // Subscribed before spawning so a stop() racing the first poll is seen.
        let shutdown_rx = self.shutdown_tx.subscribe();
        let scheduler = self.clone();
        *ticker = Some(tokio::spawn(async move { scheduler.run(shutdown_rx).await }));
        Ok(())
    }

    /// Returns the sweeps still in flight when shutdown was requested.
    async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) -> JoinSet<()> {
        let mut ticks = interval(self.config.interval());
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let compaction_every = self.config.compaction_interval();
        let mut compaction = interval_at(
            tokio::time::Instant::now() + compaction_every,
            compaction_every,
        );
        compaction.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sweeps = JoinSet::new();

        info!(
            "Starting health scheduler with interval: {:?}",
            self.config.interval()
        );

        loop {
            tokio::select! {
                biased;
                _ = signalled(&mut shutdown_rx) => {
                    info!("Health scheduler shutting down");
                    break;
                }
                Some(joined) = sweeps.join_next(), if !sweeps.is_empty() => {
                    if let Err(e) = joined {
                        error!("Scheduled sweep task failed: {}", e);
                    }
                }
                _ = ticks.tick() => {
                    let scheduler = self.clone();
                    sweeps.spawn(async move { scheduler.scheduled_sweep().await });
                }
                _ = compaction.tick() => {
                    if let Err(e) = self.compact().await {
                        error!("Retention compaction failed: {}", e);
                    }
                }
            }
        }
        sweeps
    }

    async fn scheduled_sweep(&self) {
        if *self.shutdown_tx.borrow() {
            debug!("scheduler stopping, dropping tick");
            return;
        }
        match self.run_sweep(SweepTrigger::Scheduled).await {
            Ok(_) => {}
            Err(SchedulerError::ConcurrentSweepSkipped) => {
                warn!("Previous sweep still running, skipping tick");
                if let Some(metrics) = &self.metrics {
                    metrics.record_skipped_sweep();
                }
            }
            Err(e) => error!("Scheduled sweep failed: {}", e),
        }
    }

    fn begin_sweep(&self) -> Option<SweepGuard<'_>> {
        let acquired = self.running.send_if_modified(|running| {
            if *running {
                false
            } else {
                *running = true;
                true
            }
        });
        acquired.then(|| SweepGuard {
            running: &self.running,
        })
    }

    /// Runs one full sweep now, unless one is already in progress.
    pub async fn run_sweep(
        &self,
        trigger: SweepTrigger,
    ) -> Result<HealthCheckReport, SchedulerError> {
        let _guard = self
            .begin_sweep()
            .ok_or(SchedulerError::ConcurrentSweepSkipped)?;

        let sweep_id = Uuid::new_v4();
        let timestamp = Utc::now();
        let started = Instant::now();
        let services = self.registry.services().await;
        debug!(%sweep_id, ?trigger, services = services.len(), "health sweep started");

        let results = self.probe_all(&services).await;
        let cancelled = *self.cancel_tx.borrow();

        let mut report =
            HealthCheckReport::new(sweep_id, timestamp, trigger, results, started.elapsed());
        match self.storage.create(&report).await {
            Ok(id) => report.id = Some(id),
            Err(e) => {
                error!(%sweep_id, error = %e, "failed to persist health report");
                if let Some(metrics) = &self.metrics {
                    metrics.record_persist_failure();
                }
            }
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_sweep(&report);
        }

        if cancelled {
            warn!(%sweep_id, "sweep cancelled by shutdown, skipping repair evaluation");
        } else {
            self.evaluate(&report, &services).await;
        }

        self.events.publish(HealthEvent::Report(report.clone()));
        info!(
            "Health sweep complete: {} healthy, {} warn, {} fail in {}ms",
            report.summary.healthy, report.summary.warn, report.summary.fail, report.duration_ms
        );
        Ok(report)
    }

    /// Results come back in registry order, one per service.
    async fn probe_all(&self, services: &[ServiceDescriptor]) -> Vec<ServiceCheckResult> {
        let permits = Arc::new(Semaphore::new(self.config.max_in_flight));
        let barrier = self.config.barrier_timeout();
        let deadline = tokio::time::Instant::now() + barrier;

        let handles: Vec<JoinHandle<ServiceCheckResult>> = services
            .iter()
            .cloned()
            .map(|service| {
                let prober = self.prober.clone();
                let permits = permits.clone();
                tokio::spawn(async move {
                    let _permit = permits.acquire_owned().await.ok();
                    prober.probe(&service).await
                })
            })
            .collect();

        let mut cancel_rx = self.cancel_tx.subscribe();
        let mut results = Vec::with_capacity(services.len());
        for (service, mut handle) in services.iter().zip(handles) {
            let result = tokio::select! {
                biased;
                joined = &mut handle => match joined {
                    Ok(result) => result,
                    Err(e) => ServiceCheckResult::failed(
                        &service.name,
                        ProbeErrorKind::Other,
                        format!("probe task failed: {}", e),
                        0,
                    ),
                },
                _ = signalled(&mut cancel_rx) => {
                    handle.abort();
                    ServiceCheckResult::failed(
                        &service.name,
                        ProbeErrorKind::Cancelled,
                        "probe cancelled by shutdown",
                        0,
                    )
                }
                _ = sleep_until(deadline) => {
                    handle.abort();
                    ServiceCheckResult::failed(
                        &service.name,
                        ProbeErrorKind::Timeout,
                        format!("sweep barrier timeout after {}s", barrier.as_secs()),
                        barrier.as_millis() as u64,
                    )
                }
            };

            if !result.status.is_healthy() {
                debug!(
                    service = %result.service,
                    status = %result.status,
                    error = result.error.as_deref().unwrap_or_default(),
                    "service not healthy"
                );
            }
            results.push(result);
        }
        results
    }

    async fn evaluate(&self, report: &HealthCheckReport, services: &[ServiceDescriptor]) {
        let unhealthy: HashSet<&str> = report.unhealthy().map(|r| r.service.as_str()).collect();

        let evaluations = report.unhealthy().map(|result| {
            let dependencies: Vec<String> = services
                .iter()
                .find(|s| s.name == result.service)
                .map(|s| {
                    s.depends_on
                        .iter()
                        .filter(|d| unhealthy.contains(d.as_str()))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            self.evaluate_result(report.id, result, dependencies)
        });
        join_all(evaluations).await;
    }

    async fn evaluate_result(
        &self,
        report_id: Option<u64>,
        result: &ServiceCheckResult,
        unhealthy_dependencies: Vec<String>,
    ) {
        let policy = match self.policies.get_policy(&result.service).await {
            Ok(policy) => policy,
            Err(e) => {
                error!(service = %result.service, error = %e, "policy lookup failed");
                return;
            }
        };

        let alert = match result.status {
            HealthStatus::Fail => policy.alert_on_fail,
            HealthStatus::Warn => policy.alert_on_warn,
            HealthStatus::Healthy => false,
        };
        if alert {
            self.alert(result);
        }

        if policy.auto_repair_enabled {
            self.repair
                .handle(report_id, result, &unhealthy_dependencies, &policy)
                .await;
        } else {
            debug!(service = %result.service, "auto-repair disabled by policy");
        }
    }

    fn alert(&self, result: &ServiceCheckResult) {
        let message = match &result.error {
            Some(error) => format!("{} is {}: {}", result.service, result.status, error),
            None => format!(
                "{} is {} ({}ms)",
                result.service, result.status, result.latency_ms
            ),
        };
        warn!(service = %result.service, status = %result.status, "{}", message);

        self.events.publish(HealthEvent::Alert(Alert {
            service: result.service.clone(),
            status: result.status,
            message,
            timestamp: Utc::now(),
        }));
    }

    pub async fn compact(&self) -> Result<CompactionStats, StorageError> {
        let stats = self.storage.compact().await?;
        if stats.reports_deleted + stats.repairs_deleted > 0 {
            info!(
                reports = stats.reports_deleted,
                repairs = stats.repairs_deleted,
                "compacted health history"
            );
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_compaction(&stats);
        }
        Ok(stats)
    }

    /// Stops the tick loop, then gives in-flight sweeps the grace period to
    /// finish before cancelling their outstanding probes.
    pub async fn stop(&self) {
        self.shutdown_tx.send_replace(true);

        let ticker = self
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let mut sweeps = match ticker {
            Some(handle) => handle.await.unwrap_or_else(|e| {
                error!("Scheduler task join error: {}", e);
                JoinSet::new()
            }),
            None => JoinSet::new(),
        };

        let grace = self.config.stop_grace();
        if timeout(grace, self.finish(&mut sweeps)).await.is_err() {
            warn!(?grace, "sweep still running after grace period, cancelling probes");
            self.cancel_tx.send_replace(true);
            if timeout(grace, self.finish(&mut sweeps)).await.is_err() {
                warn!("sweep did not finish after cancellation, aborting");
                sweeps.abort_all();
            }
        }
        info!("Health scheduler stopped");
    }

    /// Waits for tracked sweeps and any on-demand sweep to end.
    async fn finish(&self, sweeps: &mut JoinSet<()>) {
        while let Some(joined) = sweeps.join_next().await {
            if let Err(e) = joined {
                error!("Scheduled sweep task failed: {}", e);
            }
        }
        let mut running = self.running.subscribe();
        let _ = running.wait_for(|r| !*r).await;
    }
}

/// Resolves once the flag is set, including if it already was.
async fn signalled(rx: &mut watch::Receiver<bool>) {
    let closed = rx.wait_for(|c| *c).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}
