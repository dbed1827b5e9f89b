// src/metrics/collector.rs
use crate::models::{HealthCheckReport, HealthStatus, RepairAction};
use crate::storage::CompactionStats;
use anyhow::Result;
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;

pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(MetricsCollector::new(&registry)?);

        Ok(Self {
            registry,
            collector,
        })
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    pub fn gather(&self) -> Vec<u8> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
        }
        buffer
    }
}

pub struct MetricsCollector {
    // Sweep metrics
    pub sweeps_total: IntCounterVec,
    pub sweeps_skipped_total: IntCounter,
    pub sweep_duration_seconds: Histogram,
    pub report_persist_failures_total: IntCounter,

    // Per-service metrics
    pub probe_latency_seconds: HistogramVec,
    pub service_status: IntGaugeVec,

    // Repair metrics
    pub repair_actions_total: IntCounterVec,

    // Retention
    pub compaction_deleted_total: IntCounterVec,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        let sweeps_total = IntCounterVec::new(
            Opts::new("health_sweeps_total", "Completed health sweeps"),
            &["trigger", "status"],
        )?;
        registry.register(Box::new(sweeps_total.clone()))?;

        let sweeps_skipped_total = IntCounter::new(
            "health_sweeps_skipped_total",
            "Ticks skipped because a sweep was still running",
        )?;
        registry.register(Box::new(sweeps_skipped_total.clone()))?;

        let sweep_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "health_sweep_duration_seconds",
            "Wall time of a full sweep",
        ))?;
        registry.register(Box::new(sweep_duration_seconds.clone()))?;

        let report_persist_failures_total = IntCounter::new(
            "health_report_persist_failures_total",
            "Sweep reports that could not be stored",
        )?;
        registry.register(Box::new(report_persist_failures_total.clone()))?;

        let probe_latency_seconds = HistogramVec::new(
            HistogramOpts::new("health_probe_latency_seconds", "Probe latency per service"),
            &["service"],
        )?;
        registry.register(Box::new(probe_latency_seconds.clone()))?;

        let service_status = IntGaugeVec::new(
            Opts::new(
                "health_service_status",
                "Last probe status (0=healthy, 1=warn, 2=fail)",
            ),
            &["service"],
        )?;
        registry.register(Box::new(service_status.clone()))?;

        let repair_actions_total = IntCounterVec::new(
            Opts::new("health_repair_actions_total", "Recorded repair decisions"),
            &["service", "strategy", "outcome"],
        )?;
        registry.register(Box::new(repair_actions_total.clone()))?;

        let compaction_deleted_total = IntCounterVec::new(
            Opts::new(
                "health_compaction_deleted_total",
                "Rows removed by retention compaction",
            ),
            &["table"],
        )?;
        registry.register(Box::new(compaction_deleted_total.clone()))?;

        Ok(Self {
            sweeps_total,
            sweeps_skipped_total,
            sweep_duration_seconds,
            report_persist_failures_total,
            probe_latency_seconds,
            service_status,
            repair_actions_total,
            compaction_deleted_total,
        })
    }

    pub fn record_sweep(&self, report: &HealthCheckReport) {
        let trigger = match report.triggered_by {
            crate::models::SweepTrigger::Scheduled => "scheduled",
            crate::models::SweepTrigger::Manual => "manual",
        };
        self.sweeps_total
            .with_label_values(&[trigger, report.status.as_str()])
            .inc();
        self.sweep_duration_seconds
            .observe(report.duration_ms as f64 / 1000.0);

        for result in &report.results {
            self.probe_latency_seconds
                .with_label_values(&[&result.service])
                .observe(result.latency_ms as f64 / 1000.0);

            let value = match result.status {
                HealthStatus::Healthy => 0,
                HealthStatus::Warn => 1,
                HealthStatus::Fail => 2,
            };
            self.service_status
                .with_label_values(&[&result.service])
                .set(value);
        }
    }

    pub fn record_skipped_sweep(&self) {
        self.sweeps_skipped_total.inc();
    }

    pub fn record_persist_failure(&self) {
        self.report_persist_failures_total.inc();
    }

    pub fn record_repair(&self, action: &RepairAction) {
        self.repair_actions_total
            .with_label_values(&[
                &action.service,
                action.strategy.as_str(),
                action.outcome.as_str(),
            ])
            .inc();
    }

    pub fn record_compaction(&self, stats: &CompactionStats) {
        self.compaction_deleted_total
            .with_label_values(&["reports"])
            .inc_by(stats.reports_deleted as u64);
        self.compaction_deleted_total
            .with_label_values(&["repairs"])
            .inc_by(stats.repairs_deleted as u64);
    }
}
