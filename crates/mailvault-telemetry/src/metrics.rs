//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Label values are stable lowercase names supplied by the caller.

use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

/// Prometheus-backed metrics registry shared across the service.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    http_requests_total: IntCounterVec,
    backup_runs_total: IntCounterVec,
    backup_stages_total: IntCounterVec,
    backup_artifacts_pruned_total: IntCounter,
    backup_in_flight: IntGauge,
    backup_last_success_timestamp: IntGauge,
}

/// Holds one unit of `backup_in_flight`, released on drop.
#[derive(Debug)]
pub struct RunInFlight {
    gauge: IntGauge,
}

impl Drop for RunInFlight {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

/// Snapshot of selected gauges and counters for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Runs currently executing.
    pub backup_in_flight: i64,
    /// Unix timestamp of the last successful run, zero when none.
    pub backup_last_success_timestamp: i64,
    /// Artifacts removed by retention since start-up.
    pub backup_artifacts_pruned_total: u64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// built or registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let http_requests_total = counter_vec(
            &registry,
            "http_requests_total",
            "Total HTTP requests received",
            &["route", "code"],
        )?;
        let backup_runs_total = counter_vec(
            &registry,
            "backup_runs_total",
            "Backup runs by trigger and outcome",
            &["trigger", "outcome"],
        )?;
        let backup_stages_total = counter_vec(
            &registry,
            "backup_stages_total",
            "Backup pipeline stages executed by status",
            &["stage", "status"],
        )?;
        let backup_artifacts_pruned_total = register(
            &registry,
            "backup_artifacts_pruned_total",
            IntCounter::with_opts(Opts::new(
                "backup_artifacts_pruned_total",
                "Stored backups deleted by retention",
            )),
        )?;
        let backup_in_flight = gauge(&registry, "backup_in_flight", "Backup runs executing now")?;
        let backup_last_success_timestamp = gauge(
            &registry,
            "backup_last_success_timestamp",
            "Unix time of the most recent successful backup",
        )?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                http_requests_total,
                backup_runs_total,
                backup_stages_total,
                backup_artifacts_pruned_total,
                backup_in_flight,
                backup_last_success_timestamp,
            }),
        })
    }

    /// Increment the HTTP request counter for the given route and status code.
    pub fn inc_http_request(&self, route: &str, status: u16) {
        self.inner
            .http_requests_total
            .with_label_values(&[route, &status.to_string()])
            .inc();
    }

    /// Count a finished run.
    pub fn inc_backup_run(&self, trigger: &str, outcome: &str) {
        self.inner
            .backup_runs_total
            .with_label_values(&[trigger, outcome])
            .inc();
    }

    /// Count a pipeline stage completion or failure.
    pub fn inc_backup_stage(&self, stage: &str, status: &str) {
        self.inner
            .backup_stages_total
            .with_label_values(&[stage, status])
            .inc();
    }

    /// Add to the pruned-artifact counter.
    pub fn add_pruned(&self, count: u64) {
        self.inner.backup_artifacts_pruned_total.inc_by(count);
    }

    /// Count a run as in flight until the returned guard drops.
    #[must_use]
    pub fn track_run(&self) -> RunInFlight {
        self.inner.backup_in_flight.inc();
        RunInFlight {
            gauge: self.inner.backup_in_flight.clone(),
        }
    }

    /// Record the completion time of a successful run.
    pub fn set_last_success(&self, unix_seconds: i64) {
        self.inner.backup_last_success_timestamp.set(unix_seconds);
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::MetricsEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsUtf8 { source })
    }

    /// Take a point-in-time snapshot of the run gauges.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            backup_in_flight: self.inner.backup_in_flight.get(),
            backup_last_success_timestamp: self.inner.backup_last_success_timestamp.get(),
            backup_artifacts_pruned_total: self.inner.backup_artifacts_pruned_total.get(),
        }
    }
}

fn register<C>(
    registry: &Registry,
    name: &'static str,
    built: prometheus::Result<C>,
) -> Result<C>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    let collector = built.map_err(|source| TelemetryError::MetricsCollector { name, source })?;
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })?;
    Ok(collector)
}

fn counter_vec(
    registry: &Registry,
    name: &'static str,
    help: &str,
    labels: &[&str],
) -> Result<IntCounterVec> {
    register(registry, name, IntCounterVec::new(Opts::new(name, help), labels))
}

fn gauge(registry: &Registry, name: &'static str, help: &str) -> Result<IntGauge> {
    register(registry, name, IntGauge::with_opts(Opts::new(name, help)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_snapshot_reflects_updates() -> Result<()> {
        let metrics = Metrics::new()?;
        metrics.inc_http_request("/backup-email", 200);
        metrics.inc_backup_run("manual", "succeeded");
        metrics.inc_backup_stage("transfer", "completed");
        metrics.add_pruned(3);
        let first = metrics.track_run();
        let second = metrics.track_run();
        drop(first);
        metrics.set_last_success(1_700_000_000);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.backup_in_flight, 1);
        assert_eq!(snapshot.backup_last_success_timestamp, 1_700_000_000);
        assert_eq!(snapshot.backup_artifacts_pruned_total, 3);

        let rendered = metrics.render()?;
        assert!(rendered.contains("backup_runs_total{outcome=\"succeeded\",trigger=\"manual\"} 1"));
        assert!(rendered.contains("backup_stages_total"));
        assert!(rendered.contains("http_requests_total"));
        drop(second);
        assert_eq!(metrics.snapshot().backup_in_flight, 0);
        Ok(())
    }

    #[test]
    fn in_flight_guard_releases_during_unwind() -> Result<()> {
        let metrics = Metrics::new()?;
        let shared = metrics.clone();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _run = shared.track_run();
            panic!("boom");
        }));
        assert!(outcome.is_err());
        assert_eq!(metrics.snapshot().backup_in_flight, 0);
        Ok(())
    }

    #[test]
    fn registries_are_independent() -> Result<()> {
        let first = Metrics::new()?;
        let second = Metrics::new()?;
        first.add_pruned(1);
        assert_eq!(second.snapshot().backup_artifacts_pruned_total, 0);
        Ok(())
    }
}
