//! Prometheus metric registry: every series named in the external HTTP
//! surface, gathered behind a single build-time name prefix.

#![allow(missing_docs)]

use prometheus::{
    Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec, IntCounterVec, Opts,
    Registry, TextEncoder,
};

use crate::classify::decision::Mode;
use crate::core::errors::{Result, StorageSageError};

/// Wraps a [`prometheus::Registry`] with every series this daemon exports,
/// named with a common `{prefix}_` prefix (default `storagesage`).
pub struct Metrics {
    registry: Registry,

    files_deleted_total: IntCounterVec,
    bytes_freed_total: IntCounterVec,
    path_bytes_deleted_total: IntCounterVec,
    errors_total: IntCounterVec,
    cleanup_duration_seconds: Histogram,
    cleanup_last_run_timestamp_seconds: Gauge,
    cleanup_last_mode: GaugeVec,
    free_space_percent: GaugeVec,
    daemon_start_timestamp_seconds: Gauge,
    daemon_restarts_total: IntCounterVec,
    daemon_healthy: GaugeVec,
    component_healthy: GaugeVec,
    last_health_check_timestamp_seconds: GaugeVec,
    health_check_duration_seconds: HistogramVec,
    health_check_failures_consecutive: GaugeVec,
}

impl Metrics {
    /// Build a fresh registry with every metric pre-registered (so
    /// `/metrics` always shows the full surface, even before a name has any
    /// observations).
    pub fn new(prefix: &str) -> Result<Self> {
        let registry = Registry::new();
        let name = |suffix: &str| format!("{prefix}_{suffix}");

        let files_deleted_total = IntCounterVec::new(
            Opts::new(name("files_deleted_total"), "Files deleted, by scan root."),
            &["path"],
        )
        .map_err(metric_err)?;
        let bytes_freed_total = IntCounterVec::new(
            Opts::new(name("bytes_freed_total"), "Bytes freed, by scan root."),
            &["path"],
        )
        .map_err(metric_err)?;
        let path_bytes_deleted_total = IntCounterVec::new(
            Opts::new(
                name("path_bytes_deleted_total"),
                "Alias of bytes_freed_total, by scan root.",
            ),
            &["path"],
        )
        .map_err(metric_err)?;
        let errors_total = IntCounterVec::new(
            Opts::new(name("errors_total"), "Errors encountered, by kind."),
            &["kind"],
        )
        .map_err(metric_err)?;
        let cleanup_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            name("cleanup_duration_seconds"),
            "Wall-clock duration of one cleanup cycle.",
        ))
        .map_err(metric_err)?;
        let cleanup_last_run_timestamp_seconds = Gauge::new(
            name("cleanup_last_run_timestamp_seconds"),
            "Unix timestamp of the last completed cleanup cycle.",
        )
        .map_err(metric_err)?;
        let cleanup_last_mode = GaugeVec::new(
            Opts::new(
                name("cleanup_last_mode"),
                "One-hot indicator of the most recently selected cleanup mode.",
            ),
            &["mode"],
        )
        .map_err(metric_err)?;
        let free_space_percent = GaugeVec::new(
            Opts::new(
                name("free_space_percent"),
                "Free space percentage observed for a scan root's backing filesystem.",
            ),
            &["path"],
        )
        .map_err(metric_err)?;
        let daemon_start_timestamp_seconds = Gauge::new(
            name("daemon_start_timestamp_seconds"),
            "Unix timestamp the daemon process started.",
        )
        .map_err(metric_err)?;
        let daemon_restarts_total = IntCounterVec::new(
            Opts::new(name("daemon_restarts_total"), "Daemon restarts, by reason."),
            &["reason"],
        )
        .map_err(metric_err)?;
        let daemon_healthy = GaugeVec::new(
            Opts::new(name("daemon_healthy"), "AND of all component_healthy gauges."),
            &["component"],
        )
        .map_err(metric_err)?;
        let component_healthy = GaugeVec::new(
            Opts::new(name("component_healthy"), "Per-component health (0/1)."),
            &["component"],
        )
        .map_err(metric_err)?;
        let last_health_check_timestamp_seconds = GaugeVec::new(
            Opts::new(
                name("last_health_check_timestamp_seconds"),
                "Unix timestamp of the last health check for a component.",
            ),
            &["component"],
        )
        .map_err(metric_err)?;
        let health_check_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                name("health_check_duration_seconds"),
                "Duration of a component's health check.",
            ),
            &["component"],
        )
        .map_err(metric_err)?;
        let health_check_failures_consecutive = GaugeVec::new(
            Opts::new(
                name("health_check_failures_consecutive"),
                "Consecutive failed health checks for a component.",
            ),
            &["component"],
        )
        .map_err(metric_err)?;

        macro_rules! register_all {
            ($($metric:expr),+ $(,)?) => {
                $(registry.register(Box::new($metric.clone())).map_err(metric_err)?;)+
            };
        }
        register_all!(
            files_deleted_total,
            bytes_freed_total,
            path_bytes_deleted_total,
            errors_total,
            cleanup_duration_seconds,
            cleanup_last_run_timestamp_seconds,
            cleanup_last_mode,
            free_space_percent,
            daemon_start_timestamp_seconds,
            daemon_restarts_total,
            daemon_healthy,
            component_healthy,
            last_health_check_timestamp_seconds,
            health_check_duration_seconds,
            health_check_failures_consecutive,
        );

        Ok(Self {
            registry,
            files_deleted_total,
            bytes_freed_total,
            path_bytes_deleted_total,
            errors_total,
            cleanup_duration_seconds,
            cleanup_last_run_timestamp_seconds,
            cleanup_last_mode,
            free_space_percent,
            daemon_start_timestamp_seconds,
            daemon_restarts_total,
            daemon_healthy,
            component_healthy,
            last_health_check_timestamp_seconds,
            health_check_duration_seconds,
            health_check_failures_consecutive,
        })
    }

    /// Record a successful deletion: increments the monotonic counters for
    /// `path` (the scan root label, not the individual file path, to bound
    /// cardinality). `bytes_freed_total` and `path_bytes_deleted_total` are
    /// treated as aliases (spec open question (a)) and always move together.
    pub fn record_delete(&self, path: &str, size_bytes: u64) {
        self.files_deleted_total.with_label_values(&[path]).inc();
        self.bytes_freed_total
            .with_label_values(&[path])
            .inc_by(size_bytes);
        self.path_bytes_deleted_total
            .with_label_values(&[path])
            .inc_by(size_bytes);
    }

    pub fn record_error(&self, kind: &str) {
        self.errors_total.with_label_values(&[kind]).inc();
    }

    pub fn observe_cleanup_duration(&self, seconds: f64) {
        self.cleanup_duration_seconds.observe(seconds);
    }

    pub fn set_last_run_timestamp(&self, epoch_seconds: i64) {
        #[allow(clippy::cast_precision_loss)]
        self.cleanup_last_run_timestamp_seconds
            .set(epoch_seconds as f64);
    }

    /// One-hot across AGE/DISK-USAGE/STACK/NONE for the most recently
    /// processed root (see testable property 4 and the open-question note in
    /// DESIGN.md on per-root vs. process-wide cardinality).
    pub fn set_last_mode(&self, mode: Mode) {
        for candidate in [Mode::Age, Mode::DiskUsage, Mode::Stack, Mode::None] {
            let value = if candidate == mode { 1.0 } else { 0.0 };
            self.cleanup_last_mode
                .with_label_values(&[&candidate.to_string()])
                .set(value);
        }
    }

    pub fn set_free_space_percent(&self, path: &str, percent: f64) {
        self.free_space_percent.with_label_values(&[path]).set(percent);
    }

    pub fn set_daemon_start_timestamp(&self, epoch_seconds: i64) {
        #[allow(clippy::cast_precision_loss)]
        self.daemon_start_timestamp_seconds.set(epoch_seconds as f64);
    }

    pub fn record_restart(&self, reason: &str) {
        self.daemon_restarts_total.with_label_values(&[reason]).inc();
    }

    pub fn set_component_healthy(&self, component: &str, healthy: bool) {
        self.component_healthy
            .with_label_values(&[component])
            .set(if healthy { 1.0 } else { 0.0 });
    }

    pub fn set_daemon_healthy(&self, healthy: bool) {
        self.daemon_healthy
            .with_label_values(&["overall"])
            .set(if healthy { 1.0 } else { 0.0 });
    }

    pub fn set_last_health_check_timestamp(&self, component: &str, epoch_seconds: i64) {
        #[allow(clippy::cast_precision_loss)]
        self.last_health_check_timestamp_seconds
            .with_label_values(&[component])
            .set(epoch_seconds as f64);
    }

    pub fn observe_health_check_duration(&self, component: &str, seconds: f64) {
        self.health_check_duration_seconds
            .with_label_values(&[component])
            .observe(seconds);
    }

    pub fn set_consecutive_failures(&self, component: &str, count: u32) {
        self.health_check_failures_consecutive
            .with_label_values(&[component])
            .set(f64::from(count));
    }

    /// Render the full registry as Prometheus text exposition format.
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|e| StorageSageError::Serialization {
                context: "prometheus_encode",
                details: e.to_string(),
            })?;
        String::from_utf8(buffer).map_err(|e| StorageSageError::Serialization {
            context: "prometheus_encode",
            details: e.to_string(),
        })
    }
}

fn metric_err(err: prometheus::Error) -> StorageSageError {
    StorageSageError::Runtime {
        details: format!("metric registration failed: {err}"),
    }
}
