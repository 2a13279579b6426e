//! The cooperative cleanup-cycle scheduler.
//!
//! One thread drives the full pipeline — Scanner, Classifier, ModeSelector,
//! SafetyValidator (via [`crate::deleter::Deleter`]), AuditStore — for every
//! configured scan root, then sleeps until the next tick or a manual
//! trigger. The HTTP surface and the health-check round run independently
//! on their own threads (wired up by the binary, not here); this module
//! owns only the scan/classify/delete cycle itself.

#![allow(missing_docs)]

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::audit::store::AuditStore;
use crate::classify::classifier::{classify_candidate, resolve_effective_policy};
use crate::classify::decision::Mode;
use crate::classify::mode_selector::{order_for_deletion, select_mode};
use crate::core::config::{Config, ScanRootConfig};
use crate::core::errors::Result;
use crate::daemon::signals::SignalHandler;
use crate::deleter::Deleter;
use crate::metrics::registry::Metrics;
use crate::monitor::fs_stats::FsStatsCollector;
use crate::platform::pal::Platform;
use crate::safety::validator::ProtectedPaths;
use crate::scanner::walker::{Scanner, WalkerConfig};
use crate::audit::record::PolicySnapshot;

/// Environment variable a supervising runtime sets (to any non-empty value)
/// to tell the daemon this process start is a restart, not a first boot.
pub const RESTART_MARKER_ENV: &str = "STORAGESAGE_RESTARTED";

/// Poll granularity while waiting for the next tick or a signal.
const WAIT_STEP: Duration = Duration::from_millis(200);

/// Summary of one completed cleanup cycle, mostly useful for `--once` and tests.
#[derive(Debug, Default, Clone)]
pub struct CycleReport {
    pub deleted: u64,
    pub skipped: u64,
    pub errored: u64,
    pub duration: Duration,
}

/// Drives cleanup cycles for every configured scan root.
pub struct Scheduler {
    config: Config,
    platform: Arc<dyn Platform>,
    fs_stats: FsStatsCollector,
    audit: Arc<AuditStore>,
    metrics: Arc<Metrics>,
    signals: SignalHandler,
    deleter: Deleter,
    protected_paths: ProtectedPaths,
    allowed_roots: Vec<PathBuf>,
    cycle_counter: AtomicU64,
}

impl Scheduler {
    pub fn new(
        config: Config,
        platform: Arc<dyn Platform>,
        audit: Arc<AuditStore>,
        metrics: Arc<Metrics>,
        signals: SignalHandler,
    ) -> Result<Self> {
        let protected_paths = ProtectedPaths::new(&config.protected_paths)?;
        let allowed_roots = config.scan_roots.iter().map(|r| r.path.clone()).collect();
        let deleter = Deleter::new(config.dry_run);
        let fs_stats = FsStatsCollector::new(Arc::clone(&platform), Duration::from_secs(5));

        Ok(Self {
            config,
            platform,
            fs_stats,
            audit,
            metrics,
            signals,
            deleter,
            protected_paths,
            allowed_roots,
            cycle_counter: AtomicU64::new(0),
        })
    }

    /// Record the process start timestamp and, if the supervising runtime
    /// left a restart marker in the environment, count the restart.
    pub fn record_startup(&self) {
        self.metrics.set_daemon_start_timestamp(now_epoch());
        if std::env::var(RESTART_MARKER_ENV).is_ok_and(|v| !v.is_empty()) {
            self.metrics.record_restart("supervisor");
        }
    }

    /// Run exactly one cleanup cycle across every scan root, in configuration
    /// order — used by `--once` and by [`Self::run_forever`]'s tick loop.
    ///
    /// Every cycle gets a monotonic `cycle_id`, carried as a structured field
    /// on the `cleanup_cycle` tracing span per SPEC_FULL §A.2 so log lines
    /// for one cycle's roots/decisions can be correlated downstream.
    pub fn run_once(&self) -> CycleReport {
        let cycle_id = self.cycle_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let span = tracing::info_span!("cleanup_cycle", cycle_id);
        let _guard = span.enter();

        let started = Instant::now();
        let now = SystemTime::now();
        let mut report = CycleReport::default();

        for root in &self.config.scan_roots {
            if self.signals.should_shutdown() {
                // Graceful shutdown: the cycle finishes its current root,
                // no new root begins.
                break;
            }
            self.process_root(root, now, &mut report);
        }

        report.duration = started.elapsed();
        self.metrics.observe_cleanup_duration(report.duration.as_secs_f64());
        self.metrics.set_last_run_timestamp(now_epoch());
        report
    }

    /// Tick at `interval_minutes`, or immediately on a coalesced manual
    /// trigger, until a shutdown signal arrives. Every cycle is run inside
    /// `catch_unwind`: a panic is logged, counted, and the next tick
    /// proceeds rather than bringing the process down.
    pub fn run_forever(&self) {
        self.record_startup();
        let interval = Duration::from_secs(self.config.interval_minutes.saturating_mul(60));

        loop {
            if self.signals.should_shutdown() {
                return;
            }

            let cycle = AssertUnwindSafe(|| self.run_once());
            match panic::catch_unwind(cycle) {
                Ok(report) => {
                    tracing::info!(
                        deleted = report.deleted,
                        skipped = report.skipped,
                        errored = report.errored,
                        duration_ms = report.duration.as_millis() as u64,
                        "cleanup cycle finished"
                    );
                }
                Err(payload) => {
                    let details = panic_message(&payload);
                    eprintln!("storagesage: cleanup cycle panicked: {details}");
                    self.metrics.record_error("panic");
                }
            }

            if self.signals.should_shutdown() {
                return;
            }
            self.wait_for_next_tick(interval);
        }
    }

    fn wait_for_next_tick(&self, interval: Duration) {
        let mut waited = Duration::ZERO;
        while waited < interval {
            if self.signals.should_shutdown() || self.signals.take_manual_trigger() {
                return;
            }
            let step = WAIT_STEP.min(interval - waited);
            std::thread::sleep(step);
            waited += step;
        }
    }

    fn process_root(&self, root: &ScanRootConfig, now: SystemTime, report: &mut CycleReport) {
        let free_percent = match self.fs_stats.collect(&root.path) {
            Ok(stats) => stats.free_pct(),
            Err(err) => {
                eprintln!(
                    "storagesage: failed to read filesystem stats for {}: {err}",
                    root.path.display()
                );
                self.metrics.record_error("fs_stats");
                return;
            }
        };
        let root_label = root.path.to_string_lossy().to_string();
        self.metrics.set_free_space_percent(&root_label, free_percent);

        let policy = crate::classify::classifier::EffectivePolicy::from(root);
        let mode = select_mode(&policy, free_percent);
        self.metrics.set_last_mode(mode);

        let cancel = Arc::new(AtomicBool::new(false));
        let walker_config = WalkerConfig {
            root: root.path.clone(),
            recursive: root.recursive,
            io_timeout: Duration::from_secs(self.config.io_timeout_seconds),
        };
        let scanner = Scanner::new(walker_config, Arc::clone(&cancel));

        let mut decisions = Vec::new();
        for candidate in scanner {
            if self.signals.should_shutdown() {
                cancel.store(true, Ordering::Relaxed);
                break;
            }
            let (effective_policy, rule_id) = resolve_effective_policy(&candidate.absolute_path, root);
            if let Some(decision) =
                classify_candidate(&candidate, &effective_policy, rule_id, mode, now)
            {
                decisions.push(decision);
            }
        }

        order_for_deletion(&mut decisions, mode);

        let snapshot = PolicySnapshot {
            age_threshold_days: Some(policy.age_threshold_days),
            disk_threshold_percent: Some(policy.max_free_percent),
            actual_disk_percent: Some(free_percent),
            stacked_threshold_percent: policy.stack_threshold_percent,
            stacked_age_days: policy.stack_age_days,
        };

        let mut current_free_percent = free_percent;

        for decision in &decisions {
            if self.signals.should_shutdown() {
                break;
            }

            if target_reached(mode, &policy, current_free_percent) {
                break;
            }

            let record = match self.deleter.process(
                decision,
                &self.allowed_roots,
                &self.protected_paths,
                snapshot,
                &self.audit,
                &self.metrics,
                &root_label,
            ) {
                Ok(record) => record,
                Err(err) => {
                    eprintln!(
                        "storagesage: audit write failed for {}: {err}",
                        decision.absolute_path.display()
                    );
                    report.errored += 1;
                    continue;
                }
            };

            match record.action.as_str() {
                "DELETE" => {
                    report.deleted += 1;
                    // STACK/DISK-USAGE both stop once the target free-percent
                    // is reached or the pool is exhausted; re-read live stats
                    // (bypassing the cycle cache) after every real mutation so
                    // the target check below sees ground truth, not a figure
                    // from before this deletion.
                    if matches!(mode, Mode::Stack | Mode::DiskUsage) && !self.config.dry_run {
                        if let Ok(stats) = self.platform.fs_stats(&root.path) {
                            current_free_percent = stats.free_pct();
                            self.metrics.set_free_space_percent(&root_label, current_free_percent);
                        }
                    }
                }
                "SKIP" => report.skipped += 1,
                _ => report.errored += 1,
            }
        }
    }
}

/// Whether the target free-percent for the active mode has already been met,
/// so the remaining DELETE-ordered decisions for this root should be left
/// untouched rather than deleted past what the policy asked for.
fn target_reached(mode: Mode, policy: &crate::classify::classifier::EffectivePolicy, free_percent: f64) -> bool {
    match mode {
        Mode::Stack => policy
            .stack_threshold_percent
            .is_some_and(|threshold| free_percent >= 100.0 - f64::from(threshold)),
        Mode::DiskUsage => policy
            .target_free_percent
            .is_some_and(|target| free_percent >= 100.0 - f64::from(target)),
        Mode::Age | Mode::None => false,
    }
}

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::pal::{FsStats, MemoryInfo, MockPlatform, MountPoint};
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    fn platform_with_free(path: &PathBuf, free_pct: f64) -> Arc<dyn Platform> {
        let total = 1_000_000_u64;
        let available = (total as f64 * free_pct / 100.0) as u64;
        let mounts = vec![MountPoint {
            path: path.clone(),
            device: "test".to_string(),
            fs_type: "ext4".to_string(),
            is_ram_backed: false,
        }];
        let stats = FsStats {
            total_bytes: total,
            free_bytes: available,
            available_bytes: available,
            fs_type: "ext4".to_string(),
            mount_point: path.clone(),
            is_readonly: false,
        };
        Arc::new(MockPlatform::new(
            mounts,
            HashMap::from([(path.clone(), stats)]),
            MemoryInfo {
                total_bytes: 0,
                available_bytes: 0,
                swap_total_bytes: 0,
                swap_free_bytes: 0,
            },
        ))
    }

    fn scheduler_for(tmp: &TempDir, root_cfg: ScanRootConfig, free_pct: f64) -> Scheduler {
        let db = tmp.path().join("deletions.db");
        let audit = Arc::new(AuditStore::open(&db).unwrap());
        let metrics = Arc::new(Metrics::new("storagesage").unwrap());
        let platform = platform_with_free(&tmp.path().to_path_buf(), free_pct);
        let config = Config {
            scan_roots: vec![root_cfg],
            database_path: db,
            ..Default::default()
        };
        Scheduler::new(config, platform, audit, metrics, SignalHandler::new()).unwrap()
    }

    #[test]
    fn age_mode_cycle_deletes_old_file_and_records_audit() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("old.log"), b"12345").unwrap();
        filetime::set_file_mtime(
            tmp.path().join("old.log"),
            filetime::FileTime::from_system_time(
                SystemTime::now() - Duration::from_secs(10 * 86_400),
            ),
        )
        .unwrap();

        let root_cfg = ScanRootConfig {
            path: tmp.path().to_path_buf(),
            age_threshold_days: 7,
            max_free_percent: 100,
            ..Default::default()
        };

        let scheduler = scheduler_for(&tmp, root_cfg, 90.0);
        let report = scheduler.run_once();

        assert_eq!(report.deleted, 1);
        assert!(!tmp.path().join("old.log").exists());
    }

    #[test]
    fn empty_root_completes_with_zero_deletions() {
        let tmp = TempDir::new().unwrap();
        let root_cfg = ScanRootConfig {
            path: tmp.path().to_path_buf(),
            age_threshold_days: 7,
            max_free_percent: 100,
            ..Default::default()
        };
        let scheduler = scheduler_for(&tmp, root_cfg, 90.0);
        let report = scheduler.run_once();
        assert_eq!(report.deleted, 0);
        assert_eq!(report.skipped, 0);
    }

    #[test]
    fn dry_run_cycle_issues_zero_unlinks() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("old.log"), b"12345").unwrap();
        filetime::set_file_mtime(
            tmp.path().join("old.log"),
            filetime::FileTime::from_system_time(
                SystemTime::now() - Duration::from_secs(10 * 86_400),
            ),
        )
        .unwrap();

        let root_cfg = ScanRootConfig {
            path: tmp.path().to_path_buf(),
            age_threshold_days: 7,
            max_free_percent: 100,
            ..Default::default()
        };

        let db = tmp.path().join("deletions.db");
        let audit = Arc::new(AuditStore::open(&db).unwrap());
        let metrics = Arc::new(Metrics::new("storagesage").unwrap());
        let platform = platform_with_free(&tmp.path().to_path_buf(), 90.0);
        let config = Config {
            scan_roots: vec![root_cfg],
            database_path: db,
            dry_run: true,
            ..Default::default()
        };
        let scheduler = Scheduler::new(config, platform, audit, metrics, SignalHandler::new()).unwrap();

        let report = scheduler.run_once();
        assert_eq!(report.deleted, 1);
        assert!(tmp.path().join("old.log").exists());
    }
}
