//! Named component liveness checks, run on a fixed interval with a
//! per-check timeout, rolled up into the `daemon_healthy{component="overall"}`
//! AND gauge.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

use crate::core::errors::{Result, StorageSageError};
use crate::metrics::registry::Metrics;

/// Default per-check timeout (spec §4.8).
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
/// Default interval between health-check rounds (spec §4.8).
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Point-in-time health of one registered component.
#[derive(Debug, Clone)]
pub struct ComponentHealth {
    pub name: String,
    pub healthy: bool,
    pub last_check_epoch: i64,
    pub last_duration_seconds: f64,
    pub consecutive_failures: u32,
}

impl ComponentHealth {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            // Unchecked components are reported healthy until the first round
            // runs, so `daemon_healthy` does not flip unhealthy before startup.
            healthy: true,
            last_check_epoch: 0,
            last_duration_seconds: 0.0,
            consecutive_failures: 0,
        }
    }
}

type CheckFn = Arc<dyn Fn() -> Result<()> + Send + Sync>;

struct RegisteredCheck {
    name: String,
    timeout: Duration,
    check: CheckFn,
}

/// Registry of named components, each with a check function and timeout.
pub struct HealthChecker {
    checks: Vec<RegisteredCheck>,
    state: RwLock<HashMap<String, ComponentHealth>>,
    metrics: Arc<Metrics>,
}

impl HealthChecker {
    #[must_use]
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            checks: Vec::new(),
            state: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    /// Register a named component check. Call before the first [`Self::run_once`].
    pub fn register<F>(&mut self, name: impl Into<String>, timeout: Duration, check: F)
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        let name = name.into();
        self.state
            .write()
            .insert(name.clone(), ComponentHealth::new(&name));
        self.checks.push(RegisteredCheck {
            name,
            timeout,
            check: Arc::new(check),
        });
    }

    /// Run every registered check concurrently (bounded by the component
    /// count, per §5), applying each check's own timeout, and update both
    /// the internal state table and the metric registry.
    pub fn run_once(&self) {
        let now = now_epoch();

        let handles: Vec<JoinHandle<(String, Duration, Result<()>)>> = self
            .checks
            .iter()
            .map(|registered| {
                let name = registered.name.clone();
                let timeout = registered.timeout;
                let check = Arc::clone(&registered.check);
                thread::spawn(move || {
                    let start = Instant::now();
                    let (tx, rx) = mpsc::channel();
                    let worker_name = name.clone();
                    thread::spawn(move || {
                        let _ = tx.send(check());
                        let _ = worker_name;
                    });
                    let outcome = rx.recv_timeout(timeout).unwrap_or_else(|_| {
                        Err(StorageSageError::HealthCheckFailed {
                            component: name.clone(),
                            details: "check exceeded its timeout".to_string(),
                        })
                    });
                    (name, start.elapsed(), outcome)
                })
            })
            .collect();

        for handle in handles {
            if let Ok((name, duration, outcome)) = handle.join() {
                self.record(&name, duration, outcome, now);
            }
        }
    }

    fn record(&self, name: &str, duration: Duration, outcome: Result<()>, now: i64) {
        let healthy = outcome.is_ok();
        let consecutive_failures = {
            let mut state = self.state.write();
            let entry = state
                .entry(name.to_string())
                .or_insert_with(|| ComponentHealth::new(name));
            entry.healthy = healthy;
            entry.last_check_epoch = now;
            entry.last_duration_seconds = duration.as_secs_f64();
            entry.consecutive_failures = if healthy {
                0
            } else {
                entry.consecutive_failures.saturating_add(1)
            };
            entry.consecutive_failures
        };

        self.metrics.set_component_healthy(name, healthy);
        self.metrics.set_last_health_check_timestamp(name, now);
        self.metrics
            .observe_health_check_duration(name, duration.as_secs_f64());
        self.metrics.set_consecutive_failures(name, consecutive_failures);

        let overall = self.overall_healthy();
        self.metrics.set_daemon_healthy(overall);
    }

    /// `daemon_healthy{overall}` — AND over every registered component.
    #[must_use]
    pub fn overall_healthy(&self) -> bool {
        self.state.read().values().all(|c| c.healthy)
    }

    /// Snapshot of every component's current state, for the `/health` JSON body.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ComponentHealth> {
        self.state.read().values().cloned().collect()
    }

    /// Spawn a background thread that calls [`Self::run_once`] every
    /// `interval` until `shutdown` is set.
    pub fn spawn_periodic(self: Arc<Self>, interval: Duration, shutdown: Arc<AtomicBool>) -> JoinHandle<()> {
        thread::spawn(move || {
            // Run one round immediately so /health is meaningful at startup.
            self.run_once();
            while !shutdown.load(Ordering::Relaxed) {
                let step = Duration::from_millis(200);
                let mut waited = Duration::ZERO;
                while waited < interval {
                    if shutdown.load(Ordering::Relaxed) {
                        return;
                    }
                    thread::sleep(step.min(interval - waited));
                    waited += step;
                }
                self.run_once();
            }
        })
    }
}

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
