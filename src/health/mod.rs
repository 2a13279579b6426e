//! Component health registry: per-component liveness checks, the
//! overall-AND rollup, and the metrics this subsystem feeds.

pub mod checker;

pub use checker::{ComponentHealth, HealthChecker};
