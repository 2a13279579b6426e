//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use storagesage::prelude::*;
//! ```

// Core
pub use crate::core::config::{Config, PathRuleConfig, ScanRootConfig};
pub use crate::core::errors::{Result, StorageSageError};

// Platform
pub use crate::platform::pal::{FsStats, MountPoint, Platform, detect_platform};

// Scanner
pub use crate::scanner::{Candidate, ObjectType, Scanner, ScanFault, WalkerConfig};

// Classify
pub use crate::classify::{
    Action, Decision, EffectivePolicy, Mode, PrimaryReason, classify_candidate,
    order_for_deletion, resolve_effective_policy, select_mode,
};

// Safety
pub use crate::safety::{BlockedReason, ProtectedPaths, ValidationOutcome, validate};

// Deleter
pub use crate::deleter::Deleter;

// Audit
pub use crate::audit::record::PolicySnapshot;
pub use crate::audit::{AuditStore, DeletionRecord, Filter, Stats};

// Metrics
#[cfg(feature = "metrics")]
pub use crate::metrics::{Metrics, ServerHandle, serve};

// Health
pub use crate::health::{ComponentHealth, HealthChecker};

// Daemon
#[cfg(feature = "daemon")]
pub use crate::daemon::loop_main::{CycleReport, Scheduler};
#[cfg(feature = "daemon")]
pub use crate::daemon::signals::SignalHandler;
