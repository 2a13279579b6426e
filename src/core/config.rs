//! Typed, validated configuration surface.
//!
//! Loading a [`Config`] from TOML/env is an external concern (handled by the
//! supervising deployment, not this crate); what lives here is the typed view
//! a loader hands off, plus the structural validation that determines whether
//! the daemon is allowed to start.

#![allow(missing_docs)]

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, StorageSageError};

/// Default tick interval, in minutes, between cleanup cycles.
pub const DEFAULT_INTERVAL_MINUTES: u64 = 60;
/// Default port the metrics/health HTTP surface listens on.
pub const DEFAULT_METRICS_PORT: u16 = 9090;
/// Default timeout applied to any single NFS-backed filesystem call.
pub const DEFAULT_NFS_TIMEOUT_SECONDS: u64 = 5;
/// Default timeout applied to any single local filesystem call.
pub const DEFAULT_IO_TIMEOUT_SECONDS: u64 = 5;
/// Default common prefix applied to every exported metric name.
pub const DEFAULT_METRICS_PREFIX: &str = "storagesage";

/// Full top-level configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub scan_roots: Vec<ScanRootConfig>,
    pub interval_minutes: u64,
    pub protected_paths: Vec<PathBuf>,
    pub database_path: PathBuf,
    pub metrics_port: u16,
    pub nfs_timeout_seconds: u64,
    pub io_timeout_seconds: u64,
    pub dry_run: bool,
    pub metrics_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scan_roots: Vec::new(),
            interval_minutes: DEFAULT_INTERVAL_MINUTES,
            protected_paths: Vec::new(),
            database_path: PathBuf::from("deletions.db"),
            metrics_port: DEFAULT_METRICS_PORT,
            nfs_timeout_seconds: DEFAULT_NFS_TIMEOUT_SECONDS,
            io_timeout_seconds: DEFAULT_IO_TIMEOUT_SECONDS,
            dry_run: false,
            metrics_prefix: DEFAULT_METRICS_PREFIX.to_string(),
        }
    }
}

impl Config {
    /// Read `path`, parse it as TOML, and validate the result.
    ///
    /// Config-file loading itself is an external concern; this is the thin
    /// glue the binary needs to turn `--config PATH` into a typed, validated
    /// [`Config`] — not a layered loader (env overlays, includes, etc).
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                StorageSageError::MissingConfig {
                    path: path.to_path_buf(),
                }
            } else {
                StorageSageError::io(path.to_path_buf(), source)
            }
        })?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Structural validation a loader must run before handing a [`Config`] to the daemon.
    ///
    /// A failure here corresponds to exit code 2 in the external loader's contract.
    pub fn validate(&self) -> Result<()> {
        if self.scan_roots.is_empty() {
            return Err(StorageSageError::ConfigInvalid {
                details: "scan_roots must not be empty".to_string(),
            });
        }
        if self.interval_minutes < 1 {
            return Err(StorageSageError::ConfigInvalid {
                details: "interval_minutes must be >= 1".to_string(),
            });
        }
        if self.metrics_port == 0 {
            return Err(StorageSageError::ConfigInvalid {
                details: "metrics_port must be nonzero".to_string(),
            });
        }
        if !self.database_path.is_absolute() {
            return Err(StorageSageError::ConfigInvalid {
                details: format!(
                    "database_path must be absolute: {}",
                    self.database_path.display()
                ),
            });
        }
        for protected in &self.protected_paths {
            if !protected.is_absolute() {
                return Err(StorageSageError::ConfigInvalid {
                    details: format!(
                        "protected_paths entries must be absolute: {}",
                        protected.display()
                    ),
                });
            }
        }
        for root in &self.scan_roots {
            root.validate()?;
        }
        Ok(())
    }
}

/// Policy for one monitored directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScanRootConfig {
    pub path: PathBuf,
    pub age_threshold_days: u32,
    pub max_free_percent: u8,
    pub target_free_percent: Option<u8>,
    pub stack_threshold_percent: Option<u8>,
    pub stack_age_days: Option<u32>,
    pub recursive: bool,
    pub delete_empty_dirs: bool,
    pub priority: i32,
    pub path_rules: Vec<PathRuleConfig>,
}

impl Default for ScanRootConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            age_threshold_days: 0,
            max_free_percent: 0,
            target_free_percent: None,
            stack_threshold_percent: None,
            stack_age_days: None,
            recursive: true,
            delete_empty_dirs: false,
            priority: 0,
            path_rules: Vec::new(),
        }
    }
}

impl ScanRootConfig {
    fn validate(&self) -> Result<()> {
        if !self.path.is_absolute() {
            return Err(StorageSageError::ConfigInvalid {
                details: format!("scan root path must be absolute: {}", self.path.display()),
            });
        }
        validate_percent(self.max_free_percent, "max_free_percent")?;
        if let Some(p) = self.target_free_percent {
            validate_percent(p, "target_free_percent")?;
        }
        if let Some(p) = self.stack_threshold_percent {
            validate_percent(p, "stack_threshold_percent")?;
        }
        for rule in &self.path_rules {
            rule.validate()?;
        }
        Ok(())
    }
}

/// An optional per-subpath override on a [`ScanRootConfig`].
///
/// Rules are evaluated longest-prefix-first; ties are broken by explicit
/// `priority` then lexicographic order of `match_prefix`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathRuleConfig {
    pub match_prefix: String,
    pub age_threshold_days: u32,
    pub max_free_percent: u8,
    pub target_free_percent: Option<u8>,
    pub stack_threshold_percent: Option<u8>,
    pub stack_age_days: Option<u32>,
    pub recursive: bool,
    pub delete_empty_dirs: bool,
    pub priority: i32,
}

impl Default for PathRuleConfig {
    fn default() -> Self {
        Self {
            match_prefix: String::new(),
            age_threshold_days: 0,
            max_free_percent: 0,
            target_free_percent: None,
            stack_threshold_percent: None,
            stack_age_days: None,
            recursive: true,
            delete_empty_dirs: false,
            priority: 0,
        }
    }
}

impl PathRuleConfig {
    fn validate(&self) -> Result<()> {
        if self.match_prefix.is_empty() {
            return Err(StorageSageError::ConfigInvalid {
                details: "path_rules entries must have a non-empty match_prefix".to_string(),
            });
        }
        validate_percent(self.max_free_percent, "path_rules.max_free_percent")?;
        if let Some(p) = self.target_free_percent {
            validate_percent(p, "path_rules.target_free_percent")?;
        }
        if let Some(p) = self.stack_threshold_percent {
            validate_percent(p, "path_rules.stack_threshold_percent")?;
        }
        Ok(())
    }
}

fn validate_percent(value: u8, field: &str) -> Result<()> {
    if value > 100 {
        return Err(StorageSageError::ConfigInvalid {
            details: format!("{field} must be in 0..=100, got {value}"),
        });
    }
    Ok(())
}
