//! SSG-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, StorageSageError>;

/// Top-level error type for StorageSage.
///
/// Each variant belongs to one of the error kinds in the crate's error
/// handling design: `config_invalid`, `safety_violation`, `io_error`,
/// `audit_write_error`, `health_check_failed`, `panic_in_cycle`.
#[derive(Debug, Error)]
pub enum StorageSageError {
    #[error("[SSG-1001] invalid configuration: {details}")]
    ConfigInvalid { details: String },

    #[error("[SSG-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[SSG-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[SSG-2001] safety violation for {path}: {reason}")]
    SafetyViolation { path: PathBuf, reason: String },

    #[error("[SSG-2002] filesystem stats failure for {path}: {details}")]
    FsStats { path: PathBuf, details: String },

    #[error("[SSG-2003] mount table parse failure: {details}")]
    MountParse { details: String },

    #[error("[SSG-3001] audit store write failure: {details}")]
    AuditWrite { details: String },

    #[error("[SSG-3002] audit store SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[SSG-3003] audit store integrity check failed: {details}")]
    AuditIntegrity { details: String },

    #[error("[SSG-4001] permission denied for {path}")]
    PermissionDenied { path: PathBuf },

    #[error("[SSG-4002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[SSG-4003] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[SSG-5001] health check failed for component {component}: {details}")]
    HealthCheckFailed {
        component: String,
        details: String,
    },

    #[error("[SSG-5002] panic caught inside cleanup cycle: {details}")]
    PanicInCycle { details: String },

    #[error("[SSG-9001] runtime failure: {details}")]
    Runtime { details: String },
}

impl StorageSageError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ConfigInvalid { .. } => "SSG-1001",
            Self::MissingConfig { .. } => "SSG-1002",
            Self::ConfigParse { .. } => "SSG-1003",
            Self::SafetyViolation { .. } => "SSG-2001",
            Self::FsStats { .. } => "SSG-2002",
            Self::MountParse { .. } => "SSG-2003",
            Self::AuditWrite { .. } => "SSG-3001",
            Self::Sql { .. } => "SSG-3002",
            Self::AuditIntegrity { .. } => "SSG-3003",
            Self::PermissionDenied { .. } => "SSG-4001",
            Self::Io { .. } => "SSG-4002",
            Self::Serialization { .. } => "SSG-4003",
            Self::HealthCheckFailed { .. } => "SSG-5001",
            Self::PanicInCycle { .. } => "SSG-5002",
            Self::Runtime { .. } => "SSG-9001",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::FsStats { .. }
                | Self::Sql { .. }
                | Self::AuditWrite { .. }
                | Self::HealthCheckFailed { .. }
                | Self::Runtime { .. }
        )
    }

    /// The exit code a binary should use if this error is fatal before the main loop starts.
    ///
    /// Only meaningful for `ConfigInvalid`/`ConfigParse`/`MissingConfig` (exit 2) and
    /// `SafetyViolation` (exit 3); all other variants are handled in-cycle and never
    /// propagate to a process exit path.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::ConfigInvalid { .. } | Self::ConfigParse { .. } | Self::MissingConfig { .. } => {
                2
            }
            Self::SafetyViolation { .. } => 3,
            _ => 4,
        }
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StorageSageError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for StorageSageError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for StorageSageError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
