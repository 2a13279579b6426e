//! Output of the classify+mode-select pipeline for one [`super::candidate`].

#![allow(missing_docs)]

use std::fmt;
use std::path::PathBuf;

use crate::scanner::candidate::ObjectType;

/// What the Deleter should (attempt to) do with a [`Decision`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Delete,
    Skip,
    Error,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Delete => "DELETE",
            Self::Skip => "SKIP",
            Self::Error => "ERROR",
        };
        write!(f, "{s}")
    }
}

/// The dominant cause attributed to a [`Decision`].
///
/// The closed set named for DELETE rows is `{age_threshold, disk_threshold,
/// stacked_cleanup, combined}`; SKIP/ERROR rows use the remaining variants
/// and are not bound by that set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryReason {
    AgeThreshold,
    DiskThreshold,
    StackedCleanup,
    Combined,
    Protected,
    NfsStale,
    Error,
}

impl fmt::Display for PrimaryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AgeThreshold => "age_threshold",
            Self::DiskThreshold => "disk_threshold",
            Self::StackedCleanup => "stacked_cleanup",
            Self::Combined => "combined",
            Self::Protected => "protected",
            Self::NfsStale => "nfs_stale",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// The cleanup mode in effect for a root during one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Age,
    DiskUsage,
    Stack,
    None,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Age => "AGE",
            Self::DiskUsage => "DISK-USAGE",
            Self::Stack => "STACK",
            Self::None => "NONE",
        };
        write!(f, "{s}")
    }
}

/// Output of the Classifier+ModeSelector for one Candidate.
#[derive(Debug, Clone)]
pub struct Decision {
    pub absolute_path: PathBuf,
    pub object_type: ObjectType,
    pub action: Action,
    pub primary_reason: PrimaryReason,
    pub age_days: i64,
    pub size_bytes: u64,
    pub mode: Mode,
    pub priority: i32,
    pub path_rule_id: Option<String>,
    pub details: Option<String>,
}
