//! The transient per-entry record the Scanner emits.

#![allow(missing_docs)]

use std::path::PathBuf;

/// What kind of filesystem object a [`Candidate`] names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    File,
    Directory,
    /// A directory with no entries, only distinguished from `Directory` when
    /// `delete_empty_dirs` is set on the effective policy.
    EmptyDirectory,
}

/// Why a [`Candidate`] could not be stat'd or traversed cleanly.
///
/// The Classifier turns any `Some` here into `action=SKIP, primary_reason=error`
/// (or `nfs_stale` for the ESTALE case) without stopping the walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanFault {
    /// `stat` failed for this entry specifically.
    StatFailed(String),
    /// ESTALE on an NFS mount; this candidate represents the root of the
    /// aborted subtree, not a real filesystem entry.
    NfsStale,
    /// Permission denied reading a directory; this candidate represents the
    /// pruned subtree root.
    PermissionDenied,
}

/// A transient record produced by the Scanner for one filesystem entry.
///
/// Lives only within one cleanup cycle. `matched_rule_id` is left unset by
/// the Scanner (it has no policy-matching logic of its own) and is filled in
/// by the Classifier, which owns longest-prefix `PathRule` resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub absolute_path: PathBuf,
    pub object_type: ObjectType,
    pub size_bytes: u64,
    pub mtime_epoch_seconds: i64,
    pub fault: Option<ScanFault>,
}

impl Candidate {
    #[must_use]
    pub fn is_fault(&self) -> bool {
        self.fault.is_some()
    }
}
