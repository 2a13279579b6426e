//! Performs (or simulates) the unlink for one DELETE [`Decision`], in the
//! order the global invariants require: validate, mutate, counters, audit.
//!
//! Writing the audit record before the unlink would let a phantom DELETE row
//! survive a crash for a file never removed. Writing after and crashing
//! loses a row for a real deletion instead — we choose the latter because
//! counters and free space already reflect it, and the loss is
//! stderr-observable (spec §9).

#![allow(missing_docs)]

use std::fs;
use std::path::PathBuf;

use crate::audit::record::{DeletionRecord, PolicySnapshot};
use crate::audit::store::AuditStore;
use crate::classify::decision::{Action, Decision, PrimaryReason};
use crate::core::errors::{Result, StorageSageError};
use crate::metrics::registry::Metrics;
use crate::safety::validator::{BlockedReason, ProtectedPaths, ValidationOutcome, validate};
use crate::scanner::candidate::ObjectType;

/// Applies the safety gate, performs the mutation, and writes the audit row
/// for one [`Decision`].
pub struct Deleter {
    dry_run: bool,
}

impl Deleter {
    #[must_use]
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    /// Process one Decision end to end. Always returns `Ok` — per spec §4.6/§7
    /// the Deleter never propagates an error upward; a hard error is folded
    /// into the returned [`DeletionRecord`] (`action=ERROR`) and the caller's
    /// `errors_total` increment, not a `Result::Err`.
    pub fn process(
        &self,
        decision: &Decision,
        allowed_roots: &[PathBuf],
        protected_paths: &ProtectedPaths,
        snapshot: PolicySnapshot,
        audit: &AuditStore,
        metrics: &Metrics,
        root_label: &str,
    ) -> Result<DeletionRecord> {
        let decision = if decision.action == Action::Delete {
            self.gate_and_mutate(decision, allowed_roots, protected_paths, metrics, root_label)
        } else {
            decision.clone()
        };

        if decision.action == Action::Error {
            metrics.record_error("io");
        }

        let record = DeletionRecord::from_decision(&decision, snapshot, self.dry_run);
        audit.record(&record).map_err(|err| {
            eprintln!(
                "storagesage: audit write failed for {} (action={}): {err}",
                decision.absolute_path.display(),
                decision.action
            );
            metrics.record_error("audit");
            StorageSageError::AuditWrite {
                details: err.to_string(),
            }
        })
    }

    /// Invariant 3 (every DELETE record's path passed the validator) and
    /// invariant 1 (unlink happens before the row is written) both hold here:
    /// this is the only call site that can turn a DELETE decision into an
    /// actual mutation.
    fn gate_and_mutate(
        &self,
        decision: &Decision,
        allowed_roots: &[PathBuf],
        protected_paths: &ProtectedPaths,
        metrics: &Metrics,
        root_label: &str,
    ) -> Decision {
        match validate(&decision.absolute_path, allowed_roots, protected_paths) {
            ValidationOutcome::Ok => {}
            ValidationOutcome::Blocked(reason) => {
                return blocked_decision(decision, reason);
            }
        }

        if self.dry_run {
            // Dry-run: zero mutating syscalls, but the record still carries
            // action=DELETE, annotated by DeletionRecord::from_decision.
            return decision.clone();
        }

        if is_path_open(&decision.absolute_path) {
            return Decision {
                action: Action::Skip,
                primary_reason: PrimaryReason::Error,
                details: Some("file_open".to_string()),
                ..decision.clone()
            };
        }

        match remove(decision) {
            Ok(()) => {
                metrics.record_delete(root_label, decision.size_bytes);
                decision.clone()
            }
            Err(errno_name) => Decision {
                action: Action::Error,
                details: Some(errno_name),
                ..decision.clone()
            },
        }
    }
}

fn blocked_decision(decision: &Decision, reason: BlockedReason) -> Decision {
    let primary_reason = match &reason {
        BlockedReason::Protected => PrimaryReason::Protected,
        BlockedReason::Traversal | BlockedReason::OutsideRoots => PrimaryReason::Error,
        BlockedReason::SymlinkEscape => PrimaryReason::Error,
        BlockedReason::Error(_) => PrimaryReason::Error,
    };
    Decision {
        action: Action::Skip,
        primary_reason,
        details: Some(reason.to_string()),
        ..decision.clone()
    }
}

/// Perform the unlink (file) or remove-empty-dir (directory) mutation.
/// `ENOENT` is success (race with an external deleter); `EACCES`/`EBUSY`/
/// `EROFS` are reported back as the errno name for an `action=ERROR` record.
///
/// On Unix this closes the TOCTOU window the validator's canonicalize-based
/// check leaves open (see `safety::validator::validate`): the parent
/// directory is opened with `O_NOFOLLOW` and pinned by FD first, so a later
/// swap of an ancestor path component cannot retarget the mutating call, then
/// the basename is re-verified not to be a symlink relative to that FD
/// immediately before `unlinkat` runs against the same FD. Platforms without
/// `unlinkat` fall back to a plain path-based remove.
#[cfg(unix)]
fn remove(decision: &Decision) -> std::result::Result<(), String> {
    use std::os::unix::fs::OpenOptionsExt;

    use nix::errno::Errno;
    use nix::fcntl::AtFlags;
    use nix::sys::stat::{SFlag, fstatat};
    use nix::unistd::{UnlinkatFlags, unlinkat};

    let path = &decision.absolute_path;
    let Some(parent) = path.parent() else {
        return Err("no_parent".to_string());
    };
    let Some(file_name) = path.file_name() else {
        return Err("no_file_name".to_string());
    };

    let parent_dir = match fs::OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_DIRECTORY | libc::O_NOFOLLOW)
        .open(parent)
    {
        Ok(dir) => dir,
        // The parent vanished or was replaced by a symlink between scan and
        // delete: race with an external deleter, or a TOCTOU swap. Either
        // way there is nothing left at the validated location to unlink.
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(errno_name(&err)),
    };

    match fstatat(&parent_dir, file_name, AtFlags::AT_SYMLINK_NOFOLLOW) {
        Ok(stat) => {
            if stat.st_mode & SFlag::S_IFMT.bits() == SFlag::S_IFLNK.bits() {
                return Err("symlink_at_unlink".to_string());
            }
        }
        Err(Errno::ENOENT) => return Ok(()),
        Err(err) => return Err(errno_from_nix(err)),
    }

    let flag = match decision.object_type {
        ObjectType::File => UnlinkatFlags::NoRemoveDir,
        ObjectType::Directory | ObjectType::EmptyDirectory => UnlinkatFlags::RemoveDir,
    };

    match unlinkat(&parent_dir, file_name, flag) {
        Ok(()) => Ok(()),
        Err(Errno::ENOENT) => Ok(()),
        Err(err) => Err(errno_from_nix(err)),
    }
}

#[cfg(not(unix))]
fn remove(decision: &Decision) -> std::result::Result<(), String> {
    let result = match decision.object_type {
        ObjectType::File => fs::remove_file(&decision.absolute_path),
        ObjectType::Directory | ObjectType::EmptyDirectory => {
            fs::remove_dir(&decision.absolute_path)
        }
    };

    match result {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(errno_name(&err)),
    }
}

#[cfg(unix)]
fn errno_from_nix(err: nix::errno::Errno) -> String {
    match err {
        nix::errno::Errno::EACCES => "EACCES".to_string(),
        nix::errno::Errno::EBUSY => "EBUSY".to_string(),
        nix::errno::Errno::EROFS => "EROFS".to_string(),
        other => format!("errno:{}", other as i32),
    }
}

/// Best-effort check that no running process still holds `target` open.
///
/// Linux-only, `/proc/*/fd` scan; a file a process has open is skipped
/// rather than unlinked out from under it. Not a spec invariant — pure
/// production hardening costing nothing in dry-run mode, since this is only
/// reached after the dry-run short-circuit above.
fn is_path_open(target: &std::path::Path) -> bool {
    #[cfg(target_os = "linux")]
    {
        is_path_open_linux(target)
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = target;
        false
    }
}

#[cfg(target_os = "linux")]
fn is_path_open_linux(target: &std::path::Path) -> bool {
    let Ok(target_canon) = target.canonicalize() else {
        return false;
    };

    let Ok(entries) = fs::read_dir("/proc") else {
        return false;
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        if !name_str.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }

        let Ok(fds) = fs::read_dir(entry.path().join("fd")) else {
            continue;
        };

        for fd_entry in fds.flatten() {
            if let Ok(link_target) = fs::read_link(fd_entry.path())
                && fd_link_matches_target(&target_canon, &link_target)
            {
                return true;
            }
        }
    }

    false
}

#[cfg(target_os = "linux")]
fn fd_link_matches_target(target_canon: &std::path::Path, fd_link: &std::path::Path) -> bool {
    let Some(link_path) = normalize_fd_link_path(fd_link) else {
        return false;
    };
    link_path == target_canon || link_path.starts_with(target_canon)
}

#[cfg(target_os = "linux")]
fn normalize_fd_link_path(fd_link: &std::path::Path) -> Option<PathBuf> {
    let raw = fd_link.to_string_lossy();
    let trimmed = raw.strip_suffix(" (deleted)").unwrap_or_else(|| raw.as_ref());
    if !trimmed.starts_with('/') {
        return None;
    }
    let path = std::path::Path::new(trimmed);
    Some(path.canonicalize().unwrap_or_else(|_| path.to_path_buf()))
}

fn errno_name(err: &std::io::Error) -> String {
    #[cfg(unix)]
    {
        match err.raw_os_error() {
            Some(libc::EACCES) => "EACCES".to_string(),
            Some(libc::EBUSY) => "EBUSY".to_string(),
            Some(libc::EROFS) => "EROFS".to_string(),
            Some(code) => format!("errno:{code}"),
            None => err.to_string(),
        }
    }
    #[cfg(not(unix))]
    {
        err.to_string()
    }
}
