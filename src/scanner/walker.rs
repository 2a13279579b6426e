//! Lazy, single-threaded depth-first directory walker.
//!
//! Unlike a parallel eager walker that buffers an entire tree into memory,
//! this one yields one [`Candidate`] at a time so a cycle never holds more
//! than O(depth) filesystem entries at once, and so a shutdown signal can be
//! honored between entries rather than only at the end of a batch.

#![allow(missing_docs)]

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, UNIX_EPOCH};

use crate::scanner::candidate::{Candidate, ObjectType, ScanFault};

/// Safety net against pathological symlink loops or adversarial tree depth;
/// not user-configurable, because the scan roots themselves are trusted
/// config and no legitimate tree needs to nest this deep.
const MAX_WALK_DEPTH: usize = 1024;

/// Configuration for one root's walk.
#[derive(Debug, Clone)]
pub struct WalkerConfig {
    pub root: PathBuf,
    pub recursive: bool,
    pub io_timeout: Duration,
}

struct DirFrame {
    path: PathBuf,
    depth: usize,
    entries: std::vec::IntoIter<fs::DirEntry>,
    saw_entry: bool,
}

/// Lazy depth-first walk over one scan root.
///
/// Symlinks are never followed. A stat failure on an entry yields a
/// [`Candidate`] carrying a [`ScanFault::StatFailed`] rather than stopping the
/// walk. `ESTALE` aborts only the subtree it occurs in, yielding one fault
/// candidate for that subtree root. Permission-denied on a directory prunes
/// that subtree without retry. The walk never crosses filesystem device
/// boundaries, so a volume mounted under a scan root after startup is not
/// silently swept.
pub struct Scanner {
    stack: Vec<DirFrame>,
    pending_fault: Option<(PathBuf, ScanFault)>,
    recursive: bool,
    io_timeout: Duration,
    root_device: Option<u64>,
    cancel: Arc<AtomicBool>,
}

impl Scanner {
    /// Start a new lazy walk rooted at `config.root`.
    #[must_use]
    pub fn new(config: WalkerConfig, cancel: Arc<AtomicBool>) -> Self {
        let root_device = metadata_no_follow(&config.root, config.io_timeout)
            .ok()
            .map(|m| device_id(&m));
        let mut scanner = Self {
            stack: Vec::new(),
            pending_fault: None,
            recursive: config.recursive,
            io_timeout: config.io_timeout,
            root_device,
            cancel,
        };
        scanner.push_dir(config.root, 0);
        scanner
    }

    fn push_dir(&mut self, path: PathBuf, depth: usize) {
        match read_dir_with_timeout(&path, self.io_timeout) {
            Ok(entries) => self.stack.push(DirFrame {
                path,
                depth,
                entries: entries.into_iter(),
                saw_entry: false,
            }),
            Err(fault) => {
                // The directory itself could not be opened; surface one fault
                // candidate for it and do not push a frame (nothing to prune
                // beyond not descending).
                self.pending_fault = Some((path, fault));
            }
        }
    }
}

impl Iterator for Scanner {
    type Item = Candidate;

    fn next(&mut self) -> Option<Candidate> {
        if self.cancel.load(Ordering::Relaxed) {
            return None;
        }

        if let Some((path, fault)) = self.pending_fault.take() {
            return Some(Candidate {
                absolute_path: path,
                object_type: ObjectType::Directory,
                size_bytes: 0,
                mtime_epoch_seconds: 0,
                fault: Some(fault),
            });
        }

        loop {
            if self.cancel.load(Ordering::Relaxed) {
                return None;
            }

            let Some(frame) = self.stack.last_mut() else {
                return None;
            };

            let Some(entry) = frame.entries.next() else {
                let finished = self.stack.pop().expect("frame present");
                if !finished.saw_entry {
                    return Some(Candidate {
                        absolute_path: finished.path,
                        object_type: ObjectType::EmptyDirectory,
                        size_bytes: 0,
                        mtime_epoch_seconds: 0,
                        fault: None,
                    });
                }
                continue;
            };

            frame.saw_entry = true;
            let depth = frame.depth;
            let path = entry.path();

            let metadata = match metadata_no_follow(&path, self.io_timeout) {
                Ok(m) => m,
                Err(fault) => {
                    return Some(Candidate {
                        absolute_path: path,
                        object_type: ObjectType::File,
                        size_bytes: 0,
                        mtime_epoch_seconds: 0,
                        fault: Some(fault),
                    });
                }
            };

            if metadata.file_type().is_symlink() {
                // Symlinks are never followed during traversal. The safety
                // validator is the place escapes get caught for real
                // deletions; the walker simply never descends through one.
                continue;
            }

            if metadata.is_dir() {
                if !self.recursive && depth > 0 {
                    continue;
                }
                if depth + 1 > MAX_WALK_DEPTH {
                    continue;
                }
                if let Some(root_dev) = self.root_device {
                    if device_id(&metadata) != root_dev {
                        continue;
                    }
                }
                self.push_dir(path, depth + 1);
                if self.pending_fault.is_some() {
                    let (fault_path, fault) = self.pending_fault.take().expect("just set");
                    return Some(Candidate {
                        absolute_path: fault_path,
                        object_type: ObjectType::Directory,
                        size_bytes: 0,
                        mtime_epoch_seconds: 0,
                        fault: Some(fault),
                    });
                }
                continue;
            }

            let mtime = metadata
                .modified()
                .ok()
                .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
                .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX));

            return Some(Candidate {
                absolute_path: path,
                object_type: ObjectType::File,
                size_bytes: metadata.len(),
                mtime_epoch_seconds: mtime,
                fault: None,
            });
        }
    }
}

fn device_id(metadata: &fs::Metadata) -> u64 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        metadata.dev()
    }
    #[cfg(not(unix))]
    {
        let _ = metadata;
        0
    }
}

/// `lstat`-equivalent (never follows the final symlink), bounded by `timeout`.
fn metadata_no_follow(
    path: &Path,
    timeout: Duration,
) -> std::result::Result<fs::Metadata, ScanFault> {
    run_with_timeout(timeout, {
        let path = path.to_path_buf();
        move || fs::symlink_metadata(&path)
    })
    .map_err(classify_io_fault)
}

fn read_dir_with_timeout(
    path: &Path,
    timeout: Duration,
) -> std::result::Result<Vec<fs::DirEntry>, ScanFault> {
    let result = run_with_timeout(timeout, {
        let path = path.to_path_buf();
        move || -> std::io::Result<Vec<fs::DirEntry>> {
            fs::read_dir(&path)?.collect::<std::io::Result<Vec<_>>>()
        }
    });
    result.map_err(classify_io_fault)
}

/// Run a blocking filesystem call on a helper thread, bounding it to
/// `timeout`. A timed-out call is reported to the caller as a stat failure;
/// the helper thread is abandoned (not killed — there is no portable way to
/// interrupt a blocked syscall) and its result is discarded when it arrives.
fn run_with_timeout<T, F>(timeout: Duration, f: F) -> std::io::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> std::io::Result<T> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(f());
    });
    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(_) => Err(std::io::Error::new(
            ErrorKind::TimedOut,
            "filesystem call exceeded io_timeout_seconds",
        )),
    }
}

fn classify_io_fault(err: std::io::Error) -> ScanFault {
    #[cfg(unix)]
    {
        if err.raw_os_error() == Some(libc::ESTALE) {
            return ScanFault::NfsStale;
        }
    }
    match err.kind() {
        ErrorKind::PermissionDenied => ScanFault::PermissionDenied,
        _ => ScanFault::StatFailed(err.to_string()),
    }
}
