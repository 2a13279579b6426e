//! Pure safety gate: reject any path outside allowed roots or inside a
//! protected prefix, and detect symlink escapes.
//!
//! Protected-prefix matching supports glob patterns in addition to literal
//! absolute prefixes, the way the longest-prefix PathRule resolution in
//! `classify::classifier` does — both reuse the same glob compiler here.

#![allow(missing_docs)]

use std::fmt;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::core::errors::{Result, StorageSageError};
use crate::core::paths::{contains_parent_dir_component, is_component_prefix};

/// Why the validator refused a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockedReason {
    /// The path is not absolute or contains a literal `..` component.
    Traversal,
    /// No configured scan root is a path-component prefix of the path.
    OutsideRoots,
    /// A protected prefix covers the path.
    Protected,
    /// Resolving symlinks along the path leaves an allowed root.
    SymlinkEscape,
    /// The resolver itself failed (ELOOP, ENOENT, EACCES, ...); caller treats
    /// this as SKIP with `primary_reason=error`, never as DELETE.
    Error(String),
}

impl fmt::Display for BlockedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Traversal => write!(f, "traversal"),
            Self::OutsideRoots => write!(f, "outside_roots"),
            Self::Protected => write!(f, "protected"),
            Self::SymlinkEscape => write!(f, "symlink_escape"),
            Self::Error(kind) => write!(f, "error:{kind}"),
        }
    }
}

/// Result of [`validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Ok,
    Blocked(BlockedReason),
}

impl ValidationOutcome {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

#[derive(Debug, Clone)]
struct GlobPrefix {
    original: String,
    compiled: Regex,
}

/// Registry of protected absolute prefixes, literal or glob.
///
/// Grounded in the same glob-to-regex compiler used historically for
/// config-level protection patterns: `**` crosses path components, `*`
/// matches within one, `?` matches a single character.
#[derive(Debug, Clone, Default)]
pub struct ProtectedPaths {
    literal: Vec<PathBuf>,
    globs: Vec<GlobPrefix>,
}

impl ProtectedPaths {
    /// Build a registry from a flat set of absolute prefixes, which may contain
    /// glob metacharacters (`*`, `?`).
    pub fn new(prefixes: &[PathBuf]) -> Result<Self> {
        let mut literal = Vec::new();
        let mut globs = Vec::new();
        for prefix in prefixes {
            let raw = prefix.to_string_lossy();
            if raw.contains('*') || raw.contains('?') {
                globs.push(GlobPrefix {
                    original: raw.to_string(),
                    compiled: glob_to_regex(&raw)?,
                });
            } else {
                literal.push(prefix.clone());
            }
        }
        Ok(Self { literal, globs })
    }

    /// Whether `path` falls under a protected prefix, or any of its ancestors do.
    #[must_use]
    pub fn covers(&self, path: &Path) -> bool {
        if self
            .literal
            .iter()
            .any(|prefix| is_component_prefix(prefix, path))
        {
            return true;
        }
        if self.globs.is_empty() {
            return false;
        }
        let mut current = Some(path);
        while let Some(p) = current {
            let p_str = p.to_string_lossy().replace('\\', "/");
            if self.globs.iter().any(|g| g.compiled.is_match(&p_str)) {
                return true;
            }
            current = p.parent();
        }
        false
    }
}

/// Convert a shell-style glob pattern to an anchored regex.
///
/// Shared with `classify::classifier`'s longest-prefix `PathRule` matching,
/// which needs the same `**`/`*`/`?` semantics for `match_prefix`.
pub(crate) fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let normalized_pattern = pattern.replace('\\', "/");
    let mut regex_str = String::with_capacity(pattern.len() * 2);
    regex_str.push('^');

    let chars: Vec<char> = normalized_pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if i + 1 < chars.len() && chars[i + 1] == '*' => {
                if i + 2 < chars.len() && chars[i + 2] == '/' {
                    regex_str.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    regex_str.push_str(".*");
                    i += 2;
                }
            }
            '*' => {
                regex_str.push_str("[^/]*");
                i += 1;
            }
            '?' => {
                regex_str.push_str("[^/]");
                i += 1;
            }
            '.' | '+' | '(' | ')' | '{' | '}' | '[' | ']' | '^' | '$' | '|' | '\\' => {
                regex_str.push('\\');
                regex_str.push(chars[i]);
                i += 1;
            }
            c => {
                regex_str.push(c);
                i += 1;
            }
        }
    }
    regex_str.push('$');

    Regex::new(&regex_str).map_err(|err| StorageSageError::ConfigInvalid {
        details: format!("invalid protected-path pattern {pattern:?}: {err}"),
    })
}

/// Validate `path` against `allowed_roots` and `protected_paths`.
///
/// `path` is assumed to already be an absolute, lexically cleaned filesystem
/// path (the Scanner produces paths in this form). The function has no side
/// effects beyond the symlink resolve and is safe to call concurrently.
///
/// This check and the later unlink are not atomic: between this call
/// returning `Ok` and the Deleter's unlink, a symlink could be swapped in.
/// The Deleter closes that window by reopening the parent directory and
/// re-verifying the basename is not a symlink immediately before the
/// mutating syscall (see `deleter::deleter`), rather than trusting this
/// check alone.
#[must_use]
pub fn validate(path: &Path, allowed_roots: &[PathBuf], protected_paths: &ProtectedPaths) -> ValidationOutcome {
    if !path.is_absolute() || contains_parent_dir_component(path) {
        return ValidationOutcome::Blocked(BlockedReason::Traversal);
    }

    if !allowed_roots
        .iter()
        .any(|root| is_component_prefix(root, path))
    {
        return ValidationOutcome::Blocked(BlockedReason::OutsideRoots);
    }

    if protected_paths.covers(path) {
        return ValidationOutcome::Blocked(BlockedReason::Protected);
    }

    match std::fs::canonicalize(path) {
        Ok(real) => {
            if allowed_roots.iter().any(|root| {
                std::fs::canonicalize(root)
                    .map(|real_root| is_component_prefix(&real_root, &real))
                    .unwrap_or(false)
            }) {
                ValidationOutcome::Ok
            } else {
                ValidationOutcome::Blocked(BlockedReason::SymlinkEscape)
            }
        }
        // A path that vanished between scan and validate (ENOENT), or one the
        // validator cannot resolve (ELOOP, EACCES): treat as SKIP, never DELETE.
        Err(err) => {
            if err.kind() == std::io::ErrorKind::NotFound {
                ValidationOutcome::Blocked(BlockedReason::Error("not_found".to_string()))
            } else {
                ValidationOutcome::Blocked(BlockedReason::Error(format!("{}", err.kind())))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn no_protections() -> ProtectedPaths {
        ProtectedPaths::default()
    }

    #[test]
    fn rejects_relative_path() {
        let outcome = validate(
            Path::new("relative/path"),
            &[PathBuf::from("/data")],
            &no_protections(),
        );
        assert_eq!(
            outcome,
            ValidationOutcome::Blocked(BlockedReason::Traversal)
        );
    }

    #[test]
    fn rejects_path_with_parent_dir_component() {
        let outcome = validate(
            Path::new("/data/../etc/passwd"),
            &[PathBuf::from("/data")],
            &no_protections(),
        );
        assert_eq!(
            outcome,
            ValidationOutcome::Blocked(BlockedReason::Traversal)
        );
    }

    #[test]
    fn rejects_path_outside_roots() {
        let outcome = validate(
            Path::new("/etc/passwd"),
            &[PathBuf::from("/data")],
            &no_protections(),
        );
        assert_eq!(
            outcome,
            ValidationOutcome::Blocked(BlockedReason::OutsideRoots)
        );
    }

    #[test]
    fn component_prefix_is_not_string_prefix() {
        // /data is not a component-prefix of /database
        let outcome = validate(
            Path::new("/database/file"),
            &[PathBuf::from("/data")],
            &no_protections(),
        );
        assert_eq!(
            outcome,
            ValidationOutcome::Blocked(BlockedReason::OutsideRoots)
        );
    }

    #[test]
    fn rejects_protected_literal_prefix() {
        let protected = ProtectedPaths::new(&[PathBuf::from("/data/keep")]).unwrap();
        let tmp = TempDir::new().unwrap();
        let keep = tmp.path().join("keep");
        fs::create_dir_all(&keep).unwrap();
        let file = keep.join("x.log");
        fs::write(&file, b"x").unwrap();

        let protected = ProtectedPaths::new(&[keep.clone()]).unwrap();
        let outcome = validate(&file, &[tmp.path().to_path_buf()], &protected);
        assert_eq!(outcome, ValidationOutcome::Blocked(BlockedReason::Protected));
        let _ = protected;
    }

    #[test]
    fn rejects_protected_glob_prefix() {
        let tmp = TempDir::new().unwrap();
        let build = tmp.path().join("production-app");
        fs::create_dir_all(&build).unwrap();
        let pattern = PathBuf::from(format!("{}/production-*", tmp.path().display()));
        let protected = ProtectedPaths::new(&[pattern]).unwrap();

        let outcome = validate(&build, &[tmp.path().to_path_buf()], &protected);
        assert_eq!(outcome, ValidationOutcome::Blocked(BlockedReason::Protected));
    }

    #[test]
    fn allows_path_within_root_not_protected() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("a.log");
        fs::write(&file, b"x").unwrap();

        let outcome = validate(&file, &[tmp.path().to_path_buf()], &no_protections());
        assert_eq!(outcome, ValidationOutcome::Ok);
    }

    #[cfg(unix)]
    #[test]
    fn detects_symlink_escape() {
        let allowed = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let escape_target = outside.path().join("secret");
        fs::write(&escape_target, b"x").unwrap();

        let link = allowed.path().join("link");
        std::os::unix::fs::symlink(&escape_target, &link).unwrap();

        let outcome = validate(&link, &[allowed.path().to_path_buf()], &no_protections());
        assert_eq!(
            outcome,
            ValidationOutcome::Blocked(BlockedReason::SymlinkEscape)
        );
    }

    #[test]
    fn missing_path_is_blocked_as_error_not_delete() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("gone");
        let outcome = validate(&missing, &[tmp.path().to_path_buf()], &no_protections());
        assert!(matches!(
            outcome,
            ValidationOutcome::Blocked(BlockedReason::Error(_))
        ));
    }
}
