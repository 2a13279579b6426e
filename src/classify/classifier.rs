//! Pure Candidate -> partial-Decision transformation: effective-policy
//! resolution (longest-prefix `PathRule` wins over root defaults) and age
//! computation. Mode-dependent eligibility is layered on by the caller using
//! the `Mode` chosen for the root (see `mode_selector`).

#![allow(missing_docs)]

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::core::config::{PathRuleConfig, ScanRootConfig};
use crate::safety::validator::glob_to_regex;
use crate::scanner::candidate::{Candidate, ObjectType, ScanFault};

use super::decision::{Action, Decision, Mode, PrimaryReason};

/// The policy in effect for one path after resolving root defaults against
/// any matching `PathRule`.
#[derive(Debug, Clone, Copy)]
pub struct EffectivePolicy {
    pub age_threshold_days: u32,
    pub max_free_percent: u8,
    pub target_free_percent: Option<u8>,
    pub stack_threshold_percent: Option<u8>,
    pub stack_age_days: Option<u32>,
    pub recursive: bool,
    pub delete_empty_dirs: bool,
    pub priority: i32,
}

impl From<&ScanRootConfig> for EffectivePolicy {
    fn from(root: &ScanRootConfig) -> Self {
        Self {
            age_threshold_days: root.age_threshold_days,
            max_free_percent: root.max_free_percent,
            target_free_percent: root.target_free_percent,
            stack_threshold_percent: root.stack_threshold_percent,
            stack_age_days: root.stack_age_days,
            recursive: root.recursive,
            delete_empty_dirs: root.delete_empty_dirs,
            priority: root.priority,
        }
    }
}

impl From<&PathRuleConfig> for EffectivePolicy {
    fn from(rule: &PathRuleConfig) -> Self {
        Self {
            age_threshold_days: rule.age_threshold_days,
            max_free_percent: rule.max_free_percent,
            target_free_percent: rule.target_free_percent,
            stack_threshold_percent: rule.stack_threshold_percent,
            stack_age_days: rule.stack_age_days,
            recursive: rule.recursive,
            delete_empty_dirs: rule.delete_empty_dirs,
            priority: rule.priority,
        }
    }
}

/// Resolve the effective policy for `path` under `root`, applying the
/// longest-prefix matching `PathRule` if any, with ties broken by explicit
/// `priority` then lexicographic order of `match_prefix`.
///
/// Returns the resolved policy and, if a rule matched, its `match_prefix` as
/// the `path_rule_id`.
#[must_use]
pub fn resolve_effective_policy(
    path: &Path,
    root: &ScanRootConfig,
) -> (EffectivePolicy, Option<String>) {
    let mut best: Option<&PathRuleConfig> = None;

    for rule in &root.path_rules {
        if !rule_matches(&rule.match_prefix, path) {
            continue;
        }
        best = Some(match best {
            None => rule,
            Some(current) => {
                if rule.match_prefix.len() > current.match_prefix.len() {
                    rule
                } else if rule.match_prefix.len() < current.match_prefix.len() {
                    current
                } else if rule.priority != current.priority {
                    if rule.priority > current.priority {
                        rule
                    } else {
                        current
                    }
                } else if rule.match_prefix < current.match_prefix {
                    rule
                } else {
                    current
                }
            }
        });
    }

    match best {
        Some(rule) => (EffectivePolicy::from(rule), Some(rule.match_prefix.clone())),
        None => (EffectivePolicy::from(root), None),
    }
}

fn rule_matches(pattern: &str, path: &Path) -> bool {
    let path_str = path.to_string_lossy().replace('\\', "/");
    if pattern.contains('*') || pattern.contains('?') {
        glob_to_regex(pattern)
            .map(|re| re.is_match(&path_str))
            .unwrap_or(false)
    } else {
        path_str.starts_with(pattern.as_str())
    }
}

/// `floor((now - mtime) / 86400)`, clamped at 0 for entries with a future mtime.
#[must_use]
pub fn age_days(mtime_epoch_seconds: i64, now: SystemTime) -> i64 {
    let now_secs = now
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0);
    ((now_secs - mtime_epoch_seconds) / 86_400).max(0)
}

/// Classify one Candidate under the already-chosen `mode` for its root.
///
/// Returns `None` when the candidate should produce no audit record at all:
/// an empty directory whose effective policy has `delete_empty_dirs=false`
/// ("skipped silently"), or a file that does not meet its mode's deletion
/// criteria this cycle (it simply isn't considered, not recorded as SKIP).
/// Scan faults and NFS-stale subtree roots always produce a Decision, since
/// the Scanner's contract requires a SKIP record for those.
#[must_use]
pub fn classify_candidate(
    candidate: &Candidate,
    policy: &EffectivePolicy,
    path_rule_id: Option<String>,
    mode: Mode,
    now: SystemTime,
) -> Option<Decision> {
    if let Some(fault) = &candidate.fault {
        let primary_reason = match fault {
            ScanFault::NfsStale => PrimaryReason::NfsStale,
            ScanFault::StatFailed(_) | ScanFault::PermissionDenied => PrimaryReason::Error,
        };
        let details = match fault {
            ScanFault::StatFailed(msg) => Some(msg.clone()),
            ScanFault::PermissionDenied => Some("permission denied".to_string()),
            ScanFault::NfsStale => Some("ESTALE on NFS mount".to_string()),
        };
        return Some(Decision {
            absolute_path: candidate.absolute_path.clone(),
            object_type: candidate.object_type,
            action: Action::Skip,
            primary_reason,
            age_days: 0,
            size_bytes: 0,
            mode: Mode::None,
            priority: policy.priority,
            path_rule_id,
            details,
        });
    }

    if candidate.object_type == ObjectType::EmptyDirectory && !policy.delete_empty_dirs {
        return None;
    }

    let age = age_days(candidate.mtime_epoch_seconds, now);

    let primary_reason = match mode {
        Mode::Age => {
            if age > i64::from(policy.age_threshold_days) {
                PrimaryReason::AgeThreshold
            } else {
                return None;
            }
        }
        Mode::DiskUsage => {
            if age > i64::from(policy.age_threshold_days) {
                PrimaryReason::Combined
            } else {
                PrimaryReason::DiskThreshold
            }
        }
        Mode::Stack => {
            let stack_age = policy.stack_age_days.unwrap_or(u32::MAX);
            if age >= i64::from(stack_age) {
                PrimaryReason::StackedCleanup
            } else {
                return None;
            }
        }
        Mode::None => return None,
    };

    Some(Decision {
        absolute_path: candidate.absolute_path.clone(),
        object_type: candidate.object_type,
        action: Action::Delete,
        primary_reason,
        age_days: age,
        size_bytes: candidate.size_bytes,
        mode,
        priority: policy.priority,
        path_rule_id,
        details: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::PathRuleConfig;
    use std::path::PathBuf;
    use std::time::Duration;

    fn root(age_threshold_days: u32) -> ScanRootConfig {
        ScanRootConfig {
            path: PathBuf::from("/data"),
            age_threshold_days,
            max_free_percent: 80,
            ..Default::default()
        }
    }

    fn candidate(path: &str, age_secs_ago: u64) -> Candidate {
        let now = SystemTime::now();
        let mtime = now - Duration::from_secs(age_secs_ago);
        Candidate {
            absolute_path: PathBuf::from(path),
            object_type: ObjectType::File,
            size_bytes: 1024,
            mtime_epoch_seconds: mtime
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_secs()
                .try_into()
                .unwrap(),
            fault: None,
        }
    }

    #[test]
    fn age_mode_skips_young_files_with_no_decision() {
        let policy = EffectivePolicy::from(&root(7));
        let c = candidate("/data/a.log", 3 * 86_400);
        let decision = classify_candidate(&c, &policy, None, Mode::Age, SystemTime::now());
        assert!(decision.is_none());
    }

    #[test]
    fn age_mode_deletes_old_files() {
        let policy = EffectivePolicy::from(&root(7));
        let c = candidate("/data/a.log", 10 * 86_400);
        let decision = classify_candidate(&c, &policy, None, Mode::Age, SystemTime::now())
            .expect("should be a decision");
        assert_eq!(decision.action, Action::Delete);
        assert_eq!(decision.primary_reason, PrimaryReason::AgeThreshold);
    }

    #[test]
    fn disk_usage_mode_marks_combined_when_also_past_age_threshold() {
        let policy = EffectivePolicy::from(&root(7));
        let c = candidate("/data/a.log", 10 * 86_400);
        let decision = classify_candidate(&c, &policy, None, Mode::DiskUsage, SystemTime::now())
            .expect("should be a decision");
        assert_eq!(decision.primary_reason, PrimaryReason::Combined);
    }

    #[test]
    fn disk_usage_mode_marks_disk_threshold_when_under_age_threshold() {
        let policy = EffectivePolicy::from(&root(7));
        let c = candidate("/data/a.log", 1 * 86_400);
        let decision = classify_candidate(&c, &policy, None, Mode::DiskUsage, SystemTime::now())
            .expect("should be a decision");
        assert_eq!(decision.primary_reason, PrimaryReason::DiskThreshold);
    }

    #[test]
    fn stack_mode_skips_entries_below_stack_age() {
        let mut r = root(7);
        r.stack_age_days = Some(1);
        let policy = EffectivePolicy::from(&r);
        let c = candidate("/data/today.log", 3600);
        let decision = classify_candidate(&c, &policy, None, Mode::Stack, SystemTime::now());
        assert!(decision.is_none());
    }

    #[test]
    fn stack_mode_deletes_entries_at_or_past_stack_age() {
        let mut r = root(7);
        r.stack_age_days = Some(1);
        let policy = EffectivePolicy::from(&r);
        let c = candidate("/data/ancient.log", 10 * 86_400);
        let decision = classify_candidate(&c, &policy, None, Mode::Stack, SystemTime::now())
            .expect("should be a decision");
        assert_eq!(decision.primary_reason, PrimaryReason::StackedCleanup);
    }

    #[test]
    fn empty_directory_silently_skipped_when_policy_disallows() {
        let policy = EffectivePolicy::from(&root(7));
        let c = Candidate {
            absolute_path: PathBuf::from("/data/empty"),
            object_type: ObjectType::EmptyDirectory,
            size_bytes: 0,
            mtime_epoch_seconds: 0,
            fault: None,
        };
        let decision = classify_candidate(&c, &policy, None, Mode::Age, SystemTime::now());
        assert!(decision.is_none());
    }

    #[test]
    fn nfs_stale_fault_always_produces_a_decision() {
        let policy = EffectivePolicy::from(&root(7));
        let c = Candidate {
            absolute_path: PathBuf::from("/data/mount/sub"),
            object_type: ObjectType::Directory,
            size_bytes: 0,
            mtime_epoch_seconds: 0,
            fault: Some(ScanFault::NfsStale),
        };
        let decision = classify_candidate(&c, &policy, None, Mode::Age, SystemTime::now())
            .expect("fault candidates always produce a decision");
        assert_eq!(decision.action, Action::Skip);
        assert_eq!(decision.primary_reason, PrimaryReason::NfsStale);
    }

    #[test]
    fn longest_prefix_rule_wins_over_root_default() {
        let mut r = root(7);
        r.path_rules.push(PathRuleConfig {
            match_prefix: "/data/ephemeral".to_string(),
            age_threshold_days: 1,
            max_free_percent: 80,
            ..Default::default()
        });
        let (policy, rule_id) =
            resolve_effective_policy(Path::new("/data/ephemeral/x.log"), &r);
        assert_eq!(policy.age_threshold_days, 1);
        assert_eq!(rule_id.as_deref(), Some("/data/ephemeral"));
    }

    #[test]
    fn non_matching_path_falls_back_to_root_default() {
        let mut r = root(7);
        r.path_rules.push(PathRuleConfig {
            match_prefix: "/data/ephemeral".to_string(),
            age_threshold_days: 1,
            max_free_percent: 80,
            ..Default::default()
        });
        let (policy, rule_id) = resolve_effective_policy(Path::new("/data/other/x.log"), &r);
        assert_eq!(policy.age_threshold_days, 7);
        assert!(rule_id.is_none());
    }
}
