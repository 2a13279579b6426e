//! AGE / DISK-USAGE / STACK mode selection and deletion ordering.
//!
//! Threshold math mirrors `platform::pal::FsStats::free_pct` — `free_percent`
//! here is always the same `available / total * 100` figure that getter
//! computes, fed in by the cycle driver via `monitor::fs_stats`.

#![allow(missing_docs)]

use super::classifier::EffectivePolicy;
use super::decision::{Decision, Mode};

/// Pick exactly one cleanup mode for a root given its effective policy and
/// the current free-space percentage on the filesystem backing it.
#[must_use]
pub fn select_mode(policy: &EffectivePolicy, free_percent: f64) -> Mode {
    if let (Some(stack_threshold), Some(_)) =
        (policy.stack_threshold_percent, policy.stack_age_days)
    {
        if free_percent <= 100.0 - f64::from(stack_threshold) {
            return Mode::Stack;
        }
    }

    if free_percent <= 100.0 - f64::from(policy.max_free_percent) {
        return Mode::DiskUsage;
    }

    Mode::Age
}

/// Order DELETE-eligible decisions for a root according to the tie-break
/// rules for the mode already selected.
///
/// - `DISK-USAGE`: `priority` descending, then `age_days` descending, then
///   `size_bytes` descending — consistently older-first on ties, per the
///   open-question resolution that avoids flip-flopping between
///   largest-first and oldest-first when a deletion would overshoot the
///   target.
/// - `STACK`: oldest first, since the emergency policy wants the longest-
///   lived files gone before free space is reclaimed incrementally.
/// - `AGE`: no ordering is mandated; input (scan) order is preserved.
pub fn order_for_deletion(decisions: &mut [Decision], mode: Mode) {
    match mode {
        Mode::DiskUsage => decisions.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| b.age_days.cmp(&a.age_days))
                .then_with(|| b.size_bytes.cmp(&a.size_bytes))
        }),
        Mode::Stack => decisions.sort_by(|a, b| b.age_days.cmp(&a.age_days)),
        Mode::Age | Mode::None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::decision::{Action, PrimaryReason};
    use crate::scanner::candidate::ObjectType;
    use std::path::PathBuf;

    fn policy() -> EffectivePolicy {
        EffectivePolicy {
            age_threshold_days: 7,
            max_free_percent: 80,
            target_free_percent: Some(20),
            stack_threshold_percent: None,
            stack_age_days: None,
            recursive: true,
            delete_empty_dirs: false,
            priority: 0,
        }
    }

    #[test]
    fn age_mode_is_the_default() {
        assert_eq!(select_mode(&policy(), 90.0), Mode::Age);
    }

    #[test]
    fn disk_usage_mode_triggers_below_max_free() {
        // free_percent=5 => fullness 95% > max_free_percent 80 => DISK-USAGE
        assert_eq!(select_mode(&policy(), 5.0), Mode::DiskUsage);
    }

    #[test]
    fn stack_mode_wins_over_disk_usage_when_configured() {
        let mut p = policy();
        p.stack_threshold_percent = Some(95);
        p.stack_age_days = Some(1);
        assert_eq!(select_mode(&p, 2.0), Mode::Stack);
    }

    #[test]
    fn stack_not_triggered_when_free_above_stack_threshold() {
        let mut p = policy();
        p.stack_threshold_percent = Some(95);
        p.stack_age_days = Some(1);
        // free_percent=10 => fullness 90%, below stack's 95% trigger but
        // still above max_free_percent's 80% trigger => DISK-USAGE
        assert_eq!(select_mode(&p, 10.0), Mode::DiskUsage);
    }

    fn decision(path: &str, priority: i32, age_days: i64, size_bytes: u64) -> Decision {
        Decision {
            absolute_path: PathBuf::from(path),
            object_type: ObjectType::File,
            action: Action::Delete,
            primary_reason: PrimaryReason::DiskThreshold,
            age_days,
            size_bytes,
            mode: Mode::DiskUsage,
            priority,
            path_rule_id: None,
            details: None,
        }
    }

    #[test]
    fn disk_usage_orders_by_priority_then_age_then_size() {
        let mut decisions = vec![
            decision("/data/a", 0, 10, 100),
            decision("/data/b", 0, 30, 100),
            decision("/data/c", 1, 5, 100),
        ];
        order_for_deletion(&mut decisions, Mode::DiskUsage);
        assert_eq!(decisions[0].absolute_path, PathBuf::from("/data/c")); // priority 1 wins
        assert_eq!(decisions[1].absolute_path, PathBuf::from("/data/b")); // older wins on tie
        assert_eq!(decisions[2].absolute_path, PathBuf::from("/data/a"));
    }

    #[test]
    fn disk_usage_older_wins_over_larger_on_priority_tie() {
        let mut decisions = vec![
            decision("/data/big_new", 0, 1, 100 * 1024 * 1024),
            decision("/data/big_old", 0, 30, 100 * 1024 * 1024),
        ];
        order_for_deletion(&mut decisions, Mode::DiskUsage);
        assert_eq!(decisions[0].absolute_path, PathBuf::from("/data/big_old"));
    }

    #[test]
    fn stack_orders_oldest_first() {
        let mut decisions = vec![
            decision("/data/yesterday", 0, 1, 100),
            decision("/data/ancient", 0, 10, 100),
        ];
        order_for_deletion(&mut decisions, Mode::Stack);
        assert_eq!(decisions[0].absolute_path, PathBuf::from("/data/ancient"));
    }

    proptest::proptest! {
        /// `DISK-USAGE` ordering must never flip back to a lower priority,
        /// nor to a younger age on a priority tie, once sorted.
        #[test]
        fn disk_usage_order_is_priority_then_age_monotone(
            entries in proptest::collection::vec(
                (-10i32..10, 0i64..365, 0u64..(1u64 << 40)),
                0..30,
            )
        ) {
            let mut decisions: Vec<Decision> = entries
                .into_iter()
                .enumerate()
                .map(|(i, (priority, age_days, size_bytes))| {
                    decision(&format!("/data/{i}"), priority, age_days, size_bytes)
                })
                .collect();
            order_for_deletion(&mut decisions, Mode::DiskUsage);
            for pair in decisions.windows(2) {
                let (a, b) = (&pair[0], &pair[1]);
                proptest::prop_assert!(
                    a.priority > b.priority
                        || (a.priority == b.priority && a.age_days >= b.age_days)
                        || (a.priority == b.priority
                            && a.age_days == b.age_days
                            && a.size_bytes >= b.size_bytes)
                );
            }
        }

        /// `STACK` ordering is oldest-first regardless of priority or size.
        #[test]
        fn stack_order_is_age_monotone(
            entries in proptest::collection::vec(
                (-10i32..10, 0i64..365, 0u64..(1u64 << 40)),
                0..30,
            )
        ) {
            let mut decisions: Vec<Decision> = entries
                .into_iter()
                .enumerate()
                .map(|(i, (priority, age_days, size_bytes))| {
                    decision(&format!("/data/{i}"), priority, age_days, size_bytes)
                })
                .collect();
            order_for_deletion(&mut decisions, Mode::Stack);
            for pair in decisions.windows(2) {
                proptest::prop_assert!(pair[0].age_days >= pair[1].age_days);
            }
        }
    }
}
