//! The persisted row written for every Deleter decision.

#![allow(missing_docs)]

use chrono::{DateTime, Utc};

use crate::classify::decision::{Decision, Mode, PrimaryReason};

/// An immutable append-only audit row.
///
/// `id` and `created_at` are populated by the store on insert; a freshly
/// built record (via [`DeletionRecord::from_decision`]) leaves them at their
/// defaults.
#[derive(Debug, Clone)]
pub struct DeletionRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub path: String,
    pub file_name: String,
    pub object_type: String,
    pub size_bytes: u64,
    pub deletion_reason: String,
    pub primary_reason: String,
    pub mode: String,
    pub priority: i32,
    pub age_days: i64,
    pub age_threshold_days: Option<u32>,
    pub actual_age_days: Option<i64>,
    pub disk_threshold_percent: Option<u8>,
    pub actual_disk_percent: Option<f64>,
    pub stacked_threshold_percent: Option<u8>,
    pub stacked_age_days: Option<u32>,
    pub path_rule: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Policy context captured alongside a [`Decision`] for the record's
/// threshold/actual columns.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicySnapshot {
    pub age_threshold_days: Option<u32>,
    pub disk_threshold_percent: Option<u8>,
    pub actual_disk_percent: Option<f64>,
    pub stacked_threshold_percent: Option<u8>,
    pub stacked_age_days: Option<u32>,
}

impl DeletionRecord {
    /// Build a record from a [`Decision`], annotating dry-run deletions per
    /// the global invariant that dry-run records still carry `action=DELETE`.
    #[must_use]
    pub fn from_decision(decision: &Decision, snapshot: PolicySnapshot, dry_run: bool) -> Self {
        let now = Utc::now();
        let file_name = decision
            .absolute_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let mut deletion_reason = human_reason(decision.primary_reason, decision.mode);
        if dry_run && decision.action == crate::classify::decision::Action::Delete {
            deletion_reason.push_str(" (dry-run)");
        }

        Self {
            id: 0,
            timestamp: now,
            action: decision.action.to_string(),
            path: decision.absolute_path.to_string_lossy().to_string(),
            file_name,
            object_type: format!("{:?}", decision.object_type).to_lowercase(),
            size_bytes: decision.size_bytes,
            deletion_reason,
            primary_reason: decision.primary_reason.to_string(),
            mode: decision.mode.to_string(),
            priority: decision.priority,
            age_days: decision.age_days,
            age_threshold_days: snapshot.age_threshold_days,
            actual_age_days: Some(decision.age_days),
            disk_threshold_percent: snapshot.disk_threshold_percent,
            actual_disk_percent: snapshot.actual_disk_percent,
            stacked_threshold_percent: snapshot.stacked_threshold_percent,
            stacked_age_days: snapshot.stacked_age_days,
            path_rule: decision.path_rule_id.clone(),
            error_message: decision.details.clone(),
            created_at: now,
        }
    }
}

fn human_reason(reason: PrimaryReason, mode: Mode) -> String {
    match reason {
        PrimaryReason::AgeThreshold => "exceeded age threshold".to_string(),
        PrimaryReason::DiskThreshold => "disk usage above configured maximum".to_string(),
        PrimaryReason::StackedCleanup => "emergency stack cleanup".to_string(),
        PrimaryReason::Combined => {
            "exceeded age threshold during disk-usage cleanup".to_string()
        }
        PrimaryReason::Protected => "path is protected".to_string(),
        PrimaryReason::NfsStale => "NFS stale handle aborted subtree".to_string(),
        PrimaryReason::Error => format!("error during {mode} cycle"),
    }
}
