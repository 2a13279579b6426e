//! Embedded WAL-mode audit store: schema migration, record/query/stats,
//! checkpoint and retention operations.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OpenFlags, params};

use crate::core::errors::{Result, StorageSageError};

use super::record::DeletionRecord;

/// Current schema version. Bump and add a migration arm in `migrate` when
/// the `deletion_log` shape changes; never downgrade a stored version.
const SCHEMA_VERSION: i64 = 1;

/// Filters accepted by [`AuditStore::query`].
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub action: Option<String>,
    pub mode: Option<String>,
    pub primary_reason: Option<String>,
    pub path_prefix: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: u32,
    pub offset: u32,
}

/// Aggregate totals returned by [`AuditStore::stats`].
#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub by_action: Vec<(String, i64)>,
    pub by_mode: Vec<(String, i64)>,
    pub by_primary_reason: Vec<(String, i64)>,
    pub total_bytes_deleted: u64,
}

/// Append-oriented persistent log of [`DeletionRecord`] rows.
pub struct AuditStore {
    conn: Connection,
    path: PathBuf,
}

impl AuditStore {
    /// Open (or create) the database at `path`, applying WAL pragmas and
    /// idempotent schema migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| StorageSageError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        apply_pragmas(&conn)?;
        migrate(&conn)?;

        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Open the database read-only, for the query CLI. Returns an empty-shaped
    /// store if the file does not exist yet, per the "absent database is
    /// empty, not an error" contract.
    pub fn open_read_only(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(Some(Self {
            conn,
            path: path.to_path_buf(),
        }))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert one row inside an implicit transaction. Returns the record with
    /// its assigned `id` and `created_at` filled in.
    pub fn record(&self, rec: &DeletionRecord) -> Result<DeletionRecord> {
        self.conn
            .prepare_cached(
                "INSERT INTO deletion_log (
                    timestamp, action, path, file_name, object_type, size_bytes,
                    deletion_reason, primary_reason, mode, priority, age_days,
                    age_threshold_days, actual_age_days, disk_threshold_percent,
                    actual_disk_percent, stacked_threshold_percent, stacked_age_days,
                    path_rule, error_message, created_at
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20)",
            )
            .map_err(|e| StorageSageError::AuditWrite {
                details: e.to_string(),
            })?
            .execute(params![
                rec.timestamp.to_rfc3339(),
                rec.action,
                rec.path,
                rec.file_name,
                rec.object_type,
                rec.size_bytes,
                rec.deletion_reason,
                rec.primary_reason,
                rec.mode,
                rec.priority,
                rec.age_days,
                rec.age_threshold_days,
                rec.actual_age_days,
                rec.disk_threshold_percent,
                rec.actual_disk_percent,
                rec.stacked_threshold_percent,
                rec.stacked_age_days,
                rec.path_rule,
                rec.error_message,
                rec.created_at.to_rfc3339(),
            ])
            .map_err(|e| StorageSageError::AuditWrite {
                details: e.to_string(),
            })?;

        let id = self.conn.last_insert_rowid();
        Ok(DeletionRecord { id, ..rec.clone() })
    }

    /// Paginated reads ordered by `timestamp DESC`.
    pub fn query(&self, filter: &Filter) -> Result<Vec<DeletionRecord>> {
        let mut sql = String::from(
            "SELECT id, timestamp, action, path, file_name, object_type, size_bytes,
                    deletion_reason, primary_reason, mode, priority, age_days,
                    age_threshold_days, actual_age_days, disk_threshold_percent,
                    actual_disk_percent, stacked_threshold_percent, stacked_age_days,
                    path_rule, error_message, created_at
             FROM deletion_log WHERE 1=1",
        );
        let mut clauses = Vec::new();
        if filter.action.is_some() {
            clauses.push(" AND action = ?");
        }
        if filter.mode.is_some() {
            clauses.push(" AND mode = ?");
        }
        if filter.primary_reason.is_some() {
            clauses.push(" AND primary_reason = ?");
        }
        if filter.path_prefix.is_some() {
            clauses.push(" AND path LIKE ?");
        }
        if filter.since.is_some() {
            clauses.push(" AND timestamp >= ?");
        }
        if filter.until.is_some() {
            clauses.push(" AND timestamp <= ?");
        }
        sql.push_str(&clauses.concat());
        sql.push_str(" ORDER BY timestamp DESC LIMIT ? OFFSET ?");

        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| StorageSageError::Sql {
                context: "query",
                details: e.to_string(),
            })?;

        let mut bound: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(a) = &filter.action {
            bound.push(Box::new(a.clone()));
        }
        if let Some(m) = &filter.mode {
            bound.push(Box::new(m.clone()));
        }
        if let Some(r) = &filter.primary_reason {
            bound.push(Box::new(r.clone()));
        }
        if let Some(p) = &filter.path_prefix {
            bound.push(Box::new(format!("{p}%")));
        }
        if let Some(s) = &filter.since {
            bound.push(Box::new(s.to_rfc3339()));
        }
        if let Some(u) = &filter.until {
            bound.push(Box::new(u.to_rfc3339()));
        }
        let limit = if filter.limit == 0 { 100 } else { filter.limit };
        bound.push(Box::new(limit));
        bound.push(Box::new(filter.offset));

        let params_ref: Vec<&dyn rusqlite::ToSql> = bound.iter().map(std::convert::AsRef::as_ref).collect();

        let rows = stmt
            .query_map(params_ref.as_slice(), row_to_record)
            .map_err(|e| StorageSageError::Sql {
                context: "query",
                details: e.to_string(),
            })?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| StorageSageError::Sql {
                context: "query",
                details: e.to_string(),
            })?;
        Ok(rows)
    }

    /// Aggregate totals by action, mode, primary_reason, and bytes deleted.
    pub fn stats(&self) -> Result<Stats> {
        let by_action = self.group_count("action")?;
        let by_mode = self.group_count("mode")?;
        let by_primary_reason = self.group_count("primary_reason")?;
        let total_bytes_deleted: i64 = self
            .conn
            .query_row(
                "SELECT COALESCE(SUM(size_bytes), 0) FROM deletion_log WHERE action = 'DELETE'",
                [],
                |row| row.get(0),
            )
            .map_err(|e| StorageSageError::Sql {
                context: "stats",
                details: e.to_string(),
            })?;
        Ok(Stats {
            by_action,
            by_mode,
            by_primary_reason,
            total_bytes_deleted: total_bytes_deleted.try_into().unwrap_or(0),
        })
    }

    fn group_count(&self, column: &str) -> Result<Vec<(String, i64)>> {
        let sql = format!("SELECT {column}, COUNT(*) FROM deletion_log GROUP BY {column}");
        let mut stmt = self.conn.prepare(&sql).map_err(|e| StorageSageError::Sql {
            context: "stats",
            details: e.to_string(),
        })?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(|e| StorageSageError::Sql {
                context: "stats",
                details: e.to_string(),
            })?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| StorageSageError::Sql {
                context: "stats",
                details: e.to_string(),
            })?;
        Ok(rows)
    }

    /// Merge the WAL into the main file.
    pub fn checkpoint(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
            .map_err(|e| StorageSageError::Sql {
                context: "checkpoint",
                details: e.to_string(),
            })?;
        Ok(())
    }

    /// Delete rows older than `cutoff`. Returns the number of rows removed.
    pub fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let deleted = self
            .conn
            .execute(
                "DELETE FROM deletion_log WHERE timestamp < ?1",
                params![cutoff.to_rfc3339()],
            )
            .map_err(|e| StorageSageError::Sql {
                context: "retention",
                details: e.to_string(),
            })?;
        Ok(deleted)
    }

    /// Reclaim pages freed by retention deletes.
    pub fn compact(&self) -> Result<()> {
        self.conn.execute_batch("VACUUM;").map_err(|e| StorageSageError::Sql {
            context: "compact",
            details: e.to_string(),
        })?;
        Ok(())
    }

    /// Run the store's built-in integrity check. The HealthChecker flips the
    /// `database` component unhealthy when this fails.
    pub fn integrity_check(&self) -> Result<()> {
        let result: String = self
            .conn
            .query_row("PRAGMA integrity_check", [], |row| row.get(0))
            .map_err(|e| StorageSageError::AuditIntegrity {
                details: e.to_string(),
            })?;
        if result.eq_ignore_ascii_case("ok") {
            Ok(())
        } else {
            Err(StorageSageError::AuditIntegrity { details: result })
        }
    }

    #[must_use]
    pub fn is_wal_mode(&self) -> bool {
        self.conn
            .query_row("PRAGMA journal_mode", [], |row| row.get::<_, String>(0))
            .map(|mode| mode.eq_ignore_ascii_case("wal"))
            .unwrap_or(false)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeletionRecord> {
    let timestamp: String = row.get(1)?;
    let created_at: String = row.get(20)?;
    Ok(DeletionRecord {
        id: row.get(0)?,
        timestamp: parse_timestamp(&timestamp),
        action: row.get(2)?,
        path: row.get(3)?,
        file_name: row.get(4)?,
        object_type: row.get(5)?,
        size_bytes: {
            let raw: i64 = row.get(6)?;
            u64::try_from(raw).unwrap_or(0)
        },
        deletion_reason: row.get(7)?,
        primary_reason: row.get(8)?,
        mode: row.get(9)?,
        priority: row.get(10)?,
        age_days: row.get(11)?,
        age_threshold_days: row.get(12)?,
        actual_age_days: row.get(13)?,
        disk_threshold_percent: row.get(14)?,
        actual_disk_percent: row.get(15)?,
        stacked_threshold_percent: row.get(16)?,
        stacked_age_days: row.get(17)?,
        path_rule: row.get(18)?,
        error_message: row.get(19)?,
        created_at: parse_timestamp(&created_at),
    })
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc.timestamp_opt(0, 0).single().expect("epoch is valid"))
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = 5000;
         PRAGMA wal_autocheckpoint = 1000;",
    )?;
    Ok(())
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL,
            applied_at TEXT NOT NULL
        );",
    )?;

    let current: Option<i64> = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .ok();

    if current.is_some_and(|v| v >= SCHEMA_VERSION) {
        return Ok(());
    }

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS deletion_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL,
            action TEXT NOT NULL,
            path TEXT NOT NULL,
            file_name TEXT NOT NULL,
            object_type TEXT NOT NULL,
            size_bytes INTEGER NOT NULL,
            deletion_reason TEXT NOT NULL,
            primary_reason TEXT NOT NULL,
            mode TEXT NOT NULL,
            priority INTEGER NOT NULL,
            age_days INTEGER NOT NULL,
            age_threshold_days INTEGER,
            actual_age_days INTEGER,
            disk_threshold_percent INTEGER,
            actual_disk_percent REAL,
            stacked_threshold_percent INTEGER,
            stacked_age_days INTEGER,
            path_rule TEXT,
            error_message TEXT,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_deletion_log_timestamp ON deletion_log(timestamp);
        CREATE INDEX IF NOT EXISTS idx_deletion_log_action ON deletion_log(action);
        CREATE INDEX IF NOT EXISTS idx_deletion_log_path ON deletion_log(path);
        CREATE INDEX IF NOT EXISTS idx_deletion_log_primary_reason ON deletion_log(primary_reason);
        CREATE INDEX IF NOT EXISTS idx_deletion_log_mode ON deletion_log(mode);
        CREATE INDEX IF NOT EXISTS idx_deletion_log_size_bytes ON deletion_log(size_bytes);
        CREATE INDEX IF NOT EXISTS idx_deletion_log_created_at ON deletion_log(created_at);",
    )?;

    conn.execute(
        "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
        params![SCHEMA_VERSION, Utc::now().to_rfc3339()],
    )?;

    Ok(())
}
