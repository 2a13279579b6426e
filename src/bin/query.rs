#![forbid(unsafe_code)]

//! `storagesage-query` — a read-only CLI over the audit store.
//!
//! Never writes to the database; opens it `SQLITE_OPEN_READ_ONLY` via
//! [`AuditStore::open_read_only`]. A missing database file is reported as
//! empty rather than as an error, since the daemon may simply not have run
//! yet.

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{DateTime, Utc};
use clap::Parser;

use storagesage::audit::store::{AuditStore, Filter};

/// Query the deletion audit log left behind by the daemon.
#[derive(Debug, Parser)]
#[command(
    name = "storagesage-query",
    author,
    version,
    about = "Read-only queries over the storagesage audit database"
)]
struct Cli {
    /// Path to the audit database (the daemon's `database_path`).
    #[arg(long, value_name = "PATH")]
    database: PathBuf,
    /// Print aggregate totals by action, mode, and primary reason.
    #[arg(long)]
    stats: bool,
    /// Show the N most recent records, newest first.
    #[arg(long, value_name = "N")]
    recent: Option<u32>,
    /// Only include records at or after this RFC 3339 timestamp.
    #[arg(long, value_name = "TIMESTAMP")]
    since: Option<DateTime<Utc>>,
    /// Only include records whose path starts with this prefix.
    #[arg(long, value_name = "PREFIX")]
    path: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("storagesage-query: {err}");
            ExitCode::from(4)
        }
    }
}

fn run(cli: &Cli) -> Result<(), storagesage::core::errors::StorageSageError> {
    let store = match AuditStore::open_read_only(&cli.database)? {
        Some(store) => store,
        None => {
            println!(
                "no database at {} — the daemon has not run yet (0 records)",
                cli.database.display()
            );
            return Ok(());
        }
    };

    if cli.stats {
        print_stats(&store)?;
    }

    if cli.recent.is_some() || cli.since.is_some() || cli.path.is_some() || !cli.stats {
        print_records(&store, cli)?;
    }

    Ok(())
}

fn print_stats(
    store: &AuditStore,
) -> Result<(), storagesage::core::errors::StorageSageError> {
    let stats = store.stats()?;
    println!("Totals");
    println!("  bytes deleted: {}", format_bytes(stats.total_bytes_deleted));
    print_counts("by action", &stats.by_action);
    print_counts("by mode", &stats.by_mode);
    print_counts("by primary_reason", &stats.by_primary_reason);
    println!();
    Ok(())
}

fn print_counts(label: &str, rows: &[(String, i64)]) {
    println!("  {label}:");
    if rows.is_empty() {
        println!("    (none)");
        return;
    }
    for (key, count) in rows {
        println!("    {key:<20}  {count:>8}");
    }
}

fn print_records(
    store: &AuditStore,
    cli: &Cli,
) -> Result<(), storagesage::core::errors::StorageSageError> {
    let filter = Filter {
        path_prefix: cli.path.clone(),
        since: cli.since,
        limit: cli.recent.unwrap_or(100),
        ..Default::default()
    };
    let records = store.query(&filter)?;

    if records.is_empty() {
        println!("(no matching records)");
        return Ok(());
    }

    println!(
        "  {:<20}  {:<6}  {:<16}  {:>10}  {:<40}",
        "Timestamp", "Action", "Reason", "Size", "Path"
    );
    println!("  {}", "-".repeat(100));
    for rec in &records {
        let timestamp = rec.timestamp.to_rfc3339();
        println!(
            "  {:<20}  {:<6}  {:<16}  {:>10}  {:<40}",
            &timestamp[..19.min(timestamp.len())],
            rec.action,
            rec.primary_reason,
            format_bytes(rec.size_bytes),
            truncate_path(&rec.path, 40),
        );
    }
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn truncate_path(path: &str, max_len: usize) -> String {
    if path.len() <= max_len {
        path.to_string()
    } else {
        let keep = max_len.saturating_sub(3);
        format!("...{}", &path[path.len() - keep..])
    }
}
