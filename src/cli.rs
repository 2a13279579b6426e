//! Top-level CLI definition for the daemon binary.

#![allow(missing_docs)]

use std::path::PathBuf;

use clap::Parser;

/// StorageSage — reclaims disk space on monitored directories under age,
/// disk-usage, and emergency stack policies.
#[derive(Debug, Parser)]
#[command(
    name = "storagesage",
    author,
    version,
    about = "Disk cleanup daemon with an audited, policy-driven deleter",
    long_about = None
)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, value_name = "PATH")]
    pub config: PathBuf,
    /// Run exactly one cleanup cycle across all scan roots, then exit 0.
    #[arg(long)]
    pub once: bool,
    /// Override the configured `dry_run` setting to true for this run.
    #[arg(long)]
    pub dry_run: bool,
}
