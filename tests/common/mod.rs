//! Shared test infrastructure for `storagesage` integration tests.
//!
//! Provides `run_cli_case()` (a thin CLI runner around the compiled
//! `storagesage` binary) and `TestEnvironment` (a throwaway directory tree
//! builder with controllable file ages).

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::{Duration, SystemTime};

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_storagesage") {
        let p = PathBuf::from(path);
        if p.exists() {
            return p;
        }
    }
    let exe_name = if cfg!(windows) {
        "storagesage.exe"
    } else {
        "storagesage"
    };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!(
            "unable to resolve storagesage binary path (checked CARGO_BIN_EXE_storagesage and debug sibling path)"
        ),
    }
}

pub fn run_cli_case(args: &[&str]) -> CmdResult {
    let bin_path = resolve_bin_path();
    let output = Command::new(&bin_path)
        .args(args)
        .env("RUST_LOG", "off")
        .output()
        .expect("execute storagesage command");

    CmdResult {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    }
}

/// Builder for a throwaway directory tree with controllable file ages.
pub struct TestEnvironment {
    root: tempfile::TempDir,
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self {
            root: tempfile::tempdir().expect("create test tempdir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Create a file with `content`, backdated by `age`.
    pub fn create_file(&self, rel_path: &str, content: &[u8], age: Duration) -> PathBuf {
        let path = self.root.path().join(rel_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        fs::write(&path, content).expect("write test file");
        let mtime = SystemTime::now() - age;
        let _ = filetime::set_file_mtime(&path, filetime::FileTime::from_system_time(mtime));
        path
    }

    pub fn create_dir(&self, rel_path: &str) -> PathBuf {
        let path = self.root.path().join(rel_path);
        fs::create_dir_all(&path).expect("create test dir");
        path
    }
}

/// Write a minimal valid TOML config for `root` with a single scan root at
/// `scan_path`, using `max_free_percent=100` so the mode selector always
/// resolves to AGE regardless of the test machine's actual disk fullness.
pub fn write_age_mode_config(config_path: &Path, db_path: &Path, scan_path: &Path, age_threshold_days: u32, dry_run: bool) {
    let toml = format!(
        r#"
database_path = "{db}"
dry_run = {dry_run}

[[scan_roots]]
path = "{scan}"
age_threshold_days = {age_threshold_days}
max_free_percent = 100
"#,
        db = db_path.display(),
        scan = scan_path.display(),
        dry_run = dry_run,
        age_threshold_days = age_threshold_days,
    );
    fs::write(config_path, toml).expect("write test config");
}
