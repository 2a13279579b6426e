//! PAL trait and platform-specific implementations (currently Linux only).

#![allow(missing_docs)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, StorageSageError};

/// Filesystem statistics for a path/mount.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FsStats {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub available_bytes: u64,
    pub fs_type: String,
    pub mount_point: PathBuf,
    pub is_readonly: bool,
}

impl FsStats {
    /// Percentage of the filesystem that is free, as ModeSelector's thresholds compare against.
    #[must_use]
    pub fn free_pct(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        {
            (self.available_bytes as f64 * 100.0) / self.total_bytes as f64
        }
    }
}

/// Mount-point metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MountPoint {
    pub path: PathBuf,
    pub device: String,
    pub fs_type: String,
    pub is_ram_backed: bool,
}

/// Current system memory info.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemoryInfo {
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub swap_total_bytes: u64,
    pub swap_free_bytes: u64,
}

/// OS abstraction used by the mode selector and health checker.
pub trait Platform: Send + Sync {
    fn fs_stats(&self, path: &Path) -> Result<FsStats>;
    fn mount_points(&self) -> Result<Vec<MountPoint>>;
    fn is_ram_backed(&self, path: &Path) -> Result<bool>;
    fn memory_info(&self) -> Result<MemoryInfo>;
}

/// Linux platform implementation using `/proc` + `statvfs`.
#[derive(Debug, Default)]
pub struct LinuxPlatform;

impl LinuxPlatform {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Platform for LinuxPlatform {
    fn fs_stats(&self, path: &Path) -> Result<FsStats> {
        let mounts = self.mount_points()?;
        let mount = find_mount(path, &mounts).ok_or_else(|| StorageSageError::FsStats {
            path: path.to_path_buf(),
            details: "could not map path to mount point".to_string(),
        })?;
        let stat = nix::sys::statvfs::statvfs(path).map_err(|error| StorageSageError::FsStats {
            path: path.to_path_buf(),
            details: error.to_string(),
        })?;
        let fragment = stat.fragment_size();
        Ok(FsStats {
            total_bytes: stat.blocks().saturating_mul(fragment),
            free_bytes: stat.blocks_free().saturating_mul(fragment),
            available_bytes: stat.blocks_available().saturating_mul(fragment),
            fs_type: mount.fs_type.clone(),
            mount_point: mount.path.clone(),
            is_readonly: stat.flags().contains(nix::sys::statvfs::FsFlags::ST_RDONLY),
        })
    }

    fn mount_points(&self) -> Result<Vec<MountPoint>> {
        let raw = fs::read_to_string("/proc/self/mounts").map_err(|source| StorageSageError::Io {
            path: PathBuf::from("/proc/self/mounts"),
            source,
        })?;
        let mounts = parse_proc_mounts(&raw)?;
        Ok(mounts)
    }

    fn is_ram_backed(&self, path: &Path) -> Result<bool> {
        let mounts = self.mount_points()?;
        let Some(mount) = find_mount(path, &mounts) else {
            return Ok(false);
        };
        Ok(mount.is_ram_backed)
    }

    fn memory_info(&self) -> Result<MemoryInfo> {
        let raw = fs::read_to_string("/proc/meminfo").map_err(|source| StorageSageError::Io {
            path: PathBuf::from("/proc/meminfo"),
            source,
        })?;
        parse_meminfo(&raw)
    }
}

/// In-memory mock implementation for deterministic tests.
#[derive(Debug, Clone, Default)]
pub struct MockPlatform {
    mounts: Vec<MountPoint>,
    stats_by_mount: HashMap<PathBuf, FsStats>,
    memory: MemoryInfo,
}

impl Default for MemoryInfo {
    fn default() -> Self {
        Self {
            total_bytes: 0,
            available_bytes: 0,
            swap_total_bytes: 0,
            swap_free_bytes: 0,
        }
    }
}

impl MockPlatform {
    #[must_use]
    pub fn new(
        mounts: Vec<MountPoint>,
        stats_by_mount: HashMap<PathBuf, FsStats>,
        memory: MemoryInfo,
    ) -> Self {
        Self {
            mounts,
            stats_by_mount,
            memory,
        }
    }
}

impl Platform for MockPlatform {
    fn fs_stats(&self, path: &Path) -> Result<FsStats> {
        let mount = find_mount(path, &self.mounts).ok_or_else(|| StorageSageError::FsStats {
            path: path.to_path_buf(),
            details: "mock mount not found".to_string(),
        })?;
        self.stats_by_mount
            .get(&mount.path)
            .cloned()
            .ok_or_else(|| StorageSageError::FsStats {
                path: mount.path.clone(),
                details: "mock stats not found".to_string(),
            })
    }

    fn mount_points(&self) -> Result<Vec<MountPoint>> {
        Ok(self.mounts.clone())
    }

    fn is_ram_backed(&self, path: &Path) -> Result<bool> {
        Ok(find_mount(path, &self.mounts).is_some_and(|mount| mount.is_ram_backed))
    }

    fn memory_info(&self) -> Result<MemoryInfo> {
        Ok(self.memory.clone())
    }
}

/// Detect active platform implementation.
pub fn detect_platform() -> Result<Arc<dyn Platform>> {
    #[cfg(target_os = "linux")]
    {
        Ok(Arc::new(LinuxPlatform::new()))
    }
    #[cfg(not(target_os = "linux"))]
    {
        Err(StorageSageError::ConfigInvalid {
            details: "only Linux is currently implemented".to_string(),
        })
    }
}

fn parse_proc_mounts(raw: &str) -> Result<Vec<MountPoint>> {
    let mut mounts = Vec::new();
    for line in raw.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 {
            return Err(StorageSageError::MountParse {
                details: format!("invalid /proc/self/mounts line: {line}"),
            });
        }
        let mount_path = unescape_mount_field(fields[1]);
        let fs_type = fields[2].to_string();
        mounts.push(MountPoint {
            path: PathBuf::from(mount_path),
            device: fields[0].to_string(),
            is_ram_backed: is_ram_fs(&fs_type),
            fs_type,
        });
    }
    mounts.sort_by(|left, right| {
        right
            .path
            .as_os_str()
            .len()
            .cmp(&left.path.as_os_str().len())
    });
    Ok(mounts)
}

fn parse_meminfo(raw: &str) -> Result<MemoryInfo> {
    let mut values = HashMap::<&str, u64>::new();
    for line in raw.lines() {
        let mut parts = line.split(':');
        let Some(key) = parts.next() else {
            continue;
        };
        let Some(rest) = parts.next() else {
            continue;
        };
        let first_token = rest
            .split_whitespace()
            .next()
            .ok_or_else(|| StorageSageError::MountParse {
                details: format!("invalid /proc/meminfo line: {line}"),
            })?;
        let kib = first_token
            .parse::<u64>()
            .map_err(|error| StorageSageError::MountParse {
                details: format!("invalid meminfo value in line {line:?}: {error}"),
            })?;
        values.insert(key.trim(), kib.saturating_mul(1024));
    }

    Ok(MemoryInfo {
        total_bytes: *values.get("MemTotal").unwrap_or(&0),
        available_bytes: *values.get("MemAvailable").unwrap_or(&0),
        swap_total_bytes: *values.get("SwapTotal").unwrap_or(&0),
        swap_free_bytes: *values.get("SwapFree").unwrap_or(&0),
    })
}

fn find_mount<'a>(path: &Path, mounts: &'a [MountPoint]) -> Option<&'a MountPoint> {
    mounts
        .iter()
        .filter(|mount| path.starts_with(&mount.path))
        .max_by_key(|mount| mount.path.as_os_str().len())
}

fn is_ram_fs(fs_type: &str) -> bool {
    matches!(fs_type, "tmpfs" | "ramfs" | "devtmpfs")
}

/// Decode octal escape sequences (`\NNN`) used by the Linux kernel in
/// `/proc/mounts` and `/etc/mtab` for special characters in paths.
fn unescape_mount_field(raw: &str) -> String {
    let mut result = String::with_capacity(raw.len());
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let a = bytes[i + 1];
            let b = bytes[i + 2];
            let c = bytes[i + 3];
            if a.is_ascii_digit() && b.is_ascii_digit() && c.is_ascii_digit() {
                let val = (a - b'0') * 64 + (b - b'0') * 8 + (c - b'0');
                result.push(char::from(val));
                i += 4;
                continue;
            }
        }
        result.push(char::from(bytes[i]));
        i += 1;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::{
        FsStats, MountPoint, find_mount, is_ram_fs, parse_meminfo, parse_proc_mounts,
        unescape_mount_field,
    };
    use std::path::{Path, PathBuf};

    #[test]
    fn parses_mount_table() {
        let sample = "/dev/sda1 / ext4 rw,relatime 0 0\n\
                      tmpfs /tmp tmpfs rw,nosuid,nodev 0 0\n";
        let mounts = parse_proc_mounts(sample).expect("mounts should parse");
        assert_eq!(mounts.len(), 2);
        assert!(mounts.iter().any(|entry| entry.path == Path::new("/tmp")));
        assert!(mounts.iter().any(|entry| entry.fs_type == "ext4"));
    }

    #[test]
    fn find_mount_prefers_longest_prefix() {
        let mounts = vec![
            MountPoint {
                path: "/".into(),
                device: "root".to_string(),
                fs_type: "ext4".to_string(),
                is_ram_backed: false,
            },
            MountPoint {
                path: "/tmp".into(),
                device: "tmpfs".to_string(),
                fs_type: "tmpfs".to_string(),
                is_ram_backed: true,
            },
        ];
        let mount = find_mount(Path::new("/tmp/work"), &mounts).expect("mount expected");
        assert_eq!(mount.path, Path::new("/tmp"));
    }

    #[test]
    fn parses_meminfo_with_kib_units() {
        let info = parse_meminfo(
            "MemTotal:       32768000 kB\n\
             MemAvailable:   16384000 kB\n\
             SwapTotal:       8192000 kB\n\
             SwapFree:        4096000 kB\n",
        )
        .expect("meminfo should parse");
        assert_eq!(info.total_bytes, 33_554_432_000);
        assert_eq!(info.available_bytes, 16_777_216_000);
        assert_eq!(info.swap_total_bytes, 8_388_608_000);
        assert_eq!(info.swap_free_bytes, 4_194_304_000);
    }

    #[test]
    fn ram_fs_detection_matches_expected_types() {
        assert!(is_ram_fs("tmpfs"));
        assert!(is_ram_fs("ramfs"));
        assert!(!is_ram_fs("ext4"));
    }

    #[test]
    fn unescape_mount_field_handles_all_octal_sequences() {
        assert_eq!(unescape_mount_field("/mnt/my\\040dir"), "/mnt/my dir");
        assert_eq!(unescape_mount_field("/mnt/a\\011b"), "/mnt/a\tb");
        assert_eq!(unescape_mount_field("/mnt/a\\134b"), "/mnt/a\\b");
        assert_eq!(unescape_mount_field("/mnt/a\\012b"), "/mnt/a\nb");
        assert_eq!(unescape_mount_field("/mnt/simple"), "/mnt/simple");
        assert_eq!(unescape_mount_field("/mnt/a\\04"), "/mnt/a\\04");
    }

    #[test]
    fn free_pct_handles_zero_total() {
        let stats = FsStats {
            total_bytes: 0,
            free_bytes: 0,
            available_bytes: 0,
            fs_type: String::new(),
            mount_point: PathBuf::new(),
            is_readonly: false,
        };
        assert_eq!(stats.free_pct(), 0.0);
    }
}
