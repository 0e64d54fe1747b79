//! Host abstraction: usage sampling, filesystem growth, mount-table lookup.

#![allow(missing_docs)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::config::HostConfig;
use crate::core::errors::{Result, VrlError};

/// One row of the mount table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MountEntry {
    pub source: String,
    pub target: PathBuf,
    pub fs_type: String,
}

/// OS surface the escalation engine relies on.
pub trait Platform: Send + Sync {
    /// Percentage of blocks in use on the filesystem mounted at `mount_path`.
    fn usage_pct(&self, mount_path: &Path) -> Result<u8>;
    /// Grow the live filesystem on `device` to fill its partition.
    fn grow_filesystem(&self, device: &Path) -> Result<()>;
    /// Source device recorded in the mount table for exactly `mount_path`.
    fn mount_source(&self, mount_path: &Path) -> Result<Option<PathBuf>>;
    fn device_exists(&self, device: &Path) -> bool;
}

/// Integer usage percentage, truncated toward zero.
///
/// Returns `None` for a filesystem that reports no blocks at all.
#[must_use]
pub fn usage_from_blocks(total_blocks: u64, available_blocks: u64) -> Option<u8> {
    if total_blocks == 0 {
        return None;
    }
    let available = available_blocks.min(total_blocks);
    let used = u128::from(total_blocks - available);
    let pct = used * 100 / u128::from(total_blocks);
    u8::try_from(pct).ok()
}

/// Resolve a mount point to the block device backing it and confirm the node exists.
pub fn resolve_device_path(platform: &dyn Platform, mount_path: &Path) -> Result<PathBuf> {
    let Some(device) = platform.mount_source(mount_path)? else {
        return Err(VrlError::MountTable {
            details: format!("no mount table entry for {}", mount_path.display()),
        });
    };
    if !platform.device_exists(&device) {
        return Err(VrlError::DeviceNotFound {
            mount_path: mount_path.to_path_buf(),
            device,
        });
    }
    Ok(device)
}

// ──────────────────── linux ────────────────────

/// Linux implementation using `statvfs`, `/proc/self/mounts` and an external
/// resize tool.
#[derive(Debug, Clone)]
pub struct LinuxPlatform {
    mounts_file: PathBuf,
    resize_tool: String,
}

impl Default for LinuxPlatform {
    fn default() -> Self {
        Self::new(&HostConfig::default())
    }
}

impl LinuxPlatform {
    #[must_use]
    pub fn new(host: &HostConfig) -> Self {
        Self {
            mounts_file: host.mounts_file.clone(),
            resize_tool: host.resize_tool.clone(),
        }
    }

    fn read_mounts(&self) -> Result<Vec<MountEntry>> {
        let raw = fs::read_to_string(&self.mounts_file).map_err(|source| VrlError::MountTable {
            details: format!("{}: {source}", self.mounts_file.display()),
        })?;
        Ok(parse_mount_table(&raw))
    }
}

impl Platform for LinuxPlatform {
    fn usage_pct(&self, mount_path: &Path) -> Result<u8> {
        let stat = nix::sys::statvfs::statvfs(mount_path).map_err(|error| VrlError::Stat {
            path: mount_path.to_path_buf(),
            details: error.to_string(),
        })?;
        usage_from_blocks(stat.blocks(), stat.blocks_available()).ok_or_else(|| VrlError::Stat {
            path: mount_path.to_path_buf(),
            details: "filesystem reports zero blocks".to_string(),
        })
    }

    fn grow_filesystem(&self, device: &Path) -> Result<()> {
        let output = Command::new(&self.resize_tool)
            .arg(device)
            .output()
            .map_err(|error| VrlError::ResizeTool {
                device: device.to_path_buf(),
                details: format!("could not start {}: {error}", self.resize_tool),
            })?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail = stderr.lines().rev().find(|line| !line.trim().is_empty());
        Err(VrlError::ResizeTool {
            device: device.to_path_buf(),
            details: format!(
                "{} exited with {}: {}",
                self.resize_tool,
                output.status,
                tail.unwrap_or("no diagnostic output").trim()
            ),
        })
    }

    fn mount_source(&self, mount_path: &Path) -> Result<Option<PathBuf>> {
        let mounts = self.read_mounts()?;
        Ok(find_exact_mount(mount_path, &mounts).map(|entry| PathBuf::from(&entry.source)))
    }

    fn device_exists(&self, device: &Path) -> bool {
        device.is_absolute() && device.exists()
    }
}

/// Parse `/proc/self/mounts` (fstab format).
fn parse_mount_table(raw: &str) -> Vec<MountEntry> {
    let mut mounts = Vec::new();
    for line in raw.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }
        mounts.push(MountEntry {
            source: unescape_mount_path(fields[0]).to_string_lossy().into_owned(),
            target: unescape_mount_path(fields[1]),
            fs_type: fields[2].to_string(),
        });
    }
    mounts
}

/// Later entries shadow earlier ones mounted on the same target.
fn find_exact_mount<'a>(mount_path: &Path, mounts: &'a [MountEntry]) -> Option<&'a MountEntry> {
    let wanted = normalize(mount_path);
    mounts.iter().rev().find(|entry| normalize(&entry.target) == wanted)
}

fn normalize(path: &Path) -> PathBuf {
    path.components().collect()
}

/// Decode octal escape sequences (`\NNN`) used by the Linux kernel.
fn unescape_mount_path(raw: &str) -> PathBuf {
    let mut bytes = Vec::with_capacity(raw.len());
    let raw_bytes = raw.as_bytes();
    let mut i = 0;
    while i < raw_bytes.len() {
        if raw_bytes[i] == b'\\' && i + 3 < raw_bytes.len() {
            let digits = &raw_bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let val = (digits[0] - b'0') * 64 + (digits[1] - b'0') * 8 + (digits[2] - b'0');
                bytes.push(val);
                i += 4;
                continue;
            }
        }
        bytes.push(raw_bytes[i]);
        i += 1;
    }

    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStringExt;
        PathBuf::from(std::ffi::OsString::from_vec(bytes))
    }
    #[cfg(not(unix))]
    {
        PathBuf::from(String::from_utf8_lossy(&bytes).into_owned())
    }
}

// ──────────────────── mock ────────────────────

/// Ordered record of host and provider calls, shared between mocks so tests
/// can assert on cross-component ordering.
pub type CallJournal = Arc<Mutex<Vec<String>>>;

/// In-memory platform for deterministic tests.
///
/// Usage readings are scripted per mount path and consumed one per sample;
/// the last reading repeats once the script runs out.
#[derive(Debug, Default)]
pub struct MockPlatform {
    usage: Mutex<HashMap<PathBuf, VecDeque<u8>>>,
    failing_stats: Mutex<HashSet<PathBuf>>,
    failing_grows: Mutex<HashSet<PathBuf>>,
    mount_sources: HashMap<PathBuf, PathBuf>,
    devices: HashSet<PathBuf>,
    journal: CallJournal,
}

impl MockPlatform {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Share a call journal with other mocks.
    #[must_use]
    pub fn with_journal(mut self, journal: CallJournal) -> Self {
        self.journal = journal;
        self
    }

    /// Register `mount_path` as mounted from an existing `device`.
    #[must_use]
    pub fn with_mount(mut self, mount_path: impl Into<PathBuf>, device: impl Into<PathBuf>) -> Self {
        let device = device.into();
        self.devices.insert(device.clone());
        self.mount_sources.insert(mount_path.into(), device);
        self
    }

    /// Register a mount whose source device node is missing.
    #[must_use]
    pub fn with_dangling_mount(
        mut self,
        mount_path: impl Into<PathBuf>,
        device: impl Into<PathBuf>,
    ) -> Self {
        self.mount_sources.insert(mount_path.into(), device.into());
        self
    }

    /// Script the readings returned for `mount_path`.
    #[must_use]
    pub fn with_usage(self, mount_path: impl Into<PathBuf>, readings: &[u8]) -> Self {
        self.usage
            .lock()
            .insert(mount_path.into(), readings.iter().copied().collect());
        self
    }

    pub fn fail_stat(&self, mount_path: impl Into<PathBuf>) {
        self.failing_stats.lock().insert(mount_path.into());
    }

    pub fn fail_grow(&self, device: impl Into<PathBuf>) {
        self.failing_grows.lock().insert(device.into());
    }

    #[must_use]
    pub fn journal(&self) -> CallJournal {
        Arc::clone(&self.journal)
    }

    /// Journal entries so far.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.journal.lock().clone()
    }
}

impl Platform for MockPlatform {
    fn usage_pct(&self, mount_path: &Path) -> Result<u8> {
        self.journal
            .lock()
            .push(format!("usage {}", mount_path.display()));
        if self.failing_stats.lock().contains(mount_path) {
            return Err(VrlError::Stat {
                path: mount_path.to_path_buf(),
                details: "mock stat failure".to_string(),
            });
        }
        let mut usage = self.usage.lock();
        let readings = usage.get_mut(mount_path).ok_or_else(|| VrlError::Stat {
            path: mount_path.to_path_buf(),
            details: "mock usage not scripted".to_string(),
        })?;
        let reading = if readings.len() > 1 {
            readings.pop_front()
        } else {
            readings.front().copied()
        };
        reading.ok_or_else(|| VrlError::Stat {
            path: mount_path.to_path_buf(),
            details: "mock usage script is empty".to_string(),
        })
    }

    fn grow_filesystem(&self, device: &Path) -> Result<()> {
        self.journal.lock().push(format!("grow {}", device.display()));
        if self.failing_grows.lock().contains(device) {
            return Err(VrlError::ResizeTool {
                device: device.to_path_buf(),
                details: "mock resize2fs exited with status 1".to_string(),
            });
        }
        Ok(())
    }

    fn mount_source(&self, mount_path: &Path) -> Result<Option<PathBuf>> {
        Ok(self.mount_sources.get(mount_path).cloned())
    }

    fn device_exists(&self, device: &Path) -> bool {
        self.devices.contains(device)
    }
}
