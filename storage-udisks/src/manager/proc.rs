// SPDX-License-Identifier: GPL-3.0-only

//! Block device enumeration from procfs

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{MonitorError, Result};

/// One kernel block device with its current mount point, if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDeviceEntry {
    pub name: String,
    pub bytes_total: u64,
    pub mount_path: Option<String>,
}

/// Source of the current block device set
pub trait PartitionSource: Send {
    fn block_devices(&self) -> Result<Vec<BlockDeviceEntry>>;
}

/// Reads `/proc/partitions` and the mount table
#[derive(Debug, Clone)]
pub struct ProcPartitionSource {
    partitions_path: PathBuf,
    mountinfo_path: PathBuf,
}

impl ProcPartitionSource {
    pub fn new(partitions_path: impl Into<PathBuf>, mountinfo_path: impl Into<PathBuf>) -> Self {
        Self {
            partitions_path: partitions_path.into(),
            mountinfo_path: mountinfo_path.into(),
        }
    }
}

impl PartitionSource for ProcPartitionSource {
    fn block_devices(&self) -> Result<Vec<BlockDeviceEntry>> {
        let partitions = read(&self.partitions_path)?;
        let mountinfo = read(&self.mountinfo_path)?;

        let mounts = parse_mount_sources(&mountinfo);
        let entries = parse_partitions(&partitions)
            .into_iter()
            .map(|(name, bytes_total)| {
                let mount_path = mounts.get(&format!("/dev/{name}")).cloned();
                BlockDeviceEntry {
                    name,
                    bytes_total,
                    mount_path,
                }
            })
            .collect();

        Ok(entries)
    }
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|error| MonitorError::Io {
        path: path.to_path_buf(),
        reason: error.to_string(),
    })
}

/// Parse `/proc/partitions` into `(name, size in bytes)`.
///
/// The file starts with a `major minor #blocks name` header and a blank line;
/// sizes are in 1 KiB blocks.
pub fn parse_partitions(input: &str) -> Vec<(String, u64)> {
    input
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let major = fields.next()?;
            let _minor = fields.next()?;
            let blocks = fields.next()?;
            let name = fields.next()?;

            major.parse::<u32>().ok()?;
            let blocks = blocks.parse::<u64>().ok()?;
            Some((name.to_string(), blocks.saturating_mul(1024)))
        })
        .collect()
}

/// Map mount source (e.g. `/dev/sdb1`) to its first mount point from `/proc/self/mountinfo`.
pub fn parse_mount_sources(input: &str) -> HashMap<String, String> {
    let mut mounts = HashMap::new();

    for line in input.lines().filter(|line| !line.trim().is_empty()) {
        let Some((left, right)) = line.split_once(" - ") else {
            continue;
        };

        let Some(mount_point) = left.split_whitespace().nth(4) else {
            continue;
        };

        let mut right_fields = right.split_whitespace();
        let _fs_type = right_fields.next();
        let Some(source) = right_fields.next() else {
            continue;
        };

        mounts
            .entry(source.to_string())
            .or_insert_with(|| unescape_mount_field(mount_point));
    }

    mounts
}

/// Undo the kernel's octal escaping (`\040` for a space). Escapes decode to
/// raw bytes so multi-byte UTF-8 paths survive.
fn unescape_mount_field(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut output = Vec::with_capacity(bytes.len());
    let mut index = 0;

    while index < bytes.len() {
        let escape = bytes.get(index + 1..index + 4);
        if bytes[index] == b'\\'
            && let Some(digits) = escape
            && digits.iter().all(|b| (b'0'..=b'7').contains(b))
            && let Ok(num) = u8::from_str_radix(&value[index + 1..index + 4], 8)
        {
            output.push(num);
            index += 4;
            continue;
        }

        output.push(bytes[index]);
        index += 1;
    }

    String::from_utf8_lossy(&output).into_owned()
}
