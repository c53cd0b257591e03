// SPDX-License-Identifier: GPL-3.0-only

//! Monitor configuration
//!
//! Loaded from a TOML file; every field has a default so an empty file (or no
//! file at all) yields a working monitor for SD cards and USB sticks.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{MonitorError, Result};

/// Kernel names of removable devices: secondary MMC slots and SCSI disks.
/// `mmcblk0` is the internal eMMC and never matches.
pub const DEFAULT_EXTERNAL_DEVICE_PATTERN: &str = r"mmcblk[1-9]\d*(?:p\d+)?|sd[a-z]+\d*";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Filesystems the monitor will mount automatically and format to
    pub supported_filesystems: Vec<String>,

    /// Regular expression matched against the whole kernel device name
    pub external_device_pattern: String,

    pub partitions_path: PathBuf,
    pub mountinfo_path: PathBuf,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            supported_filesystems: ["vfat", "exfat", "ext4", "ext3", "ext2", "ntfs", "udf", "iso9660"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            external_device_pattern: DEFAULT_EXTERNAL_DEVICE_PATTERN.to_string(),
            partitions_path: PathBuf::from("/proc/partitions"),
            mountinfo_path: PathBuf::from("/proc/self/mountinfo"),
        }
    }
}

impl MonitorConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|error| MonitorError::Io {
            path: path.to_path_buf(),
            reason: error.to_string(),
        })?;

        let config: MonitorConfig =
            toml::from_str(&raw).map_err(|error| MonitorError::Config(error.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load `path` when given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.supported_filesystems.is_empty() {
            return Err(MonitorError::Config(
                "supported_filesystems must not be empty".to_string(),
            ));
        }

        if self.supported_filesystems.iter().any(|fs| fs.trim().is_empty()) {
            return Err(MonitorError::Config(
                "supported_filesystems must not contain empty entries".to_string(),
            ));
        }

        self.external_device_regex()?;
        Ok(())
    }

    /// The external device pattern, anchored to the whole device name.
    pub fn external_device_regex(&self) -> Result<Regex> {
        Regex::new(&format!("^(?:{})$", self.external_device_pattern)).map_err(|error| {
            MonitorError::Pattern {
                pattern: self.external_device_pattern.clone(),
                reason: error.to_string(),
            }
        })
    }
}
