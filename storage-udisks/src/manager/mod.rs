// SPDX-License-Identifier: GPL-3.0-only

//! Partition collection
//!
//! The `PartitionManager` owns every `Partition` record. The monitor mutates
//! records through it by index or device name and never holds on to them.

pub mod proc;

use regex::Regex;
use storage_types::{ActiveState, Partition, PartitionStatus};
use tracing::{info, warn};

use crate::config::MonitorConfig;
use crate::dbus::defines::UDISKS2_BLOCK_DEVICES_PATH;
use crate::error::Result;
pub use proc::{BlockDeviceEntry, PartitionSource, ProcPartitionSource};

/// Device names added and removed by a refresh
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl RefreshOutcome {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

pub struct PartitionManager {
    partitions: Vec<Partition>,
    supported_filesystems: Vec<String>,
    external_device: Regex,
    source: Box<dyn PartitionSource>,
}

impl PartitionManager {
    pub fn new(config: &MonitorConfig, source: Box<dyn PartitionSource>) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            partitions: Vec::new(),
            supported_filesystems: config.supported_filesystems.clone(),
            external_device: config.external_device_regex()?,
            source,
        })
    }

    /// Manager reading procfs at the paths named in `config`
    pub fn from_config(config: &MonitorConfig) -> Result<Self> {
        let source = ProcPartitionSource::new(&config.partitions_path, &config.mountinfo_path);
        Self::new(config, Box::new(source))
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn partition(&self, device_name: &str) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.device_name == device_name)
    }

    /// External partitions, optionally without whole-disk parents
    pub fn external_partitions(&self, exclude_parents: bool) -> Vec<&Partition> {
        self.partitions
            .iter()
            .filter(|p| self.is_external_device(&p.device_name))
            .filter(|p| !(exclude_parents && p.is_parent))
            .collect()
    }

    pub fn supported_filesystems(&self) -> &[String] {
        &self.supported_filesystems
    }

    pub fn supports_filesystem(&self, fs_type: &str) -> bool {
        self.supported_filesystems.iter().any(|fs| fs == fs_type)
    }

    pub fn is_external_device(&self, device_name: &str) -> bool {
        self.external_device.is_match(device_name)
    }

    /// True for `/org/freedesktop/UDisks2/block_devices/<external device>`
    pub fn is_external_block_path(&self, object_path: &str) -> bool {
        object_path
            .strip_prefix(UDISKS2_BLOCK_DEVICES_PATH)
            .is_some_and(|name| self.is_external_device(name))
    }

    /// Indices of partitions whose device name is in `device_names`, in
    /// partition order. Snapshot these before mutating.
    pub(crate) fn indices_for_device_names(&self, device_names: &[&str]) -> Vec<usize> {
        self.partitions
            .iter()
            .enumerate()
            .filter(|(_, p)| device_names.contains(&p.device_name.as_str()))
            .map(|(index, _)| index)
            .collect()
    }

    pub(crate) fn indices_for_device_path(&self, device_path: &str) -> Vec<usize> {
        self.partitions
            .iter()
            .enumerate()
            .filter(|(_, p)| p.device_path == device_path)
            .map(|(index, _)| index)
            .collect()
    }

    pub(crate) fn partition_mut(&mut self, index: usize) -> Option<&mut Partition> {
        self.partitions.get_mut(index)
    }

    /// Apply a status reported for `device_name`. Returns the partitions whose
    /// status changed.
    pub fn apply_status(&mut self, device_name: &str, status: PartitionStatus) -> Vec<Partition> {
        let mut changed = Vec::new();

        for partition in self
            .partitions
            .iter_mut()
            .filter(|p| p.device_name == device_name)
        {
            if partition.status() == status {
                continue;
            }

            partition.set_state(status, status.default_active_state());
            changed.push(partition.clone());
        }

        changed
    }

    /// Re-enumerate block devices, keeping only external ones.
    ///
    /// Existing records keep their state; new ones start `Mounted` or
    /// `Unmounted` depending on the mount table. A failing source leaves the
    /// collection untouched.
    pub fn refresh(&mut self) -> RefreshOutcome {
        let entries = match self.source.block_devices() {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to enumerate block devices: {e}");
                return RefreshOutcome::default();
            }
        };

        let external: Vec<BlockDeviceEntry> = entries
            .into_iter()
            .filter(|entry| self.is_external_device(&entry.name))
            .collect();

        let mut outcome = RefreshOutcome::default();

        self.partitions.retain(|partition| {
            let keep = external.iter().any(|e| e.name == partition.device_name);
            if !keep {
                outcome.removed.push(partition.device_name.clone());
            }
            keep
        });

        for entry in &external {
            let is_parent = external
                .iter()
                .any(|other| is_child_device(&entry.name, &other.name));

            if let Some(partition) = self
                .partitions
                .iter_mut()
                .find(|p| p.device_name == entry.name)
            {
                partition.bytes_total = entry.bytes_total;
                partition.is_parent = is_parent;
                continue;
            }

            let mut partition = Partition::new(&entry.name);
            partition.bytes_total = entry.bytes_total;
            partition.is_parent = is_parent;
            match &entry.mount_path {
                Some(mount_path) => {
                    partition.mount_path = mount_path.clone();
                    partition.set_state(PartitionStatus::Mounted, ActiveState::Active);
                }
                None => partition.set_state(PartitionStatus::Unmounted, ActiveState::Inactive),
            }

            outcome.added.push(entry.name.clone());
            self.partitions.push(partition);
        }

        if !outcome.is_empty() {
            info!(
                "Partitions refreshed: added {:?}, removed {:?}",
                outcome.added, outcome.removed
            );
        }

        outcome
    }
}

/// `child` is a partition of `parent` (`sdb` → `sdb1`, `mmcblk1` → `mmcblk1p1`).
fn is_child_device(parent: &str, child: &str) -> bool {
    let Some(suffix) = child.strip_prefix(parent) else {
        return false;
    };

    // Names ending in a digit separate the partition number with 'p'.
    let digits = if parent.ends_with(|c: char| c.is_ascii_digit()) {
        match suffix.strip_prefix('p') {
            Some(digits) => digits,
            None => return false,
        }
    } else {
        suffix
    };
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}
