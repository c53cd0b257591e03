// SPDX-License-Identifier: GPL-3.0-only

//! Partition record tracked by the monitor
//!
//! A `Partition` is the unit observers care about. It is kept in sync with the
//! UDisks2 block device and job state of the device it describes.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a partition as seen by observers.
///
/// A failed unmount is represented as `Unmounted` with `mount_failed` set and
/// an `ActiveState::Failed` activity label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStatus {
    #[default]
    Unmounted,
    Mounting,
    Mounted,
    Unmounting,
    Formatting,
    Formatted,
}

impl PartitionStatus {
    /// Activity label that accompanies this status when it is applied on its own,
    /// without a job outcome.
    pub fn default_active_state(self) -> ActiveState {
        match self {
            Self::Mounting => ActiveState::Activating,
            Self::Mounted => ActiveState::Active,
            Self::Unmounting => ActiveState::Deactivating,
            Self::Unmounted | Self::Formatting | Self::Formatted => ActiveState::Inactive,
        }
    }
}

/// Activity label, modelled on systemd unit states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveState {
    Activating,
    Active,
    Deactivating,
    #[default]
    Inactive,
    Failed,
}

impl ActiveState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Activating => "activating",
            Self::Active => "active",
            Self::Deactivating => "deactivating",
            Self::Inactive => "inactive",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ActiveState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Partition metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    /// Kernel device name (e.g., "mmcblk1p1")
    pub device_name: String,

    /// Device node path (e.g., "/dev/mmcblk1p1")
    pub device_path: String,

    /// Current mount point, empty when not mounted
    pub mount_path: String,

    /// Filesystem label, falling back to the filesystem UUID
    pub device_label: String,

    /// Filesystem type (e.g., "vfat", "ext4")
    pub filesystem_type: String,

    /// Size in bytes
    pub bytes_total: u64,

    pub read_only: bool,
    pub can_mount: bool,
    pub can_format: bool,

    /// Whole-disk device that carries child partitions
    pub is_parent: bool,

    status: PartitionStatus,
    active_state: ActiveState,

    /// Last mount/unmount job failed with a hard error
    pub mount_failed: bool,

    /// Properties were refreshed from the block device at least once
    pub valid: bool,
}

impl Partition {
    pub fn new(device_name: impl Into<String>) -> Self {
        let device_name = device_name.into();
        Self {
            device_path: format!("/dev/{device_name}"),
            device_name,
            ..Default::default()
        }
    }

    pub fn status(&self) -> PartitionStatus {
        self.status
    }

    pub fn active_state(&self) -> ActiveState {
        self.active_state
    }

    /// Status and activity label only ever change together.
    pub fn set_state(&mut self, status: PartitionStatus, active_state: ActiveState) {
        self.status = status;
        self.active_state = active_state;
    }

    pub fn is_mounted(&self) -> bool {
        self.status == PartitionStatus::Mounted
    }
}
