// SPDX-License-Identifier: GPL-3.0-only

//! UDisks2 bus names, object paths and interface names

pub const UDISKS2_PATH: &str = "/org/freedesktop/UDisks2";
pub const UDISKS2_BLOCK_DEVICES_PATH: &str = "/org/freedesktop/UDisks2/block_devices/";
pub const UDISKS2_JOBS_PATH: &str = "/org/freedesktop/UDisks2/jobs";

pub const DBUS_OBJECT_MANAGER_INTERFACE: &str = "org.freedesktop.DBus.ObjectManager";
pub const DBUS_PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

pub const UDISKS2_BLOCK_INTERFACE: &str = "org.freedesktop.UDisks2.Block";
pub const UDISKS2_FILESYSTEM_INTERFACE: &str = "org.freedesktop.UDisks2.Filesystem";
pub const UDISKS2_PARTITION_INTERFACE: &str = "org.freedesktop.UDisks2.Partition";
pub const UDISKS2_JOB_INTERFACE: &str = "org.freedesktop.UDisks2.Job";

pub const UDISKS2_JOB_KEY_OPERATION: &str = "Operation";
pub const UDISKS2_JOB_KEY_OBJECTS: &str = "Objects";

pub const UDISKS2_JOB_OP_FS_MOUNT: &str = "filesystem-mount";
pub const UDISKS2_JOB_OP_FS_UNMOUNT: &str = "filesystem-unmount";
pub const UDISKS2_JOB_OP_CLEANUP: &str = "cleanup";
pub const UDISKS2_JOB_OP_FS_FORMAT: &str = "filesystem-format";
/// Operation name UDisks2 reports for `Block.Format`
pub const UDISKS2_JOB_OP_FORMAT_MKFS: &str = "format-mkfs";

pub const UDISKS2_ERROR_ALREADY_MOUNTED: &str = "org.freedesktop.UDisks2.Error.AlreadyMounted";
pub const UDISKS2_ERROR_ALREADY_UNMOUNTING: &str =
    "org.freedesktop.UDisks2.Error.AlreadyUnmounting";

/// Object path of the block device with the given kernel name
pub fn block_device_path(device_name: &str) -> String {
    format!("{UDISKS2_BLOCK_DEVICES_PATH}{device_name}")
}

/// Kernel device name carried by a UDisks2 object path.
///
/// Everything from the fifth `/`-separated segment onward is the name, so
/// `/org/freedesktop/UDisks2/block_devices/sdb1` yields `sdb1`.
pub fn device_name_from_path(object_path: &str) -> &str {
    object_path
        .splitn(6, '/')
        .nth(5)
        .unwrap_or_default()
}
