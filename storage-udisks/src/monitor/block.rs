// SPDX-License-Identifier: GPL-3.0-only

//! Snapshot of a UDisks2 block device object

use tracing::debug;
use zbus::zvariant::{OwnedObjectPath, OwnedValue};

use crate::dbus::bytestring::decode_c_string_bytes;
use crate::dbus::defines::{
    UDISKS2_BLOCK_INTERFACE, UDISKS2_FILESYSTEM_INTERFACE, UDISKS2_PARTITION_INTERFACE,
    device_name_from_path,
};
use crate::property::{InterfaceMap, PropertyMap};

const MOUNT_POINTS: &str = "MountPoints";

fn as_string(value: &OwnedValue) -> Option<String> {
    String::try_from(value.clone()).ok()
}

fn as_u64(value: &OwnedValue) -> Option<u64> {
    if let Ok(parsed) = u64::try_from(value.clone()) {
        Some(parsed)
    } else {
        u32::try_from(value.clone()).ok().map(u64::from)
    }
}

fn as_bool(value: &OwnedValue) -> Option<bool> {
    bool::try_from(value.clone()).ok()
}

fn as_object_path(value: &OwnedValue) -> Option<String> {
    OwnedObjectPath::try_from(value.clone())
        .ok()
        .map(|path| path.to_string())
}

/// `ay` holding a NUL-terminated path
fn as_byte_string(value: &OwnedValue) -> Option<String> {
    Vec::<u8>::try_from(value.clone())
        .ok()
        .map(|bytes| decode_c_string_bytes(&bytes))
}

/// `aay`, as used by `MountPoints`
fn as_byte_string_list(value: &OwnedValue) -> Vec<String> {
    Vec::<Vec<u8>>::try_from(value.clone())
        .map(|items| items.iter().map(|bytes| decode_c_string_bytes(bytes)).collect())
        .unwrap_or_default()
}

/// What a mutation changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockChange {
    /// Block properties changed
    pub updated: bool,
    pub mount_path_changed: bool,
}

impl BlockChange {
    pub fn is_empty(&self) -> bool {
        !self.updated && !self.mount_path_changed
    }

    fn merge(self, other: BlockChange) -> BlockChange {
        BlockChange {
            updated: self.updated || other.updated,
            mount_path_changed: self.mount_path_changed || other.mount_path_changed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    path: String,
    properties: PropertyMap,
    mount_path: String,
    has_filesystem: bool,
    is_partition: bool,
}

impl Block {
    pub fn new(path: impl Into<String>, interfaces: &InterfaceMap) -> Self {
        let mut block = Self {
            path: path.into(),
            properties: PropertyMap::new(),
            mount_path: String::new(),
            has_filesystem: false,
            is_partition: false,
        };
        block.add_interfaces(interfaces);
        block
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Kernel device name taken from the object path
    pub fn device_name(&self) -> &str {
        device_name_from_path(&self.path)
    }

    pub fn has_data(&self) -> bool {
        !self.properties.is_empty()
    }

    pub fn has_filesystem(&self) -> bool {
        self.has_filesystem
    }

    pub fn is_partition(&self) -> bool {
        self.is_partition
    }

    pub fn mount_path(&self) -> &str {
        &self.mount_path
    }

    pub fn value(&self, key: &str) -> Option<&OwnedValue> {
        self.properties.get(key)
    }

    fn text(&self, key: &str) -> String {
        self.value(key).and_then(as_string).unwrap_or_default()
    }

    pub fn device(&self) -> String {
        self.value("Device")
            .and_then(as_byte_string)
            .unwrap_or_default()
    }

    pub fn preferred_device(&self) -> String {
        self.value("PreferredDevice")
            .and_then(as_byte_string)
            .unwrap_or_default()
    }

    pub fn drive(&self) -> String {
        self.value("Drive")
            .and_then(as_object_path)
            .unwrap_or_default()
    }

    pub fn device_number(&self) -> u64 {
        self.value("DeviceNumber").and_then(as_u64).unwrap_or_default()
    }

    pub fn size(&self) -> u64 {
        self.value("Size").and_then(as_u64).unwrap_or_default()
    }

    pub fn id(&self) -> String {
        self.text("Id")
    }

    pub fn id_label(&self) -> String {
        self.text("IdLabel")
    }

    pub fn id_uuid(&self) -> String {
        self.text("IdUUID")
    }

    pub fn id_type(&self) -> String {
        self.text("IdType")
    }

    pub fn id_version(&self) -> String {
        self.text("IdVersion")
    }

    pub fn is_read_only(&self) -> bool {
        self.flag("ReadOnly")
    }

    /// UDisks2 suggests mounting this device automatically
    pub fn hint_auto(&self) -> bool {
        self.flag("HintAuto")
    }

    fn flag(&self, key: &str) -> bool {
        self.value(key).and_then(as_bool).unwrap_or_default()
    }

    /// Merge interfaces announced by `InterfacesAdded` or fetched with `GetAll`.
    pub fn add_interfaces(&mut self, interfaces: &InterfaceMap) -> BlockChange {
        let mut change = BlockChange::default();

        if interfaces.contains_key(UDISKS2_PARTITION_INTERFACE) {
            self.is_partition = true;
        }

        if let Some(properties) = interfaces.get(UDISKS2_BLOCK_INTERFACE) {
            change = change.merge(self.update_properties(UDISKS2_BLOCK_INTERFACE, properties, &[]));
        }

        if let Some(properties) = interfaces.get(UDISKS2_FILESYSTEM_INTERFACE) {
            if !self.has_filesystem {
                self.has_filesystem = true;
                change.updated = true;
            }
            change = change.merge(self.update_properties(UDISKS2_FILESYSTEM_INTERFACE, properties, &[]));
        }

        change
    }

    /// Drop interfaces announced by `InterfacesRemoved`. Losing the
    /// filesystem interface also clears the mount path.
    pub fn remove_interfaces(&mut self, interfaces: &[String]) -> BlockChange {
        let mut change = BlockChange::default();

        if interfaces.iter().any(|i| i == UDISKS2_PARTITION_INTERFACE) {
            self.is_partition = false;
        }

        if interfaces.iter().any(|i| i == UDISKS2_FILESYSTEM_INTERFACE) && self.has_filesystem {
            self.has_filesystem = false;
            change.updated = true;
            change.mount_path_changed = self.set_mount_path(String::new());
        }

        change
    }

    /// Apply a `PropertiesChanged` payload for one interface.
    pub fn update_properties(
        &mut self,
        interface: &str,
        changed: &PropertyMap,
        invalidated: &[String],
    ) -> BlockChange {
        let mut change = BlockChange::default();

        match interface {
            UDISKS2_BLOCK_INTERFACE => {
                for (key, value) in changed {
                    if self.properties.get(key) != Some(value) {
                        debug!("{}: {} = {:?}", self.path, key, value);
                        self.properties.insert(key.clone(), value.clone());
                        change.updated = true;
                    }
                }
                for key in invalidated {
                    if self.properties.remove(key).is_some() {
                        change.updated = true;
                    }
                }
            }
            UDISKS2_FILESYSTEM_INTERFACE => {
                if let Some(mount_points) = changed.get(MOUNT_POINTS) {
                    let first = as_byte_string_list(mount_points)
                        .into_iter()
                        .find(|mp| !mp.is_empty())
                        .unwrap_or_default();
                    change.mount_path_changed = self.set_mount_path(first);
                } else if invalidated.iter().any(|key| key == MOUNT_POINTS) {
                    change.mount_path_changed = self.set_mount_path(String::new());
                }
            }
            _ => {}
        }

        change
    }

    fn set_mount_path(&mut self, mount_path: String) -> bool {
        if self.mount_path == mount_path {
            return false;
        }
        debug!("{}: mount path {:?} -> {:?}", self.path, self.mount_path, mount_path);
        self.mount_path = mount_path;
        true
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use zbus::zvariant::{ObjectPath, Value};

    use super::*;

    pub(crate) const SDB1: &str = "/org/freedesktop/UDisks2/block_devices/sdb1";

    pub(crate) fn owned<'a>(value: impl Into<Value<'a>>) -> OwnedValue {
        let value: Value<'a> = value.into();
        OwnedValue::try_from(value).unwrap()
    }

    fn byte_string(text: &str) -> Vec<u8> {
        format!("{text}\0").into_bytes()
    }

    pub(crate) fn block_properties(device: &str, id_type: &str, hint_auto: bool) -> PropertyMap {
        PropertyMap::from([
            ("Device".to_string(), owned(byte_string(device))),
            ("IdType".to_string(), owned(id_type)),
            ("IdLabel".to_string(), owned("")),
            ("IdUUID".to_string(), owned("1234-ABCD")),
            ("HintAuto".to_string(), OwnedValue::from(hint_auto)),
            ("ReadOnly".to_string(), OwnedValue::from(false)),
            ("Size".to_string(), OwnedValue::from(8_u64 << 30)),
        ])
    }

    pub(crate) fn mount_points(paths: &[&str]) -> PropertyMap {
        let points = paths.iter().map(|p| byte_string(p)).collect::<Vec<_>>();
        PropertyMap::from([(MOUNT_POINTS.to_string(), owned(points))])
    }

    #[test]
    fn empty_block_has_no_data_until_properties_arrive() {
        let mut block = Block::new(SDB1, &InterfaceMap::new());
        assert!(!block.has_data());
        assert_eq!(block.device_name(), "sdb1");

        let change = block.add_interfaces(&InterfaceMap::from([(
            UDISKS2_BLOCK_INTERFACE.to_string(),
            block_properties("/dev/sdb1", "vfat", true),
        )]));

        assert!(change.updated);
        assert!(block.has_data());
        assert_eq!(block.device(), "/dev/sdb1");
        assert_eq!(block.id_type(), "vfat");
        assert!(block.hint_auto());
        assert_eq!(block.size(), 8 << 30);
    }

    #[test]
    fn drive_and_preferred_device_are_read() {
        let mut props = block_properties("/dev/mmcblk1p1", "exfat", true);
        props.insert(
            "PreferredDevice".to_string(),
            owned(byte_string("/dev/disk/by-label/SDCARD")),
        );
        props.insert(
            "Drive".to_string(),
            owned(ObjectPath::try_from("/org/freedesktop/UDisks2/drives/SD_Card").unwrap()),
        );
        props.insert("DeviceNumber".to_string(), OwnedValue::from(45825_u64));

        let block = Block::new(
            "/org/freedesktop/UDisks2/block_devices/mmcblk1p1",
            &InterfaceMap::from([(UDISKS2_BLOCK_INTERFACE.to_string(), props)]),
        );

        assert_eq!(block.preferred_device(), "/dev/disk/by-label/SDCARD");
        assert_eq!(block.drive(), "/org/freedesktop/UDisks2/drives/SD_Card");
        assert_eq!(block.device_number(), 45825);
        assert!(!block.is_read_only());
    }

    #[test]
    fn partition_interface_presence_is_tracked() {
        let mut block = Block::new(
            SDB1,
            &InterfaceMap::from([(UDISKS2_PARTITION_INTERFACE.to_string(), PropertyMap::new())]),
        );
        assert!(block.is_partition());

        let change = block.remove_interfaces(&[UDISKS2_PARTITION_INTERFACE.to_string()]);

        assert!(!block.is_partition());
        assert!(change.is_empty());
    }

    #[test]
    fn unchanged_properties_report_no_change() {
        let props = block_properties("/dev/sdb1", "vfat", true);
        let mut block = Block::new(
            SDB1,
            &InterfaceMap::from([(UDISKS2_BLOCK_INTERFACE.to_string(), props.clone())]),
        );

        let change = block.update_properties(UDISKS2_BLOCK_INTERFACE, &props, &[]);
        assert!(change.is_empty());
    }

    #[test]
    fn mount_point_changes_are_tracked() {
        let mut block = Block::new(SDB1, &InterfaceMap::new());

        let change = block.update_properties(
            UDISKS2_FILESYSTEM_INTERFACE,
            &mount_points(&["/run/media/user/SD"]),
            &[],
        );
        assert!(change.mount_path_changed);
        assert_eq!(block.mount_path(), "/run/media/user/SD");

        let change = block.update_properties(UDISKS2_FILESYSTEM_INTERFACE, &mount_points(&[]), &[]);
        assert!(change.mount_path_changed);
        assert_eq!(block.mount_path(), "");
    }

    #[test]
    fn removing_filesystem_interface_clears_mount_path() {
        let mut block = Block::new(
            SDB1,
            &InterfaceMap::from([(
                UDISKS2_FILESYSTEM_INTERFACE.to_string(),
                mount_points(&["/run/media/user/SD"]),
            )]),
        );
        assert!(block.has_filesystem());

        let change = block.remove_interfaces(&[UDISKS2_FILESYSTEM_INTERFACE.to_string()]);

        assert!(change.updated);
        assert!(change.mount_path_changed);
        assert!(!block.has_filesystem());
    }
}
