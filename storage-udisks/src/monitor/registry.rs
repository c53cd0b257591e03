// SPDX-License-Identifier: GPL-3.0-only

//! Tracked block devices and their reconciliation into partitions

use std::collections::HashMap;

use storage_types::Partition;
use tracing::info;

use super::block::Block;
use crate::manager::PartitionManager;
use crate::property::InterfaceMap;

#[derive(Debug, Default)]
pub struct BlockRegistry {
    blocks: HashMap<String, Block>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `path`. Returns `None` when it is already tracked.
    pub fn add_block_device(&mut self, path: &str, interfaces: &InterfaceMap) -> Option<&Block> {
        if self.blocks.contains_key(path) {
            return None;
        }

        info!("Tracking block device {}", path);
        let block = Block::new(path, interfaces);
        let block = self.blocks.entry(path.to_string()).or_insert(block);
        Some(&*block)
    }

    pub fn remove_block_device(&mut self, path: &str) -> Option<Block> {
        let block = self.blocks.remove(path);
        if block.is_some() {
            info!("Stopped tracking block device {}", path);
        }
        block
    }

    pub fn contains(&self, path: &str) -> bool {
        self.blocks.contains_key(path)
    }

    pub fn get(&self, path: &str) -> Option<&Block> {
        self.blocks.get(path)
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut Block> {
        self.blocks.get_mut(path)
    }

    /// Tracked block whose object path names `device_name`
    pub fn find_by_device_name(&self, device_name: &str) -> Option<&Block> {
        self.blocks.values().find(|b| b.device_name() == device_name)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Copy block properties onto every partition backed by the block's device.
///
/// Returns the partitions whose record changed; replaying the same block data
/// returns nothing.
pub fn reconcile_partitions(block: &Block, manager: &mut PartitionManager) -> Vec<Partition> {
    let device = block.device();
    if device.is_empty() {
        return Vec::new();
    }

    let mut label = block.id_label();
    if label.is_empty() {
        label = block.id_uuid();
    }

    let filesystem_type = block.id_type();
    let read_only = block.is_read_only();
    let can_mount = block.hint_auto()
        && !filesystem_type.is_empty()
        && manager.supports_filesystem(&filesystem_type);

    let mut changed = Vec::new();
    for index in manager.indices_for_device_path(&device) {
        let Some(partition) = manager.partition_mut(index) else {
            continue;
        };

        let before = partition.clone();
        partition.mount_path = block.mount_path().to_string();
        partition.device_label = label.clone();
        partition.filesystem_type = filesystem_type.clone();
        partition.read_only = read_only;
        partition.can_mount = can_mount;
        partition.can_format = !read_only;
        partition.valid = true;

        if *partition != before {
            info!(
                "Update block: {} partition: {} pref: {} drive: {} dNumber: {} id: {} size: {} idtype: {} idversion: {} label: {:?}",
                device,
                block.is_partition(),
                block.preferred_device(),
                block.drive(),
                block.device_number(),
                block.id(),
                block.size(),
                filesystem_type,
                block.id_version(),
                label,
            );
            changed.push(partition.clone());
        }
    }

    changed
}
