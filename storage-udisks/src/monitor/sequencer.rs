// SPDX-License-Identifier: GPL-3.0-only

//! Deferred operations waiting on a device state change

use std::collections::VecDeque;

use tracing::info;

/// Options passed to `Block.Format`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatArguments {
    pub label: String,
    pub no_block: bool,
    pub update_partition_type: bool,
}

impl FormatArguments {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            no_block: true,
            update_partition_type: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuedCommand {
    /// Format once the device is unmounted
    Format,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedOperation {
    pub command: QueuedCommand,
    pub device_name: String,
    pub fs_type: String,
    pub arguments: FormatArguments,
}

impl QueuedOperation {
    pub fn format(
        device_name: impl Into<String>,
        fs_type: impl Into<String>,
        arguments: FormatArguments,
    ) -> Self {
        Self {
            command: QueuedCommand::Format,
            device_name: device_name.into(),
            fs_type: fs_type.into(),
            arguments,
        }
    }
}

/// FIFO of deferred operations.
///
/// Entries are not deduplicated: queuing the same device twice yields two
/// sequential attempts.
#[derive(Debug, Default)]
pub struct OperationQueue {
    queue: VecDeque<QueuedOperation>,
}

impl OperationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, operation: QueuedOperation) {
        info!(
            "Queued {:?} of {} until it is unmounted",
            operation.command, operation.device_name
        );
        self.queue.push_back(operation);
    }

    pub fn head(&self) -> Option<&QueuedOperation> {
        self.queue.front()
    }

    /// Pop the head if it is a format of `device_name`.
    pub fn take_ready(&mut self, device_name: &str) -> Option<QueuedOperation> {
        let head = self.queue.front()?;
        if head.command != QueuedCommand::Format || head.device_name != device_name {
            return None;
        }
        self.queue.pop_front()
    }

    /// Drop every entry for `device_name`, returning them in queue order.
    pub fn cancel(&mut self, device_name: &str) -> Vec<QueuedOperation> {
        let (cancelled, kept): (VecDeque<_>, VecDeque<_>) = self
            .queue
            .drain(..)
            .partition(|op| op.device_name == device_name);
        self.queue = kept;
        cancelled.into()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
