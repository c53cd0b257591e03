// SPDX-License-Identifier: GPL-3.0-only

pub mod config;
pub mod dbus;
pub mod error;
pub mod manager;
pub mod monitor;
pub mod property;

// Re-export storage-types models (canonical domain models)
pub use storage_types;
pub use storage_types::{ActiveState, OperationErrorKind, Partition, PartitionStatus};

pub use config::MonitorConfig;
pub use error::{MonitorError, Result};
pub use manager::{
    BlockDeviceEntry, PartitionManager, PartitionSource, ProcPartitionSource, RefreshOutcome,
};
pub use property::{InterfaceMap, PropertyMap};

// UDisks2 transport
pub use dbus::backend::UDisksBackend;
pub use dbus::events::{BusEventStream, bus_event_stream};

// Monitor core
pub use monitor::Monitor;
pub use monitor::backend::{CallCompletion, CallError, CallReply, StorageBackend, StorageRequest};
pub use monitor::event::{BusEvent, MonitorEvent, MonitorEventStream};
pub use monitor::sequencer::FormatArguments;
pub use monitor::service::{MonitorCommand, MonitorHandle, spawn as spawn_monitor};
