// SPDX-License-Identifier: GPL-3.0-only

//! Events consumed from the bus and notifications emitted to observers

use futures::stream::Stream;
use futures::task::{Context, Poll};
use serde::Serialize;
use storage_types::{OperationErrorKind, Partition, PartitionStatus};
use tokio::sync::mpsc;

use crate::property::{InterfaceMap, PropertyMap};

/// UDisks2 signal, in bus arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    InterfacesAdded {
        object_path: String,
        interfaces: InterfaceMap,
    },
    InterfacesRemoved {
        object_path: String,
        interfaces: Vec<String>,
    },
    PropertiesChanged {
        object_path: String,
        interface: String,
        changed: PropertyMap,
        invalidated: Vec<String>,
    },
    /// `org.freedesktop.UDisks2.Job.Completed`
    JobCompleted {
        object_path: String,
        success: bool,
        message: String,
    },
}

/// Notification for observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "payload")]
pub enum MonitorEvent {
    Status {
        device_name: String,
        status: PartitionStatus,
    },
    MountError(OperationErrorKind),
    UnmountError(OperationErrorKind),
    FormatError(OperationErrorKind),
    /// Raw transport error of a failed call
    ErrorMessage {
        object_path: String,
        error_name: String,
    },
    PartitionChanged(Partition),
    PartitionsRefreshed {
        added: Vec<String>,
        removed: Vec<String>,
    },
}

pub struct MonitorEventStream {
    receiver: mpsc::UnboundedReceiver<MonitorEvent>,
}

impl MonitorEventStream {
    pub fn new(receiver: mpsc::UnboundedReceiver<MonitorEvent>) -> Self {
        Self { receiver }
    }

    /// Sender half and the stream observers read from
    pub fn channel() -> (mpsc::UnboundedSender<MonitorEvent>, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (sender, Self::new(receiver))
    }

    /// Next event if one is already queued
    pub fn try_next(&mut self) -> Option<MonitorEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Stream for MonitorEventStream {
    type Item = MonitorEvent;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
