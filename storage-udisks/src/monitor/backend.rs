// SPDX-License-Identifier: GPL-3.0-only

//! Outbound calls to the storage service
//!
//! The monitor never awaits a call itself: each request is spawned onto the
//! runtime and its outcome comes back as a `CallCompletion` on the monitor's
//! completion channel, to be handled on the same sequential context as bus
//! events.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::warn;

use super::sequencer::FormatArguments;
use crate::dbus::defines::block_device_path;
use crate::property::InterfaceMap;

/// Failed call, as reported by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallError {
    /// D-Bus error name, when the service replied with one
    pub name: Option<String>,
    pub message: String,
}

impl CallError {
    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            name: None,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

pub trait StorageBackend: Send + Sync + 'static {
    /// `Filesystem.Mount` on the block device named `device_name`
    fn mount(&self, device_name: String) -> BoxFuture<'_, Result<(), CallError>>;

    /// `Filesystem.Unmount` on the block device named `device_name`
    fn unmount(&self, device_name: String) -> BoxFuture<'_, Result<(), CallError>>;

    /// `Block.Format` on the block device named `device_name`
    fn format(
        &self,
        device_name: String,
        fs_type: String,
        arguments: FormatArguments,
    ) -> BoxFuture<'_, Result<(), CallError>>;

    /// Current Block, Filesystem and Partition properties of `object_path`
    fn fetch_properties(&self, object_path: String)
    -> BoxFuture<'_, Result<InterfaceMap, CallError>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageRequest {
    Mount {
        device_name: String,
    },
    Unmount {
        device_name: String,
    },
    Format {
        device_name: String,
        fs_type: String,
        arguments: FormatArguments,
    },
    FetchProperties {
        object_path: String,
    },
}

impl StorageRequest {
    /// Object the call is made on
    pub fn object_path(&self) -> String {
        match self {
            Self::Mount { device_name }
            | Self::Unmount { device_name }
            | Self::Format { device_name, .. } => block_device_path(device_name),
            Self::FetchProperties { object_path } => object_path.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallReply {
    Done,
    Properties(InterfaceMap),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallCompletion {
    pub request: StorageRequest,
    pub result: Result<CallReply, CallError>,
}

/// Run `request` on `backend` in the background and deliver its completion.
pub(crate) fn spawn_request(
    backend: Arc<dyn StorageBackend>,
    request: StorageRequest,
    completions: mpsc::UnboundedSender<CallCompletion>,
) {
    tokio::spawn(async move {
        let result = match request.clone() {
            StorageRequest::Mount { device_name } => {
                backend.mount(device_name).await.map(|_| CallReply::Done)
            }
            StorageRequest::Unmount { device_name } => {
                backend.unmount(device_name).await.map(|_| CallReply::Done)
            }
            StorageRequest::Format {
                device_name,
                fs_type,
                arguments,
            } => backend
                .format(device_name, fs_type, arguments)
                .await
                .map(|_| CallReply::Done),
            StorageRequest::FetchProperties { object_path } => backend
                .fetch_properties(object_path)
                .await
                .map(CallReply::Properties),
        };

        if let Err(e) = completions.send(CallCompletion { request, result }) {
            warn!("Completion receiver dropped: {e}");
        }
    });
}
