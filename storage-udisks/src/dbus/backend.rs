// SPDX-License-Identifier: GPL-3.0-only

//! `StorageBackend` over the UDisks2 system service

use std::collections::HashMap;

use futures::future::BoxFuture;
use tracing::debug;
use zbus::Connection;
use zbus::zvariant::Value;

use super::defines::{
    UDISKS2_BLOCK_INTERFACE, UDISKS2_FILESYSTEM_INTERFACE, UDISKS2_PARTITION_INTERFACE,
    block_device_path,
};
use super::proxies::{UDisks2BlockProxy, UDisks2FilesystemProxy, UDisks2PropertiesProxy};
use crate::error::{MonitorError, Result};
use crate::monitor::backend::{CallError, StorageBackend};
use crate::monitor::sequencer::FormatArguments;
use crate::property::InterfaceMap;

#[derive(Clone)]
pub struct UDisksBackend {
    connection: Connection,
}

impl UDisksBackend {
    /// Backend on the system bus
    pub async fn system() -> Result<Self> {
        let connection = Connection::system()
            .await
            .map_err(|e| MonitorError::ConnectionFailed(e.to_string()))?;
        Ok(Self { connection })
    }

    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    async fn filesystem(&self, device_name: &str) -> zbus::Result<UDisks2FilesystemProxy<'_>> {
        UDisks2FilesystemProxy::builder(&self.connection)
            .path(block_device_path(device_name))?
            .build()
            .await
    }

    async fn do_mount(&self, device_name: String) -> zbus::Result<()> {
        let proxy = self.filesystem(&device_name).await?;
        let options = HashMap::from([("fstype", Value::from(""))]);
        let mount_path = proxy.mount(options).await?;
        debug!("{device_name} mounted at {mount_path}");
        Ok(())
    }

    async fn do_unmount(&self, device_name: String) -> zbus::Result<()> {
        let proxy = self.filesystem(&device_name).await?;
        proxy.unmount(HashMap::new()).await
    }

    async fn do_format(
        &self,
        device_name: String,
        fs_type: String,
        arguments: FormatArguments,
    ) -> zbus::Result<()> {
        let proxy = UDisks2BlockProxy::builder(&self.connection)
            .path(block_device_path(&device_name))?
            .build()
            .await?;

        let options = HashMap::from([
            ("label", Value::from(arguments.label.as_str())),
            ("no-block", Value::from(arguments.no_block)),
            (
                "update-partition-type",
                Value::from(arguments.update_partition_type),
            ),
        ]);
        proxy.format(&fs_type, options).await
    }

    async fn do_fetch_properties(&self, object_path: String) -> zbus::Result<InterfaceMap> {
        let proxy = UDisks2PropertiesProxy::builder(&self.connection)
            .path(object_path.as_str())?
            .build()
            .await?;

        let mut interfaces = InterfaceMap::new();
        for interface in [
            UDISKS2_BLOCK_INTERFACE,
            UDISKS2_FILESYSTEM_INTERFACE,
            UDISKS2_PARTITION_INTERFACE,
        ] {
            match proxy.get_all(interface).await {
                Ok(properties) => {
                    interfaces.insert(interface.to_string(), properties);
                }
                // Objects lacking an interface answer with an error for it.
                Err(zbus::Error::MethodError(name, _, _)) => {
                    debug!("{object_path} has no {interface}: {name}");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(interfaces)
    }
}

impl StorageBackend for UDisksBackend {
    fn mount(&self, device_name: String) -> BoxFuture<'_, std::result::Result<(), CallError>> {
        Box::pin(async move { self.do_mount(device_name).await.map_err(call_error) })
    }

    fn unmount(&self, device_name: String) -> BoxFuture<'_, std::result::Result<(), CallError>> {
        Box::pin(async move { self.do_unmount(device_name).await.map_err(call_error) })
    }

    fn format(
        &self,
        device_name: String,
        fs_type: String,
        arguments: FormatArguments,
    ) -> BoxFuture<'_, std::result::Result<(), CallError>> {
        Box::pin(async move {
            self.do_format(device_name, fs_type, arguments)
                .await
                .map_err(call_error)
        })
    }

    fn fetch_properties(
        &self,
        object_path: String,
    ) -> BoxFuture<'_, std::result::Result<InterfaceMap, CallError>> {
        Box::pin(async move {
            self.do_fetch_properties(object_path)
                .await
                .map_err(call_error)
        })
    }
}

/// Keep the D-Bus error name of a method error; anything else is a
/// transport failure without one.
pub fn call_error(err: zbus::Error) -> CallError {
    match err {
        zbus::Error::MethodError(name, message, _info) => CallError {
            name: Some(name.as_str().to_string()),
            message: message.unwrap_or_default(),
        },
        other => CallError::transport(other.to_string()),
    }
}
