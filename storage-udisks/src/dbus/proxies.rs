// SPDX-License-Identifier: GPL-3.0-only

//! UDisks2 interfaces the monitor calls

use std::collections::HashMap;

use zbus::zvariant::{OwnedValue, Value};
use zbus_macros::proxy;

#[proxy(
    default_service = "org.freedesktop.UDisks2",
    interface = "org.freedesktop.UDisks2.Filesystem"
)]
pub trait UDisks2Filesystem {
    fn mount(&self, options: HashMap<&str, Value<'_>>) -> zbus::Result<String>;

    fn unmount(&self, options: HashMap<&str, Value<'_>>) -> zbus::Result<()>;
}

#[proxy(
    default_service = "org.freedesktop.UDisks2",
    interface = "org.freedesktop.UDisks2.Block"
)]
pub trait UDisks2Block {
    fn format(&self, type_: &str, options: HashMap<&str, Value<'_>>) -> zbus::Result<()>;
}

#[proxy(
    default_service = "org.freedesktop.UDisks2",
    interface = "org.freedesktop.DBus.Properties"
)]
pub trait UDisks2Properties {
    fn get_all(&self, interface_name: &str) -> zbus::Result<HashMap<String, OwnedValue>>;
}
