// SPDX-License-Identifier: GPL-3.0-only

//! UDisks2 property bags as they come off the bus (`a{sv}` and `a{sa{sv}}`).
//! Typed reads live next to the records that use them.

use std::collections::HashMap;

use zbus::zvariant::OwnedValue;

/// Property name to value, for a single interface
pub type PropertyMap = HashMap<String, OwnedValue>;

/// Interface name to its properties, as carried by `InterfacesAdded`
pub type InterfaceMap = HashMap<String, PropertyMap>;
