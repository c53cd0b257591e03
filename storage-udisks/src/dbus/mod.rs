// SPDX-License-Identifier: GPL-3.0-only

//! UDisks2 over D-Bus: names, proxies, the signal stream and the backend
//! that issues mount/unmount/format calls.

pub mod backend;
pub mod bytestring;
pub mod defines;
pub mod events;
pub mod proxies;
