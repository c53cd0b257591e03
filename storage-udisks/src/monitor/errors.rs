// SPDX-License-Identifier: GPL-3.0-only

//! UDisks2 error names to typed operation errors

use storage_types::OperationErrorKind;

use crate::dbus::defines::{UDISKS2_ERROR_ALREADY_MOUNTED, UDISKS2_ERROR_ALREADY_UNMOUNTING};

/// Copied from udiskserror.c so the names can be matched without linking it.
/// Order matters: lookup returns the first match.
pub const ERROR_TABLE: &[(&str, OperationErrorKind)] = &[
    ("org.freedesktop.UDisks2.Error.Failed", OperationErrorKind::Failed),
    ("org.freedesktop.UDisks2.Error.Cancelled", OperationErrorKind::Cancelled),
    (
        "org.freedesktop.UDisks2.Error.AlreadyCancelled",
        OperationErrorKind::AlreadyCancelled,
    ),
    (
        "org.freedesktop.UDisks2.Error.NotAuthorized",
        OperationErrorKind::NotAuthorized,
    ),
    (
        "org.freedesktop.UDisks2.Error.NotAuthorizedCanObtain",
        OperationErrorKind::NotAuthorizedCanObtain,
    ),
    (
        "org.freedesktop.UDisks2.Error.NotAuthorizedDismissed",
        OperationErrorKind::NotAuthorizedDismissed,
    ),
    (UDISKS2_ERROR_ALREADY_MOUNTED, OperationErrorKind::AlreadyMounted),
    ("org.freedesktop.UDisks2.Error.NotMounted", OperationErrorKind::NotMounted),
    (
        "org.freedesktop.UDisks2.Error.OptionNotPermitted",
        OperationErrorKind::OptionNotPermitted,
    ),
    (
        "org.freedesktop.UDisks2.Error.MountedByOtherUser",
        OperationErrorKind::MountedByOtherUser,
    ),
    (UDISKS2_ERROR_ALREADY_UNMOUNTING, OperationErrorKind::AlreadyUnmounting),
    ("org.freedesktop.UDisks2.Error.NotSupported", OperationErrorKind::NotSupported),
    ("org.freedesktop.UDisks2.Error.Timedout", OperationErrorKind::Timedout),
    ("org.freedesktop.UDisks2.Error.WouldWakeup", OperationErrorKind::WouldWakeup),
    ("org.freedesktop.UDisks2.Error.DeviceBusy", OperationErrorKind::DeviceBusy),
];

pub fn lookup(error_name: &str) -> Option<OperationErrorKind> {
    ERROR_TABLE
        .iter()
        .find(|(name, _)| *name == error_name)
        .map(|(_, kind)| *kind)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn every_listed_name_maps_to_one_distinct_kind() {
        assert_eq!(ERROR_TABLE.len(), 15);

        let kinds: HashSet<OperationErrorKind> = ERROR_TABLE
            .iter()
            .map(|(name, _)| lookup(name).expect("listed name must map"))
            .collect();
        assert_eq!(kinds.len(), 15);

        for (name, kind) in ERROR_TABLE {
            assert_eq!(lookup(name), Some(*kind));
        }
    }

    #[test]
    fn unlisted_names_have_no_kind() {
        assert_eq!(lookup("org.freedesktop.DBus.Error.NoReply"), None);
        assert_eq!(lookup("org.freedesktop.UDisks2.Error.failed"), None);
        assert_eq!(lookup(""), None);
    }

    #[test]
    fn idempotent_errors_map_to_their_kinds() {
        assert_eq!(
            lookup(UDISKS2_ERROR_ALREADY_MOUNTED),
            Some(OperationErrorKind::AlreadyMounted)
        );
        assert_eq!(
            lookup(UDISKS2_ERROR_ALREADY_UNMOUNTING),
            Some(OperationErrorKind::AlreadyUnmounting)
        );
    }
}
