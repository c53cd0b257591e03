// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};

/// Typed failure of a mount, unmount or format request.
///
/// The set is closed: transport errors that do not map onto one of these are
/// reported only as raw error names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationErrorKind {
    Failed,
    Cancelled,
    AlreadyCancelled,
    NotAuthorized,
    NotAuthorizedCanObtain,
    NotAuthorizedDismissed,
    AlreadyMounted,
    NotMounted,
    OptionNotPermitted,
    MountedByOtherUser,
    AlreadyUnmounting,
    NotSupported,
    Timedout,
    WouldWakeup,
    DeviceBusy,
}

impl OperationErrorKind {
    /// Short human readable description, suitable for notifications.
    pub fn describe(self) -> &'static str {
        match self {
            Self::Failed => "operation failed",
            Self::Cancelled => "operation was cancelled",
            Self::AlreadyCancelled => "operation was already cancelled",
            Self::NotAuthorized => "not authorized",
            Self::NotAuthorizedCanObtain => "not authorized, authorization can be obtained",
            Self::NotAuthorizedDismissed => "authorization request was dismissed",
            Self::AlreadyMounted => "device is already mounted",
            Self::NotMounted => "device is not mounted",
            Self::OptionNotPermitted => "option not permitted",
            Self::MountedByOtherUser => "device is mounted by another user",
            Self::AlreadyUnmounting => "device is already unmounting",
            Self::NotSupported => "operation not supported",
            Self::Timedout => "operation timed out",
            Self::WouldWakeup => "operation would wake up the device",
            Self::DeviceBusy => "device is busy",
        }
    }
}
