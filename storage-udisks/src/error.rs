// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the monitor and its UDisks2 adapter
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Failed to connect to system bus: {0}")]
    ConnectionFailed(String),

    #[error("D-Bus error: {0}")]
    DBusError(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unsupported filesystem '{fs_type}', supported: {supported}")]
    UnsupportedFilesystem { fs_type: String, supported: String },

    #[error("I/O error for {path:?}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid external device pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },

    #[error("Monitor is no longer running")]
    ChannelClosed,
}

impl From<zbus::Error> for MonitorError {
    fn from(err: zbus::Error) -> Self {
        MonitorError::DBusError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;
