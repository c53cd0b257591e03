// SPDX-License-Identifier: GPL-3.0-only

//! Snapshot of a UDisks2 job object

use zbus::zvariant::{OwnedObjectPath, OwnedValue};

use crate::dbus::defines::{
    UDISKS2_JOB_KEY_OBJECTS, UDISKS2_JOB_KEY_OPERATION, UDISKS2_JOB_OP_CLEANUP,
    UDISKS2_JOB_OP_FORMAT_MKFS, UDISKS2_JOB_OP_FS_FORMAT, UDISKS2_JOB_OP_FS_MOUNT,
    UDISKS2_JOB_OP_FS_UNMOUNT, device_name_from_path,
};
use crate::property::PropertyMap;

/// Completion message of an unmount that failed because the device is in use
const BUSY_MESSAGE: &str = "target is busy";

fn as_string(value: &OwnedValue) -> Option<String> {
    String::try_from(value.clone()).ok()
}

fn as_object_paths(value: &OwnedValue) -> Option<Vec<String>> {
    Vec::<OwnedObjectPath>::try_from(value.clone())
        .ok()
        .map(|paths| paths.iter().map(|path| path.to_string()).collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOperation {
    Mount,
    Unmount,
    Format,
    Other,
}

impl JobOperation {
    pub fn from_identifier(operation: &str) -> Self {
        match operation {
            UDISKS2_JOB_OP_FS_MOUNT => Self::Mount,
            UDISKS2_JOB_OP_FS_UNMOUNT | UDISKS2_JOB_OP_CLEANUP => Self::Unmount,
            UDISKS2_JOB_OP_FS_FORMAT | UDISKS2_JOB_OP_FORMAT_MKFS => Self::Format,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Added,
    Completed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    path: String,
    operation: JobOperation,
    objects: Vec<String>,
    status: JobStatus,
    success: bool,
    device_busy: bool,
    message: String,
}

impl Job {
    pub fn new(path: impl Into<String>, operation: JobOperation, objects: Vec<String>) -> Self {
        Self {
            path: path.into(),
            operation,
            objects,
            status: JobStatus::Added,
            success: true,
            device_busy: false,
            message: String::new(),
        }
    }

    /// Job built from the `org.freedesktop.UDisks2.Job` properties
    pub fn from_properties(path: impl Into<String>, properties: &PropertyMap) -> Self {
        let operation = properties
            .get(UDISKS2_JOB_KEY_OPERATION)
            .and_then(as_string)
            .map(|op| JobOperation::from_identifier(&op))
            .unwrap_or(JobOperation::Other);
        let objects = properties
            .get(UDISKS2_JOB_KEY_OBJECTS)
            .and_then(as_object_paths)
            .unwrap_or_default();

        Self::new(path, operation, objects)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn operation(&self) -> JobOperation {
        self.operation
    }

    pub fn objects(&self) -> &[String] {
        &self.objects
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn device_busy(&self) -> bool {
        self.device_busy
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_completed(&self) -> bool {
        self.status == JobStatus::Completed
    }

    /// Record the `Completed` signal.
    ///
    /// An unmount refused because the target is busy completes as a success
    /// with `device_busy` set: the device simply stays mounted.
    pub fn complete(&mut self, success: bool, message: impl Into<String>) {
        self.message = message.into();
        self.device_busy = self.operation == JobOperation::Unmount
            && !success
            && self.message.contains(BUSY_MESSAGE);
        self.success = success || self.device_busy;
        self.status = JobStatus::Completed;
    }

    /// Device names of the job's target objects
    pub fn target_device_names(&self) -> Vec<&str> {
        self.objects
            .iter()
            .map(|object| device_name_from_path(object))
            .filter(|name| !name.is_empty())
            .collect()
    }
}
