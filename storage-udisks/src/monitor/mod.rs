// SPDX-License-Identifier: GPL-3.0-only

//! Removable partition monitor
//!
//! `Monitor` keeps the partition records of a `PartitionManager` in sync with
//! UDisks2 block devices and jobs, and drives mount, unmount and format
//! requests. All state lives on one sequential context: bus events and call
//! completions are fed in through `handle_bus_event` and `handle_completion`
//! in arrival order.

pub mod backend;
pub mod block;
pub mod errors;
pub mod event;
pub mod job;
pub mod registry;
pub mod sequencer;
pub mod service;
pub mod tracker;

use std::collections::BTreeSet;
use std::sync::Arc;

use storage_types::{OperationErrorKind, Partition, PartitionStatus};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::dbus::defines::{
    UDISKS2_BLOCK_INTERFACE, UDISKS2_ERROR_ALREADY_MOUNTED, UDISKS2_ERROR_ALREADY_UNMOUNTING,
    UDISKS2_FILESYSTEM_INTERFACE, UDISKS2_JOB_INTERFACE, UDISKS2_JOBS_PATH,
    UDISKS2_PARTITION_INTERFACE, block_device_path,
};
use crate::error::{MonitorError, Result};
use crate::manager::{PartitionManager, RefreshOutcome};
use crate::property::{InterfaceMap, PropertyMap};
use backend::{CallCompletion, CallError, CallReply, StorageBackend, StorageRequest, spawn_request};
use block::BlockChange;
use event::{BusEvent, MonitorEvent};
use job::{Job, JobOperation};
use registry::{BlockRegistry, reconcile_partitions};
use sequencer::{FormatArguments, OperationQueue, QueuedOperation};
use tracker::{JobTracker, apply_job_status};

pub struct Monitor {
    manager: PartitionManager,
    blocks: BlockRegistry,
    jobs: JobTracker,
    queue: OperationQueue,
    backend: Arc<dyn StorageBackend>,
    completions: mpsc::UnboundedSender<CallCompletion>,
    events: mpsc::UnboundedSender<MonitorEvent>,
}

impl Monitor {
    /// Build a monitor around `manager`.
    ///
    /// Outcomes of calls issued on `backend` are delivered to `completions`
    /// and must be fed back through [`Monitor::handle_completion`].
    pub fn new(
        manager: PartitionManager,
        backend: Arc<dyn StorageBackend>,
        completions: mpsc::UnboundedSender<CallCompletion>,
        events: mpsc::UnboundedSender<MonitorEvent>,
    ) -> Self {
        Self {
            manager,
            blocks: BlockRegistry::new(),
            jobs: JobTracker::new(),
            queue: OperationQueue::new(),
            backend,
            completions,
            events,
        }
    }

    pub fn partitions(&self) -> &[Partition] {
        self.manager.partitions()
    }

    pub fn manager(&self) -> &PartitionManager {
        &self.manager
    }

    pub fn blocks(&self) -> &BlockRegistry {
        &self.blocks
    }

    pub fn jobs(&self) -> &JobTracker {
        &self.jobs
    }

    pub fn queue(&self) -> &OperationQueue {
        &self.queue
    }

    pub fn mount(&mut self, device_name: &str) -> Result<()> {
        require_device_name(device_name, "mount")?;

        self.issue(StorageRequest::Mount {
            device_name: device_name.to_string(),
        });
        self.set_status(device_name, PartitionStatus::Mounting);
        Ok(())
    }

    pub fn unmount(&mut self, device_name: &str) -> Result<()> {
        require_device_name(device_name, "unmount")?;

        self.issue(StorageRequest::Unmount {
            device_name: device_name.to_string(),
        });
        self.set_status(device_name, PartitionStatus::Unmounting);
        Ok(())
    }

    /// Format `device_name` with `fs_type`.
    ///
    /// A mounted device is unmounted first; the format is queued and issued
    /// once its mount path becomes empty.
    pub fn format(&mut self, device_name: &str, fs_type: &str, label: &str) -> Result<()> {
        require_device_name(device_name, "format")?;

        if !self.manager.supports_filesystem(fs_type) {
            let supported = self.manager.supported_filesystems().join(", ");
            error!("Cannot format {device_name} with unsupported filesystem {fs_type:?}, supported: {supported}");
            return Err(MonitorError::UnsupportedFilesystem {
                fs_type: fs_type.to_string(),
                supported,
            });
        }

        let operation = QueuedOperation::format(device_name, fs_type, FormatArguments::new(label));

        let mounted = self
            .manager
            .partitions()
            .iter()
            .any(|p| p.device_name == device_name && p.status() == PartitionStatus::Mounted);

        if mounted {
            self.queue.enqueue(operation);
            self.unmount(device_name)
        } else {
            self.do_format(operation);
            Ok(())
        }
    }

    /// Start tracking every external partition that is not a whole disk and
    /// fetch its properties.
    pub fn get_block_devices(&mut self) {
        let paths: Vec<String> = self
            .manager
            .external_partitions(true)
            .into_iter()
            .map(|p| block_device_path(&p.device_name))
            .collect();

        for path in paths {
            self.add_block_device(&path, &InterfaceMap::new());
        }
    }

    /// Re-enumerate the partition set and announce additions and removals.
    pub fn refresh_partitions(&mut self) -> RefreshOutcome {
        let outcome = self.manager.refresh();
        if !outcome.is_empty() {
            self.emit(MonitorEvent::PartitionsRefreshed {
                added: outcome.added.clone(),
                removed: outcome.removed.clone(),
            });
        }
        outcome
    }

    pub fn handle_bus_event(&mut self, event: BusEvent) {
        match event {
            BusEvent::InterfacesAdded {
                object_path,
                interfaces,
            } => self.interfaces_added(&object_path, &interfaces),
            BusEvent::InterfacesRemoved {
                object_path,
                interfaces,
            } => self.interfaces_removed(&object_path, &interfaces),
            BusEvent::PropertiesChanged {
                object_path,
                interface,
                changed,
                invalidated,
            } => {
                let Some(block) = self.blocks.get_mut(&object_path) else {
                    return;
                };
                let change = block.update_properties(&interface, &changed, &invalidated);
                self.block_changed(&object_path, change);
            }
            BusEvent::JobCompleted {
                object_path,
                success,
                message,
            } => {
                let Some(job) = self.jobs.job_completed(&object_path, success, &message) else {
                    return;
                };
                let job = job.clone();
                self.apply_job(&job);
            }
        }
    }

    pub fn handle_completion(&mut self, completion: CallCompletion) {
        let CallCompletion { request, result } = completion;

        match (request, result) {
            (StorageRequest::Mount { device_name }, Ok(_)) => {
                self.set_status(&device_name, PartitionStatus::Mounted);
            }
            (StorageRequest::Unmount { device_name }, Ok(_)) => {
                self.set_status(&device_name, PartitionStatus::Unmounted);
            }
            (request @ StorageRequest::Mount { .. }, Err(e))
            | (request @ StorageRequest::Unmount { .. }, Err(e)) => {
                self.mount_operation_failed(request, e);
            }
            (StorageRequest::Format { device_name, .. }, Ok(_)) => {
                self.set_status(&device_name, PartitionStatus::Formatted);
            }
            (request @ StorageRequest::Format { .. }, Err(e)) => {
                warn!("Format error: {e}");
                self.report_call_error(&request, &e);
                if let Some(kind) = self.typed_error(&e) {
                    self.emit(MonitorEvent::FormatError(kind));
                }
            }
            (StorageRequest::FetchProperties { object_path }, Ok(CallReply::Properties(interfaces))) => {
                let Some(block) = self.blocks.get_mut(&object_path) else {
                    return;
                };
                let change = block.add_interfaces(&interfaces);
                self.block_changed(&object_path, change);
            }
            (StorageRequest::FetchProperties { object_path }, Ok(CallReply::Done)) => {
                warn!("No properties returned for {object_path}");
            }
            (request @ StorageRequest::FetchProperties { .. }, Err(e)) => {
                warn!("Failed to fetch properties of {}: {e}", request.object_path());
                self.report_call_error(&request, &e);
            }
        }
    }

    fn interfaces_added(&mut self, object_path: &str, interfaces: &InterfaceMap) {
        info!(
            "Interfaces added: {} {:?}",
            object_path,
            interfaces.keys().collect::<Vec<_>>()
        );

        let announces_volume = interfaces.contains_key(UDISKS2_PARTITION_INTERFACE)
            || interfaces.contains_key(UDISKS2_FILESYSTEM_INTERFACE);

        if announces_volume && self.manager.is_external_block_path(object_path) {
            self.refresh_partitions();

            if let Some(block) = self.blocks.get_mut(object_path) {
                let change = block.add_interfaces(interfaces);
                self.block_changed(object_path, change);
            } else {
                self.add_block_device(object_path, interfaces);
            }
        } else if object_path.starts_with(UDISKS2_JOBS_PATH) {
            let properties = interfaces
                .get(UDISKS2_JOB_INTERFACE)
                .cloned()
                .unwrap_or_else(PropertyMap::new);

            if let Some(job) = self.jobs.job_added(object_path, &properties) {
                let job = job.clone();
                self.apply_job(&job);
            }
        }
    }

    fn interfaces_removed(&mut self, object_path: &str, interfaces: &[String]) {
        if let Some(job) = self.jobs.job_removed(object_path) {
            if !job.is_completed() {
                self.settle_abandoned_job(&job);
            }
            return;
        }

        if !self.blocks.contains(object_path) {
            return;
        }

        if interfaces.iter().any(|i| i == UDISKS2_BLOCK_INTERFACE) {
            self.blocks.remove_block_device(object_path);
        } else if let Some(block) = self.blocks.get_mut(object_path) {
            let change = block.remove_interfaces(interfaces);
            self.block_changed(object_path, change);
        }

        if self.manager.is_external_block_path(object_path) {
            self.refresh_partitions();
        }
    }

    fn add_block_device(&mut self, object_path: &str, interfaces: &InterfaceMap) {
        let Some(block) = self.blocks.add_block_device(object_path, interfaces) else {
            return;
        };

        if block.has_data() {
            let changed = reconcile_partitions(block, &mut self.manager);
            self.notify_changed(changed);
        } else {
            self.issue(StorageRequest::FetchProperties {
                object_path: object_path.to_string(),
            });
        }
    }

    fn block_changed(&mut self, object_path: &str, change: BlockChange) {
        if change.mount_path_changed {
            self.mount_path_changed(object_path);
        } else if change.updated {
            let Some(block) = self.blocks.get(object_path) else {
                return;
            };
            let changed = reconcile_partitions(block, &mut self.manager);
            self.notify_changed(changed);
        }
    }

    /// A mount path appearing or vanishing is a completed mount or unmount,
    /// whoever issued it.
    fn mount_path_changed(&mut self, object_path: &str) {
        let Some(block) = self.blocks.get(object_path) else {
            return;
        };

        let unmounted = block.mount_path().is_empty();
        let operation = if unmounted {
            JobOperation::Unmount
        } else {
            JobOperation::Mount
        };
        info!("New partition status for {}: {:?}", object_path, operation);

        let mut job = Job::new(String::new(), operation, vec![object_path.to_string()]);
        job.complete(true, "");

        let mut names: BTreeSet<String> = apply_job_status(&job, &mut self.manager)
            .into_iter()
            .map(|p| p.device_name)
            .collect();
        names.extend(
            reconcile_partitions(block, &mut self.manager)
                .into_iter()
                .map(|p| p.device_name),
        );

        let changed: Vec<Partition> = names
            .iter()
            .filter_map(|name| self.manager.partition(name).cloned())
            .collect();
        self.notify_changed(changed);

        if unmounted {
            let device_name = block.device_name().to_string();
            if let Some(operation) = self.queue.take_ready(&device_name) {
                self.do_format(operation);
            }
        }
    }

    /// Settle partitions left in progress by a job that vanished without
    /// completing, from the mount path of the tracked block.
    fn settle_abandoned_job(&mut self, job: &Job) {
        for device_name in job.target_device_names() {
            let in_progress = self.manager.partition(device_name).is_some_and(|p| {
                matches!(
                    p.status(),
                    PartitionStatus::Mounting
                        | PartitionStatus::Unmounting
                        | PartitionStatus::Formatting
                )
            });
            if !in_progress {
                continue;
            }

            let Some(block) = self.blocks.find_by_device_name(device_name) else {
                warn!(
                    "Job {} removed before completion, {} has no tracked block",
                    job.path(),
                    device_name
                );
                continue;
            };

            let status = if block.mount_path().is_empty() {
                PartitionStatus::Unmounted
            } else {
                PartitionStatus::Mounted
            };
            warn!(
                "Job {} removed before completion, settling {} as {:?}",
                job.path(),
                device_name,
                status
            );
            let changed = self.manager.apply_status(device_name, status);
            self.notify_changed(changed);
        }
    }

    fn mount_operation_failed(&mut self, request: StorageRequest, e: CallError) {
        let (device_name, mounting) = match &request {
            StorageRequest::Mount { device_name } => (device_name.clone(), true),
            StorageRequest::Unmount { device_name } => (device_name.clone(), false),
            _ => return,
        };
        warn!(
            "{} error: {e}",
            if mounting { "Mount" } else { "Unmount" }
        );

        self.report_call_error(&request, &e);
        let kind = self.typed_error(&e);
        if let Some(kind) = kind {
            self.emit(if mounting {
                MonitorEvent::MountError(kind)
            } else {
                MonitorEvent::UnmountError(kind)
            });
        }

        match e.name.as_deref() {
            Some(UDISKS2_ERROR_ALREADY_UNMOUNTING) => {}
            Some(UDISKS2_ERROR_ALREADY_MOUNTED) => {
                self.set_status(&device_name, PartitionStatus::Mounted);
            }
            _ if mounting => self.set_status(&device_name, PartitionStatus::Unmounted),
            _ => {
                self.set_status(&device_name, PartitionStatus::Mounted);
                self.cancel_queued(&device_name, kind);
            }
        }
    }

    /// A format waiting on an unmount that failed is dropped, not retried
    /// on a later unmount.
    fn cancel_queued(&mut self, device_name: &str, kind: Option<OperationErrorKind>) {
        for operation in self.queue.cancel(device_name) {
            warn!(
                "Dropping queued {:?} of {}, unmount failed",
                operation.command, device_name
            );
            if let Some(kind) = kind {
                self.emit(MonitorEvent::FormatError(kind));
            }
        }
    }

    fn typed_error(&self, e: &CallError) -> Option<OperationErrorKind> {
        let name = e.name.as_deref()?;
        let kind = errors::lookup(name);
        if kind.is_none() {
            warn!("Unmapped UDisks2 error {name}");
        }
        kind
    }

    fn report_call_error(&self, request: &StorageRequest, e: &CallError) {
        self.emit(MonitorEvent::ErrorMessage {
            object_path: request.object_path(),
            error_name: e.name.clone().unwrap_or_else(|| e.message.clone()),
        });
    }

    fn do_format(&mut self, operation: QueuedOperation) {
        info!(
            "Formatting {} as {} with label {:?}",
            operation.device_name, operation.fs_type, operation.arguments.label
        );
        self.issue(StorageRequest::Format {
            device_name: operation.device_name,
            fs_type: operation.fs_type,
            arguments: operation.arguments,
        });
    }

    fn apply_job(&mut self, job: &Job) {
        let changed = apply_job_status(job, &mut self.manager);
        self.notify_changed(changed);
    }

    /// Announce `status` for `device_name` and record it on its partitions.
    fn set_status(&mut self, device_name: &str, status: PartitionStatus) {
        self.emit(MonitorEvent::Status {
            device_name: device_name.to_string(),
            status,
        });
        let changed = self.manager.apply_status(device_name, status);
        self.notify_changed(changed);
    }

    fn notify_changed(&self, changed: Vec<Partition>) {
        for partition in changed {
            self.emit(MonitorEvent::PartitionChanged(partition));
        }
    }

    fn issue(&self, request: StorageRequest) {
        spawn_request(self.backend.clone(), request, self.completions.clone());
    }

    fn emit(&self, event: MonitorEvent) {
        if self.events.send(event).is_err() {
            warn!("Monitor event dropped, no observer left");
        }
    }
}

fn require_device_name(device_name: &str, action: &str) -> Result<()> {
    if device_name.is_empty() {
        error!("Cannot {action} without device name");
        return Err(MonitorError::InvalidArgument(format!(
            "cannot {action} without device name"
        )));
    }
    if device_name.contains('/') {
        error!("Cannot {action} {device_name:?}: not a device name");
        return Err(MonitorError::InvalidArgument(format!(
            "{device_name:?} is not a device name"
        )));
    }
    Ok(())
}
