// SPDX-License-Identifier: GPL-3.0-only

//! In-flight UDisks2 jobs and the partition state machine they drive

use std::collections::HashMap;

use storage_types::{ActiveState, Partition, PartitionStatus};
use tracing::info;

use super::job::{Job, JobOperation, JobStatus};
use crate::manager::PartitionManager;
use crate::property::PropertyMap;

#[derive(Debug, Default)]
pub struct JobTracker {
    jobs: HashMap<String, Job>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a job if its operation is one the monitor cares about.
    pub fn job_added(&mut self, path: &str, properties: &PropertyMap) -> Option<&Job> {
        let job = Job::from_properties(path, properties);
        if job.operation() == JobOperation::Other {
            return None;
        }

        info!(
            "Job added: {} {:?} on {:?}",
            path,
            job.operation(),
            job.objects()
        );
        self.jobs.insert(path.to_string(), job);
        self.jobs.get(path)
    }

    pub fn job_completed(&mut self, path: &str, success: bool, message: &str) -> Option<&Job> {
        let job = self.jobs.get_mut(path)?;
        job.complete(success, message);
        info!(
            "Job completed: {} success: {} busy: {} message: {:?}",
            path,
            job.success(),
            job.device_busy(),
            job.message()
        );
        Some(job)
    }

    /// Forget a job, whether or not its completion was seen.
    pub fn job_removed(&mut self, path: &str) -> Option<Job> {
        self.jobs.remove(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.jobs.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Status and activity label a job leaves its partitions in, or `None` for
/// operations that do not affect partition status.
pub fn resolve_transition(
    operation: JobOperation,
    status: JobStatus,
    success: bool,
    device_busy: bool,
) -> Option<(PartitionStatus, ActiveState)> {
    use JobOperation::*;
    use PartitionStatus as S;

    let transition = match (operation, status) {
        (Mount, JobStatus::Added) => (S::Mounting, ActiveState::Activating),
        (Unmount, JobStatus::Added) => (S::Unmounting, ActiveState::Deactivating),
        (Format, JobStatus::Added) => (S::Formatting, ActiveState::Inactive),
        (Mount, JobStatus::Completed) if success => (S::Mounted, ActiveState::Active),
        (Mount, JobStatus::Completed) => (S::Mounted, ActiveState::Failed),
        // A busy unmount leaves the device mounted.
        (Unmount, JobStatus::Completed) if success && device_busy => {
            (S::Mounted, ActiveState::Active)
        }
        (Unmount, JobStatus::Completed) if success => (S::Unmounted, ActiveState::Inactive),
        (Unmount, JobStatus::Completed) => (S::Unmounted, ActiveState::Failed),
        (Format, JobStatus::Completed) if success => (S::Formatted, ActiveState::Inactive),
        (Format, JobStatus::Completed) => (S::Unmounted, ActiveState::Failed),
        (Other, _) => return None,
    };

    Some(transition)
}

/// Apply `job` to the partitions it targets.
///
/// Returns the partitions whose status changed; only those warrant a change
/// notification.
pub fn apply_job_status(job: &Job, manager: &mut PartitionManager) -> Vec<Partition> {
    let Some((status, active_state)) = resolve_transition(
        job.operation(),
        job.status(),
        job.success(),
        job.device_busy(),
    ) else {
        return Vec::new();
    };

    let targets = job.target_device_names();
    let affected = manager.indices_for_device_names(&targets);

    let mut changed = Vec::new();
    for index in affected {
        let Some(partition) = manager.partition_mut(index) else {
            continue;
        };

        let old_status = partition.status();
        partition.set_state(status, active_state);

        if matches!(job.operation(), JobOperation::Mount | JobOperation::Unmount) {
            partition.mount_failed = if job.device_busy() {
                false
            } else {
                !job.success()
            };
        }

        if old_status != status {
            info!(
                "Partition {} {:?} -> {:?} ({})",
                partition.device_name, old_status, status, active_state
            );
            changed.push(partition.clone());
        }
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbus::defines::block_device_path;
    use crate::manager::tests::{entry, manager_with};
    use crate::monitor::block::tests::owned;

    fn job(operation: JobOperation, device: &str) -> Job {
        Job::new(
            "/org/freedesktop/UDisks2/jobs/1",
            operation,
            vec![block_device_path(device)],
        )
    }

    #[test]
    fn transition_table() {
        use ActiveState as A;
        use JobOperation::*;
        use JobStatus::*;
        use PartitionStatus as S;

        let cases = [
            (Mount, Added, true, false, (S::Mounting, A::Activating)),
            (Mount, Completed, true, false, (S::Mounted, A::Active)),
            (Mount, Completed, false, false, (S::Mounted, A::Failed)),
            (Unmount, Added, true, false, (S::Unmounting, A::Deactivating)),
            (Unmount, Completed, true, false, (S::Unmounted, A::Inactive)),
            (Unmount, Completed, true, true, (S::Mounted, A::Active)),
            (Unmount, Completed, false, false, (S::Unmounted, A::Failed)),
            (Format, Added, true, false, (S::Formatting, A::Inactive)),
            (Format, Completed, true, false, (S::Formatted, A::Inactive)),
            (Format, Completed, false, false, (S::Unmounted, A::Failed)),
        ];

        for (operation, status, success, busy, expected) in cases {
            assert_eq!(
                resolve_transition(operation, status, success, busy),
                Some(expected),
                "{operation:?} {status:?} success={success} busy={busy}"
            );
        }

        assert_eq!(resolve_transition(Other, Completed, true, false), None);
    }

    #[test]
    fn successful_mount_job_ends_mounted_and_active() {
        let (mut manager, _) = manager_with(vec![entry("sdb1", None)]);
        let mut job = job(JobOperation::Mount, "sdb1");

        let changed = apply_job_status(&job, &mut manager);
        assert_eq!(changed[0].status(), PartitionStatus::Mounting);

        job.complete(true, "");
        let changed = apply_job_status(&job, &mut manager);
        assert_eq!(changed.len(), 1);

        let partition = manager.partition("sdb1").unwrap();
        assert_eq!(partition.status(), PartitionStatus::Mounted);
        assert_eq!(partition.active_state(), ActiveState::Active);
        assert!(!partition.mount_failed);
    }

    #[test]
    fn busy_unmount_keeps_partition_mounted_without_failure() {
        let (mut manager, _) = manager_with(vec![entry("sdb1", Some("/run/media/user/SD"))]);
        let mut job = job(JobOperation::Unmount, "sdb1");

        apply_job_status(&job, &mut manager);
        job.complete(false, "Error unmounting /dev/sdb1: target is busy");
        apply_job_status(&job, &mut manager);

        let partition = manager.partition("sdb1").unwrap();
        assert_eq!(partition.status(), PartitionStatus::Mounted);
        assert_eq!(partition.active_state(), ActiveState::Active);
        assert!(!partition.mount_failed);
    }

    #[test]
    fn failed_unmount_sets_mount_failed() {
        let (mut manager, _) = manager_with(vec![entry("sdb1", Some("/run/media/user/SD"))]);
        let mut job = job(JobOperation::Unmount, "sdb1");

        job.complete(false, "Error unmounting: permission denied");
        apply_job_status(&job, &mut manager);

        let partition = manager.partition("sdb1").unwrap();
        assert_eq!(partition.status(), PartitionStatus::Unmounted);
        assert_eq!(partition.active_state(), ActiveState::Failed);
        assert!(partition.mount_failed);
    }

    #[test]
    fn replaying_an_event_reports_the_change_once() {
        let (mut manager, _) = manager_with(vec![entry("sdb1", None)]);
        let job = job(JobOperation::Mount, "sdb1");

        assert_eq!(apply_job_status(&job, &mut manager).len(), 1);
        assert!(apply_job_status(&job, &mut manager).is_empty());
    }

    #[test]
    fn untracked_targets_are_ignored() {
        let (mut manager, _) = manager_with(vec![entry("sdb1", None)]);
        let job = job(JobOperation::Format, "mmcblk0p12");

        assert!(apply_job_status(&job, &mut manager).is_empty());
        assert_eq!(
            manager.partition("sdb1").unwrap().status(),
            PartitionStatus::Unmounted
        );
    }

    #[test]
    fn tracker_ignores_unrecognized_operations() {
        let mut tracker = JobTracker::new();
        let properties = PropertyMap::from([(
            "Operation".to_string(),
            owned("ata-smart-selftest"),
        )]);

        assert!(tracker.job_added("/org/freedesktop/UDisks2/jobs/3", &properties).is_none());
        assert!(tracker.is_empty());
        assert!(tracker.job_completed("/org/freedesktop/UDisks2/jobs/3", true, "").is_none());
    }

    #[test]
    fn removal_drops_job_regardless_of_completion() {
        let mut tracker = JobTracker::new();
        let properties = PropertyMap::from([(
            "Operation".to_string(),
            owned("filesystem-unmount"),
        )]);

        tracker.job_added("/org/freedesktop/UDisks2/jobs/4", &properties);
        assert!(tracker.contains("/org/freedesktop/UDisks2/jobs/4"));

        let removed = tracker.job_removed("/org/freedesktop/UDisks2/jobs/4").unwrap();
        assert!(!removed.is_completed());
        assert!(tracker.is_empty());
    }
}
