// SPDX-License-Identifier: GPL-3.0-only

//! End-to-end monitor behavior against a recording backend

use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use storage_udisks::{
    ActiveState, BlockDeviceEntry, BusEvent, CallCompletion, CallError, FormatArguments,
    InterfaceMap, Monitor, MonitorConfig, MonitorEvent, OperationErrorKind, PartitionManager,
    PartitionSource, PartitionStatus, PropertyMap, StorageBackend, StorageRequest,
};
use tokio::sync::mpsc;
use zbus::zvariant::{ObjectPath, OwnedValue, Value};

const BLOCK: &str = "org.freedesktop.UDisks2.Block";
const FILESYSTEM: &str = "org.freedesktop.UDisks2.Filesystem";
const JOB: &str = "org.freedesktop.UDisks2.Job";

#[derive(Clone, Default)]
struct SharedSource(Arc<Mutex<Vec<BlockDeviceEntry>>>);

impl SharedSource {
    fn set(&self, entries: Vec<BlockDeviceEntry>) {
        *self.0.lock().unwrap() = entries;
    }
}

impl PartitionSource for SharedSource {
    fn block_devices(&self) -> storage_udisks::Result<Vec<BlockDeviceEntry>> {
        Ok(self.0.lock().unwrap().clone())
    }
}

fn entries(devices: &[(&str, Option<&str>)]) -> Vec<BlockDeviceEntry> {
    devices
        .iter()
        .map(|(name, mount_path)| BlockDeviceEntry {
            name: name.to_string(),
            bytes_total: 16 << 30,
            mount_path: mount_path.map(str::to_string),
        })
        .collect()
}

#[derive(Default)]
struct RecordingBackend {
    unmount_error: Mutex<Option<CallError>>,
}

impl StorageBackend for RecordingBackend {
    fn mount(&self, _device_name: String) -> BoxFuture<'_, Result<(), CallError>> {
        Box::pin(async { Ok(()) })
    }

    fn unmount(&self, _device_name: String) -> BoxFuture<'_, Result<(), CallError>> {
        let result = match self.unmount_error.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        };
        Box::pin(async move { result })
    }

    fn format(
        &self,
        _device_name: String,
        _fs_type: String,
        _arguments: FormatArguments,
    ) -> BoxFuture<'_, Result<(), CallError>> {
        Box::pin(async { Ok(()) })
    }

    fn fetch_properties(
        &self,
        _object_path: String,
    ) -> BoxFuture<'_, Result<InterfaceMap, CallError>> {
        Box::pin(async { Ok(InterfaceMap::new()) })
    }
}

struct Scenario {
    monitor: Monitor,
    backend: Arc<RecordingBackend>,
    source: SharedSource,
    completions: mpsc::UnboundedReceiver<CallCompletion>,
    events: mpsc::UnboundedReceiver<MonitorEvent>,
}

impl Scenario {
    fn new(devices: &[(&str, Option<&str>)]) -> Self {
        let source = SharedSource::default();
        source.set(entries(devices));
        let manager =
            PartitionManager::new(&MonitorConfig::default(), Box::new(source.clone())).unwrap();

        let backend = Arc::new(RecordingBackend::default());
        let (completion_tx, completions) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::unbounded_channel();
        let mut monitor = Monitor::new(manager, backend.clone(), completion_tx, event_tx);
        monitor.refresh_partitions();

        Self {
            monitor,
            backend,
            source,
            completions,
            events,
        }
    }

    /// Wait for the next issued call and hand its outcome to the monitor.
    async fn next_call(&mut self) -> StorageRequest {
        let completion = self.completions.recv().await.unwrap();
        let request = completion.request.clone();
        self.monitor.handle_completion(completion);
        request
    }

    async fn assert_no_call(&mut self) {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
        assert!(self.completions.try_recv().is_err(), "unexpected call issued");
    }

    fn events(&mut self) -> Vec<MonitorEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    fn partition(&self, device_name: &str) -> storage_udisks::Partition {
        self.monitor
            .manager()
            .partition(device_name)
            .cloned()
            .unwrap()
    }

    fn bus(&mut self, event: BusEvent) {
        self.monitor.handle_bus_event(event);
    }
}

fn block_path(device_name: &str) -> String {
    format!("/org/freedesktop/UDisks2/block_devices/{device_name}")
}

fn owned<'a>(value: impl Into<Value<'a>>) -> OwnedValue {
    let value: Value<'a> = value.into();
    OwnedValue::try_from(value).unwrap()
}

fn byte_string(text: &str) -> Vec<u8> {
    format!("{text}\0").into_bytes()
}

fn mount_points(paths: &[&str]) -> PropertyMap {
    let points = paths.iter().map(|p| byte_string(p)).collect::<Vec<_>>();
    PropertyMap::from([("MountPoints".to_string(), owned(points))])
}

fn block_interfaces(device_name: &str, id_type: &str, mounted_at: Option<&str>) -> InterfaceMap {
    let block = PropertyMap::from([
        (
            "Device".to_string(),
            owned(byte_string(&format!("/dev/{device_name}"))),
        ),
        ("IdType".to_string(), owned(id_type)),
        ("IdLabel".to_string(), owned("SDCARD")),
        ("IdUUID".to_string(), owned("1234-ABCD")),
        ("HintAuto".to_string(), OwnedValue::from(true)),
        ("ReadOnly".to_string(), OwnedValue::from(false)),
    ]);
    let mounted_at: Vec<&str> = mounted_at.into_iter().collect();
    let filesystem = mount_points(&mounted_at);

    InterfaceMap::from([
        (BLOCK.to_string(), block),
        (FILESYSTEM.to_string(), filesystem),
    ])
}

fn job_added(path: &str, operation: &str, device_name: &str) -> BusEvent {
    BusEvent::InterfacesAdded {
        object_path: path.to_string(),
        interfaces: InterfaceMap::from([(
            JOB.to_string(),
            PropertyMap::from([
                ("Operation".to_string(), owned(operation)),
                (
                    "Objects".to_string(),
                    owned(vec![ObjectPath::try_from(block_path(device_name)).unwrap()]),
                ),
            ]),
        )]),
    }
}

fn job_completed(path: &str, success: bool, message: &str) -> BusEvent {
    BusEvent::JobCompleted {
        object_path: path.to_string(),
        success,
        message: message.to_string(),
    }
}

#[tokio::test]
async fn filesystem_announcement_makes_data_less_block_mountable() {
    let mut s = Scenario::new(&[("sdb", None), ("sdb1", None)]);

    s.monitor.get_block_devices();
    assert_eq!(
        s.next_call().await,
        StorageRequest::FetchProperties {
            object_path: block_path("sdb1"),
        }
    );
    assert!(!s.partition("sdb1").can_mount);

    s.bus(BusEvent::InterfacesAdded {
        object_path: block_path("sdb1"),
        interfaces: block_interfaces("sdb1", "vfat", None),
    });

    let partition = s.partition("sdb1");
    assert!(partition.can_mount);
    assert!(partition.valid);
    assert_eq!(partition.device_label, "SDCARD");
    assert!(
        s.events()
            .iter()
            .any(|e| matches!(e, MonitorEvent::PartitionChanged(p) if p.can_mount))
    );
}

#[tokio::test]
async fn format_of_mounted_card_waits_for_unmount() {
    let mut s = Scenario::new(&[("mmcblk1p1", Some("/run/media/user/SDCARD"))]);
    s.bus(BusEvent::InterfacesAdded {
        object_path: block_path("mmcblk1p1"),
        interfaces: block_interfaces("mmcblk1p1", "vfat", Some("/run/media/user/SDCARD")),
    });
    assert_eq!(s.partition("mmcblk1p1").status(), PartitionStatus::Mounted);

    s.monitor.format("mmcblk1p1", "ext4", "Data").unwrap();
    assert_eq!(s.monitor.queue().len(), 1);

    assert_eq!(
        s.next_call().await,
        StorageRequest::Unmount {
            device_name: "mmcblk1p1".to_string(),
        }
    );
    s.assert_no_call().await;

    s.bus(BusEvent::PropertiesChanged {
        object_path: block_path("mmcblk1p1"),
        interface: FILESYSTEM.to_string(),
        changed: mount_points(&[]),
        invalidated: Vec::new(),
    });

    assert_eq!(
        s.next_call().await,
        StorageRequest::Format {
            device_name: "mmcblk1p1".to_string(),
            fs_type: "ext4".to_string(),
            arguments: FormatArguments {
                label: "Data".to_string(),
                no_block: true,
                update_partition_type: true,
            },
        }
    );
    assert!(s.monitor.queue().is_empty());
    assert_eq!(s.partition("mmcblk1p1").status(), PartitionStatus::Formatted);
}

#[tokio::test]
async fn format_of_unmounted_card_is_immediate() {
    let mut s = Scenario::new(&[("mmcblk1p1", None)]);

    s.monitor.format("mmcblk1p1", "vfat", "").unwrap();

    assert!(matches!(
        s.next_call().await,
        StorageRequest::Format { .. }
    ));
    assert!(s.monitor.queue().is_empty());
}

#[tokio::test]
async fn mount_jobs_end_mounted_and_active() {
    let mut s = Scenario::new(&[("sdb1", None)]);
    let job = "/org/freedesktop/UDisks2/jobs/21";

    s.bus(job_added(job, "filesystem-mount", "sdb1"));
    assert_eq!(s.partition("sdb1").active_state(), ActiveState::Activating);

    s.bus(job_completed(job, true, ""));

    let partition = s.partition("sdb1");
    assert_eq!(partition.status(), PartitionStatus::Mounted);
    assert_eq!(partition.active_state(), ActiveState::Active);
    assert!(!partition.mount_failed);
}

#[tokio::test]
async fn busy_unmount_job_leaves_card_mounted() {
    let mut s = Scenario::new(&[("sdb1", Some("/run/media/user/SDCARD"))]);
    let job = "/org/freedesktop/UDisks2/jobs/22";

    s.bus(job_added(job, "filesystem-unmount", "sdb1"));
    assert_eq!(s.partition("sdb1").status(), PartitionStatus::Unmounting);

    s.bus(job_completed(
        job,
        false,
        "Error unmounting /dev/sdb1: target is busy",
    ));

    let partition = s.partition("sdb1");
    assert_eq!(partition.status(), PartitionStatus::Mounted);
    assert_eq!(partition.active_state(), ActiveState::Active);
    assert!(!partition.mount_failed);
}

#[tokio::test]
async fn replayed_job_signal_notifies_once() {
    let mut s = Scenario::new(&[("sdb1", None)]);
    let job = "/org/freedesktop/UDisks2/jobs/23";

    s.bus(job_added(job, "filesystem-mount", "sdb1"));
    s.bus(job_completed(job, true, ""));
    s.bus(job_completed(job, true, ""));

    let changes = s
        .events()
        .into_iter()
        .filter(|e| matches!(e, MonitorEvent::PartitionChanged(_)))
        .count();
    assert_eq!(changes, 2);
}

#[tokio::test]
async fn failed_unmount_reverts_to_mounted() {
    let mut s = Scenario::new(&[("sdb1", Some("/run/media/user/SDCARD"))]);
    *s.backend.unmount_error.lock().unwrap() = Some(CallError::named(
        "org.freedesktop.UDisks2.Error.DeviceBusy",
        "Error unmounting /dev/sdb1: target is busy",
    ));

    s.monitor.unmount("sdb1").unwrap();
    assert_eq!(s.partition("sdb1").status(), PartitionStatus::Unmounting);
    s.next_call().await;

    let events = s.events();
    assert!(events.contains(&MonitorEvent::UnmountError(OperationErrorKind::DeviceBusy)));
    assert!(events.contains(&MonitorEvent::ErrorMessage {
        object_path: block_path("sdb1"),
        error_name: "org.freedesktop.UDisks2.Error.DeviceBusy".to_string(),
    }));
    assert_eq!(s.partition("sdb1").status(), PartitionStatus::Mounted);
}

#[tokio::test]
async fn unplugged_card_is_forgotten() {
    let mut s = Scenario::new(&[("sdb", None), ("sdb1", None)]);
    s.bus(BusEvent::InterfacesAdded {
        object_path: block_path("sdb1"),
        interfaces: block_interfaces("sdb1", "vfat", None),
    });
    assert_eq!(s.monitor.blocks().len(), 1);
    s.events();

    s.source.set(Vec::new());
    s.bus(BusEvent::InterfacesRemoved {
        object_path: block_path("sdb1"),
        interfaces: vec![BLOCK.to_string(), FILESYSTEM.to_string()],
    });

    assert!(s.monitor.blocks().is_empty());
    assert!(s.monitor.manager().partition("sdb1").is_none());
    assert_eq!(
        s.events(),
        vec![MonitorEvent::PartitionsRefreshed {
            added: Vec::new(),
            removed: vec!["sdb".to_string(), "sdb1".to_string()],
        }]
    );
}

#[tokio::test]
async fn inserted_card_is_picked_up_from_its_filesystem() {
    let mut s = Scenario::new(&[]);

    s.source.set(entries(&[("mmcblk1", None), ("mmcblk1p1", None)]));
    s.bus(BusEvent::InterfacesAdded {
        object_path: block_path("mmcblk1p1"),
        interfaces: block_interfaces("mmcblk1p1", "exfat", None),
    });

    let events = s.events();
    assert_eq!(
        events.first(),
        Some(&MonitorEvent::PartitionsRefreshed {
            added: vec!["mmcblk1".to_string(), "mmcblk1p1".to_string()],
            removed: Vec::new(),
        })
    );
    let partition = s.partition("mmcblk1p1");
    assert!(partition.valid);
    assert!(partition.can_mount);
    assert_eq!(partition.filesystem_type, "exfat");
}
