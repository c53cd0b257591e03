// SPDX-License-Identifier: GPL-3.0-only

//! Event loop owning a `Monitor`
//!
//! Bus events, call completions and caller commands are multiplexed onto one
//! task, so the monitor is only ever touched from a single context.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use storage_types::Partition;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::Monitor;
use super::backend::{CallCompletion, StorageBackend};
use super::event::{BusEvent, MonitorEventStream};
use crate::error::{MonitorError, Result};
use crate::manager::{PartitionManager, RefreshOutcome};

const COMMAND_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug)]
pub enum MonitorCommand {
    Mount {
        device_name: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Unmount {
        device_name: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Format {
        device_name: String,
        fs_type: String,
        label: String,
        reply: oneshot::Sender<Result<()>>,
    },
    GetBlockDevices,
    Refresh {
        reply: oneshot::Sender<RefreshOutcome>,
    },
    Partitions {
        reply: oneshot::Sender<Vec<Partition>>,
    },
}

/// Cloneable front end of a running monitor
#[derive(Debug, Clone)]
pub struct MonitorHandle {
    commands: mpsc::Sender<MonitorCommand>,
}

impl MonitorHandle {
    pub async fn mount(&self, device_name: &str) -> Result<()> {
        self.request(|reply| MonitorCommand::Mount {
            device_name: device_name.to_string(),
            reply,
        })
        .await?
    }

    pub async fn unmount(&self, device_name: &str) -> Result<()> {
        self.request(|reply| MonitorCommand::Unmount {
            device_name: device_name.to_string(),
            reply,
        })
        .await?
    }

    pub async fn format(&self, device_name: &str, fs_type: &str, label: &str) -> Result<()> {
        self.request(|reply| MonitorCommand::Format {
            device_name: device_name.to_string(),
            fs_type: fs_type.to_string(),
            label: label.to_string(),
            reply,
        })
        .await?
    }

    pub async fn get_block_devices(&self) -> Result<()> {
        self.commands
            .send(MonitorCommand::GetBlockDevices)
            .await
            .map_err(|_| MonitorError::ChannelClosed)
    }

    pub async fn refresh(&self) -> Result<RefreshOutcome> {
        self.request(|reply| MonitorCommand::Refresh { reply }).await
    }

    pub async fn partitions(&self) -> Result<Vec<Partition>> {
        self.request(|reply| MonitorCommand::Partitions { reply })
            .await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> MonitorCommand,
    ) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| MonitorError::ChannelClosed)?;
        response.await.map_err(|_| MonitorError::ChannelClosed)
    }
}

/// Build a monitor over `manager` and run it on its own task.
///
/// The partition set is enumerated and block devices are requested before
/// the first bus event is handled. The task ends when `bus_events` ends or
/// every handle is dropped.
pub fn spawn<S>(
    manager: PartitionManager,
    backend: Arc<dyn StorageBackend>,
    bus_events: S,
) -> (MonitorHandle, MonitorEventStream, JoinHandle<()>)
where
    S: Stream<Item = BusEvent> + Unpin + Send + 'static,
{
    let (completion_tx, completions) = mpsc::unbounded_channel();
    let (event_tx, events) = MonitorEventStream::channel();
    let (command_tx, commands) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

    let mut monitor = Monitor::new(manager, backend, completion_tx, event_tx);
    let task = tokio::spawn(async move {
        monitor.refresh_partitions();
        monitor.get_block_devices();
        run(monitor, bus_events, completions, commands).await;
    });

    (
        MonitorHandle {
            commands: command_tx,
        },
        events,
        task,
    )
}

pub async fn run<S>(
    mut monitor: Monitor,
    mut bus_events: S,
    mut completions: mpsc::UnboundedReceiver<CallCompletion>,
    mut commands: mpsc::Receiver<MonitorCommand>,
) where
    S: Stream<Item = BusEvent> + Unpin,
{
    info!("Monitor running");

    loop {
        tokio::select! {
            event = bus_events.next() => match event {
                Some(event) => {
                    debug!("Bus event: {:?}", event);
                    monitor.handle_bus_event(event);
                }
                None => {
                    warn!("Bus event stream ended");
                    break;
                }
            },
            Some(completion) = completions.recv() => {
                monitor.handle_completion(completion);
            }
            command = commands.recv() => match command {
                Some(command) => dispatch(&mut monitor, command),
                None => {
                    info!("All monitor handles dropped");
                    break;
                }
            },
        }
    }

    info!("Monitor stopped");
}

fn dispatch(monitor: &mut Monitor, command: MonitorCommand) {
    // A dropped reply receiver only means the caller stopped waiting.
    match command {
        MonitorCommand::Mount { device_name, reply } => {
            let _ = reply.send(monitor.mount(&device_name));
        }
        MonitorCommand::Unmount { device_name, reply } => {
            let _ = reply.send(monitor.unmount(&device_name));
        }
        MonitorCommand::Format {
            device_name,
            fs_type,
            label,
            reply,
        } => {
            let _ = reply.send(monitor.format(&device_name, &fs_type, &label));
        }
        MonitorCommand::GetBlockDevices => monitor.get_block_devices(),
        MonitorCommand::Refresh { reply } => {
            let _ = reply.send(monitor.refresh_partitions());
        }
        MonitorCommand::Partitions { reply } => {
            let _ = reply.send(monitor.partitions().to_vec());
        }
    }
}
