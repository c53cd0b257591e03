// SPDX-License-Identifier: GPL-3.0-only

//! Removable partition monitor
//!
//! Watches UDisks2 for SD cards and USB sticks, and mounts, unmounts or
//! formats them on request. Events are written to stdout as JSON lines.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use storage_types::bytes_to_pretty;
use storage_udisks::dbus::defines::block_device_path;
use storage_udisks::{
    MonitorConfig, MonitorEvent, MonitorEventStream, MonitorHandle, OperationErrorKind,
    PartitionManager, PartitionStatus, UDisksBackend, bus_event_stream, spawn_monitor,
};
use tracing::info;

mod logging;

use logging::LogLevel;

/// Events arriving closer together than this are one settling burst.
const SETTLE_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Parser)]
#[command(name = "storage-monitor", version)]
#[command(about = "Monitor and manage removable partitions through UDisks2")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value = "info")]
    log_level: LogLevel,

    /// Also log to daily rolling files in this directory
    #[arg(long, global = true, num_args = 0..=1, default_missing_value = "")]
    log_dir: Option<PathBuf>,

    /// How long one-shot commands wait for the operation to finish
    #[arg(long, global = true, default_value_t = 60)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print monitor events until interrupted
    Watch,
    /// List external partitions
    List {
        #[arg(long)]
        json: bool,
    },
    Mount {
        device: String,
    },
    Unmount {
        device: String,
    },
    /// Format a partition, unmounting it first when needed
    Format {
        device: String,
        #[arg(long)]
        fs_type: String,
        #[arg(long, default_value = "")]
        label: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_dir = cli.log_dir.clone().map(|dir| {
        if dir.as_os_str().is_empty() {
            logging::default_log_dir()
        } else {
            dir
        }
    });
    logging::init(cli.log_level, log_dir.as_deref());

    let config = MonitorConfig::load_or_default(cli.config.as_deref())
        .context("failed to load configuration")?;
    let manager = PartitionManager::from_config(&config)?;

    let backend = UDisksBackend::system().await?;
    let bus_events = bus_event_stream(backend.connection()).await?;
    let (handle, mut events, _task) = spawn_monitor(manager, Arc::new(backend), bus_events);
    info!("Monitoring removable partitions");

    let timeout = Duration::from_secs(cli.timeout_secs);

    match cli.command {
        Command::Watch => watch(&mut events).await,
        Command::List { json } => list(&handle, &mut events, timeout, json).await,
        Command::Mount { device } => {
            settle(&mut events, timeout).await;
            handle.mount(&device).await?;
            wait_for(
                &mut events,
                Expectation {
                    device_name: &device,
                    done: PartitionStatus::Mounted,
                    reverted: PartitionStatus::Unmounted,
                },
                timeout,
            )
            .await
        }
        Command::Unmount { device } => {
            settle(&mut events, timeout).await;
            handle.unmount(&device).await?;
            wait_for(
                &mut events,
                Expectation {
                    device_name: &device,
                    done: PartitionStatus::Unmounted,
                    reverted: PartitionStatus::Mounted,
                },
                timeout,
            )
            .await
        }
        Command::Format {
            device,
            fs_type,
            label,
        } => {
            settle(&mut events, timeout).await;
            handle.format(&device, &fs_type, &label).await?;
            wait_for(
                &mut events,
                Expectation {
                    device_name: &device,
                    done: PartitionStatus::Formatted,
                    reverted: PartitionStatus::Mounted,
                },
                timeout,
            )
            .await
        }
    }
}

async fn watch(events: &mut MonitorEventStream) -> Result<()> {
    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(event) => print_event(&event)?,
                None => bail!("monitor stopped"),
            },
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Received shutdown signal");
                return Ok(());
            }
        }
    }
}

/// Consume the initial burst of property updates so partition records are
/// complete before acting on them.
async fn settle(events: &mut MonitorEventStream, limit: Duration) {
    let settle = async {
        while let Ok(Some(_)) = tokio::time::timeout(SETTLE_INTERVAL, events.next()).await {}
    };
    let _ = tokio::time::timeout(limit, settle).await;
}

async fn list(
    handle: &MonitorHandle,
    events: &mut MonitorEventStream,
    timeout: Duration,
    json: bool,
) -> Result<()> {
    settle(events, timeout).await;
    let partitions = handle.partitions().await?;

    if json {
        for partition in &partitions {
            println!("{}", serde_json::to_string(partition)?);
        }
        return Ok(());
    }

    println!(
        "{:<12} {:>10} {:<11} {:<8} {:<16} MOUNT",
        "DEVICE", "SIZE", "STATUS", "TYPE", "LABEL"
    );
    for partition in partitions.iter().filter(|p| !p.is_parent) {
        println!(
            "{:<12} {:>10} {:<11} {:<8} {:<16} {}",
            partition.device_name,
            bytes_to_pretty(&partition.bytes_total, false),
            format!("{:?}", partition.status()),
            partition.filesystem_type,
            partition.device_label,
            partition.mount_path
        );
    }
    Ok(())
}

struct Expectation<'a> {
    device_name: &'a str,
    done: PartitionStatus,
    reverted: PartitionStatus,
}

/// Print events until `device_name` reaches the expected status, or the
/// operation reports a failure.
async fn wait_for(
    events: &mut MonitorEventStream,
    expect: Expectation<'_>,
    timeout: Duration,
) -> Result<()> {
    let device_path = block_device_path(expect.device_name);

    let wait = async {
        let mut failure: Option<String> = None;

        while let Some(event) = events.next().await {
            print_event(&event)?;

            match &event {
                MonitorEvent::Status {
                    device_name,
                    status,
                } if device_name == expect.device_name => {
                    if *status == expect.done {
                        return Ok(());
                    }
                    if *status == expect.reverted && failure.is_some() {
                        bail!(
                            "{} failed: {}",
                            device_name,
                            failure.unwrap_or_default()
                        );
                    }
                }
                MonitorEvent::UnmountError(OperationErrorKind::AlreadyUnmounting) => {
                    return Ok(());
                }
                MonitorEvent::MountError(kind) | MonitorEvent::UnmountError(kind) => {
                    failure = Some(kind.describe().to_string());
                }
                MonitorEvent::FormatError(kind) => {
                    bail!("format of {} failed: {}", expect.device_name, kind.describe());
                }
                MonitorEvent::ErrorMessage {
                    object_path,
                    error_name,
                } if *object_path == device_path => {
                    failure.get_or_insert_with(|| error_name.clone());
                }
                _ => {}
            }
        }

        bail!("monitor stopped")
    };

    tokio::time::timeout(timeout, wait)
        .await
        .with_context(|| format!("timed out waiting for {}", expect.device_name))?
}

fn print_event(event: &MonitorEvent) -> Result<()> {
    println!("{}", serde_json::to_string(event)?);
    Ok(())
}
