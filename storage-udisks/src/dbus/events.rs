// SPDX-License-Identifier: GPL-3.0-only

//! UDisks2 signal subscription
//!
//! One match rule on the UDisks2 path namespace carries object manager,
//! property and job signals on the same stream, so they reach the monitor
//! in bus order.

use futures::StreamExt;
use futures::stream::Stream;
use futures::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::{info, warn};
use zbus::zvariant::OwnedObjectPath;
use zbus::{Connection, MatchRule, Message, MessageStream};

use super::defines::{
    DBUS_OBJECT_MANAGER_INTERFACE, DBUS_PROPERTIES_INTERFACE, UDISKS2_JOB_INTERFACE, UDISKS2_PATH,
};
use crate::error::Result;
use crate::monitor::event::BusEvent;
use crate::property::{InterfaceMap, PropertyMap};

pub struct BusEventStream {
    receiver: mpsc::UnboundedReceiver<BusEvent>,
}

impl Stream for BusEventStream {
    type Item = BusEvent;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// Subscribe to UDisks2 signals on `connection`.
pub async fn bus_event_stream(connection: &Connection) -> Result<BusEventStream> {
    let rule = MatchRule::builder()
        .msg_type(zbus::message::Type::Signal)
        .path_namespace(UDISKS2_PATH)?
        .build();
    let mut messages = MessageStream::for_match_rule(rule, connection, None).await?;

    let (sender, receiver) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(message) = messages.next().await {
            let message = match message {
                Ok(message) => message,
                Err(e) => {
                    warn!("Failed to receive UDisks2 signal: {e}");
                    continue;
                }
            };

            match parse_signal(&message) {
                Ok(Some(event)) => {
                    if sender.send(event).is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("Failed to parse UDisks2 signal: {e}"),
            }
        }
        info!("UDisks2 signal subscription closed");
    });

    info!("Subscribed to UDisks2 signals under {UDISKS2_PATH}");
    Ok(BusEventStream { receiver })
}

/// Decode the signals the monitor consumes; anything else is `None`.
pub fn parse_signal(message: &Message) -> zbus::Result<Option<BusEvent>> {
    let header = message.header();
    let (Some(path), Some(interface), Some(member)) =
        (header.path(), header.interface(), header.member())
    else {
        return Ok(None);
    };

    let body = message.body();
    let event = match (interface.as_str(), member.as_str()) {
        (DBUS_OBJECT_MANAGER_INTERFACE, "InterfacesAdded") => {
            let (object_path, interfaces) =
                body.deserialize::<(OwnedObjectPath, InterfaceMap)>()?;
            BusEvent::InterfacesAdded {
                object_path: object_path.to_string(),
                interfaces,
            }
        }
        (DBUS_OBJECT_MANAGER_INTERFACE, "InterfacesRemoved") => {
            let (object_path, interfaces) = body.deserialize::<(OwnedObjectPath, Vec<String>)>()?;
            BusEvent::InterfacesRemoved {
                object_path: object_path.to_string(),
                interfaces,
            }
        }
        (DBUS_PROPERTIES_INTERFACE, "PropertiesChanged") => {
            let (interface, changed, invalidated) =
                body.deserialize::<(String, PropertyMap, Vec<String>)>()?;
            BusEvent::PropertiesChanged {
                object_path: path.to_string(),
                interface,
                changed,
                invalidated,
            }
        }
        (UDISKS2_JOB_INTERFACE, "Completed") => {
            let (success, message) = body.deserialize::<(bool, String)>()?;
            BusEvent::JobCompleted {
                object_path: path.to_string(),
                success,
                message,
            }
        }
        _ => return Ok(None),
    };

    Ok(Some(event))
}
