//! NotificationListenerActor - forwards inbound traps and informs
//!
//! ```text
//! UDP packet → NotificationSource → normalize_notification → Envelope(1 event) → HEC
//!     ↑
//!     └─── Commands (Shutdown)
//! ```
//!
//! Every notification is forwarded on its own, right after it was received.
//! Notification records never share a batch with poll records.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::error::NotificationError;
use crate::hec::Forwarder;
use crate::record::normalize_notification;
use crate::snmp::{InboundNotification, NotificationSource};

use super::messages::ListenerCommand;

pub struct NotificationListenerActor<S> {
    source: S,
    forwarder: Forwarder,

    /// Configured device names by address, used to name notification records
    names: BTreeMap<String, String>,

    command_rx: mpsc::Receiver<ListenerCommand>,
}

impl<S: NotificationSource> NotificationListenerActor<S> {
    pub fn new(
        source: S,
        forwarder: Forwarder,
        names: BTreeMap<String, String>,
        command_rx: mpsc::Receiver<ListenerCommand>,
    ) -> Self {
        Self {
            source,
            forwarder,
            names,
            command_rx,
        }
    }

    /// Run the receive loop
    ///
    /// Runs until a Shutdown command arrives, the command channel closes or
    /// the transport fails. Undecodable packets are skipped.
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting notification listener");

        loop {
            tokio::select! {
                received = self.source.recv() => {
                    match received {
                        Ok(notification) => {
                            handle_notification(&self.forwarder, &self.names, notification).await;
                        }
                        Err(e @ NotificationError::Decode(_)) => {
                            warn!("dropping notification: {e}");
                        }
                        Err(e @ NotificationError::Transport(_)) => {
                            error!("trap receiver error: {e}");
                            break;
                        }
                    }
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(ListenerCommand::Shutdown) => {
                            debug!("received shutdown command");
                        }
                        None => {
                            warn!("command channel closed, shutting down");
                        }
                    }
                    break;
                }
            }
        }

        debug!("notification listener stopped");
    }
}

#[instrument(skip_all, fields(peer = %notification.peer))]
async fn handle_notification(
    forwarder: &Forwarder,
    names: &BTreeMap<String, String>,
    notification: InboundNotification,
) {
    let ip = notification.peer.ip().to_canonical().to_string();
    let name = names.get(&ip).cloned().unwrap_or_else(|| ip.clone());

    info!(host = %ip, "new trap data received");

    let record = normalize_notification(&ip, &name, &notification.bindings);
    debug!(?record, "trap record prepared");

    if let Err(e) = forwarder.forward(vec![record]).await {
        error!(host = %ip, "sending trap data to Splunk failed: {e}");
    }
}

/// Handle for controlling a NotificationListenerActor
#[derive(Clone)]
pub struct ListenerHandle {
    sender: mpsc::Sender<ListenerCommand>,
}

impl ListenerHandle {
    /// Spawn the listener loop for an already bound `source`.
    pub fn spawn<S>(source: S, forwarder: Forwarder, names: BTreeMap<String, String>) -> Self
    where
        S: NotificationSource + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);

        let actor = NotificationListenerActor::new(source, forwarder, names, cmd_rx);

        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(ListenerCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }

    /// Resolves once the actor has exited
    pub async fn stopped(&self) {
        self.sender.closed().await;
    }
}
