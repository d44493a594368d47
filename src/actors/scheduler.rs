//! PollSchedulerActor - drives poll cycles at a fixed interval
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick → PollOrchestrator::run_cycle → [collection tasks] → HEC
//!     ↑
//!     └─── Commands (PollNow, Shutdown)
//! ```
//!
//! The cycle is awaited inside the actor loop, so two cycles never overlap.
//! Ticks missed while a cycle runs are delayed instead of fired in a burst.
//! Pending commands are served before a pending tick.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, instrument, warn};

use crate::config::DeviceDescriptor;

use super::messages::{CycleReport, SchedulerCommand};
use super::poller::PollOrchestrator;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Actor that owns the device list and the poll interval
pub struct PollSchedulerActor {
    orchestrator: PollOrchestrator,

    /// Read-only for the lifetime of the actor
    devices: Vec<Arc<DeviceDescriptor>>,

    /// Command receiver for control messages
    command_rx: mpsc::Receiver<SchedulerCommand>,

    interval_duration: Duration,
}

impl PollSchedulerActor {
    pub fn new(
        orchestrator: PollOrchestrator,
        devices: Vec<Arc<DeviceDescriptor>>,
        interval_duration: Duration,
        command_rx: mpsc::Receiver<SchedulerCommand>,
    ) -> Self {
        Self {
            orchestrator,
            devices,
            command_rx,
            // tokio's interval panics on a zero period
            interval_duration: interval_duration.max(MIN_INTERVAL),
        }
    }

    /// Run the actor's main loop
    ///
    /// This is the entry point for the actor. It runs until:
    /// - A Shutdown command is received
    /// - The command channel is closed
    #[instrument(skip(self), fields(devices = self.devices.len()))]
    pub async fn run(mut self) {
        debug!(
            "starting poll scheduler with an interval of {}s",
            self.interval_duration.as_secs()
        );

        let mut ticker = interval(self.interval_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // commands first: a Shutdown queued during a cycle wins over a missed tick
            tokio::select! {
                biased;

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(SchedulerCommand::PollNow { respond_to }) => {
                            debug!("received PollNow command");
                            let report = self.orchestrator.run_cycle(&self.devices).await;
                            let _ = respond_to.send(report);
                        }

                        Some(SchedulerCommand::Shutdown) => {
                            debug!("received shutdown command");
                            break;
                        }

                        None => {
                            warn!("command channel closed, shutting down");
                            break;
                        }
                    }
                }

                _ = ticker.tick() => {
                    self.orchestrator.run_cycle(&self.devices).await;
                }
            }
        }

        debug!("poll scheduler stopped");
    }
}

/// Handle for controlling a PollSchedulerActor
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    /// Spawn the scheduler as a tokio task.
    pub fn spawn(
        orchestrator: PollOrchestrator,
        devices: Vec<Arc<DeviceDescriptor>>,
        interval_duration: Duration,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = PollSchedulerActor::new(orchestrator, devices, interval_duration, cmd_rx);

        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Run a cycle immediately and wait for its report
    pub async fn poll_now(&self) -> Result<CycleReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::PollNow { respond_to: tx })
            .await
            .context("failed to send PollNow command")?;

        rx.await.context("failed to receive cycle report")
    }

    /// Ask the scheduler to stop before its next tick
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(SchedulerCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }

    /// Resolves once the actor has exited
    pub async fn stopped(&self) {
        self.sender.closed().await;
    }
}
