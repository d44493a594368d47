//! Message types for actor communication
//!
//! Commands travel over mpsc channels to a single actor, results of a
//! requested poll come back over a oneshot channel.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use crate::config::DeviceDescriptor;
use crate::error::CollectionError;

/// A device that could not be collected during a cycle
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceFailure {
    pub ip: String,
    pub name: String,
    pub error: CollectionError,
}

impl DeviceFailure {
    pub fn new(device: &DeviceDescriptor, error: CollectionError) -> Self {
        Self {
            ip: device.ip.clone(),
            name: device.name.clone(),
            error,
        }
    }
}

/// Summary of one poll cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// When the cycle started
    pub started_at: DateTime<Utc>,

    /// Time from fan-out until delivery finished
    pub elapsed: Duration,

    /// Records collected successfully
    pub collected: usize,

    /// Records accepted by the event collector
    pub delivered: usize,

    /// Devices excluded from this cycle's batch
    pub failures: Vec<DeviceFailure>,

    /// Set when the batch could not be delivered
    pub delivery_error: Option<String>,
}

impl CycleReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Commands that can be sent to the poll scheduler
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Run a cycle right away, outside of the interval
    PollNow {
        /// Channel to send the report back
        respond_to: oneshot::Sender<CycleReport>,
    },

    /// Stop before the next tick
    ///
    /// A cycle that is already running finishes first.
    Shutdown,
}

/// Commands that can be sent to the notification listener
#[derive(Debug)]
pub enum ListenerCommand {
    Shutdown,
}
