//! PollOrchestrator - one fan-out/fan-in collection round over all devices
//!
//! ```text
//!                 ┌─> task(device 1) ─┐
//! run_cycle ──────┼─> task(device 2) ─┼──> barrier ──> Envelope ──> HEC
//!   (≤ max_concurrency at a time)     │
//!                 └─> task(device N) ─┘
//! ```
//!
//! Every task is bounded by the per-device timeout. A failing device is
//! logged and left out of the batch; it never cancels the other tasks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinSet};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::{DeviceDescriptor, PollConfig};
use crate::error::CollectionError;
use crate::hec::Forwarder;
use crate::record::{Record, normalize_poll};
use crate::snmp::{SessionParams, SnmpConnector};

use super::messages::{CycleReport, DeviceFailure};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_MAX_CONCURRENCY: usize = 64;

#[derive(Debug, Clone)]
pub struct PollSettings {
    /// Upper bound for connect + query of a single device
    pub timeout: Duration,

    /// Devices queried at the same time
    pub max_concurrency: usize,

    /// Deliver an empty batch when no device answered
    pub deliver_empty: bool,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            deliver_empty: false,
        }
    }
}

impl PollSettings {
    pub fn from_config(config: &PollConfig) -> Self {
        Self {
            timeout: config.timeout(),
            max_concurrency: config.max_concurrency,
            deliver_empty: config.deliver_empty,
        }
    }
}

#[derive(Clone)]
pub struct PollOrchestrator {
    connector: Arc<dyn SnmpConnector>,
    forwarder: Forwarder,
    settings: PollSettings,
}

impl PollOrchestrator {
    pub fn new(
        connector: Arc<dyn SnmpConnector>,
        forwarder: Forwarder,
        mut settings: PollSettings,
    ) -> Self {
        // a semaphore without permits would stall every cycle
        settings.max_concurrency = settings.max_concurrency.max(1);

        Self {
            connector,
            forwarder,
            settings,
        }
    }

    /// Collect every device once and forward the results as one batch.
    ///
    /// Returns only after all collection tasks and the delivery finished.
    #[instrument(skip_all, fields(devices = devices.len()))]
    pub async fn run_cycle(&self, devices: &[Arc<DeviceDescriptor>]) -> CycleReport {
        let started_at = Utc::now();
        let start = Instant::now();

        let mut records = Vec::with_capacity(devices.len());
        let mut failures = vec![];

        for outcome in self.collect_all(devices).await {
            match outcome {
                Ok(record) => records.push(record),
                Err(failure) => {
                    error!(
                        device = %failure.name,
                        ip = %failure.ip,
                        error = %failure.error,
                        "polling error"
                    );
                    failures.push(failure);
                }
            }
        }

        debug!(?records, "poll data received");

        let collected = records.len();
        let mut delivered = 0;
        let mut delivery_error = None;

        if records.is_empty() && !self.settings.deliver_empty {
            warn!("no poll data collected, skipping delivery");
        } else {
            match self.forwarder.forward(records).await {
                Ok(count) => delivered = count,
                Err(e) => {
                    error!("sending data to Splunk failed: {e}");
                    delivery_error = Some(e.to_string());
                }
            }
        }

        let report = CycleReport {
            started_at,
            elapsed: start.elapsed(),
            collected,
            delivered,
            failures,
            delivery_error,
        };

        info!(
            started_at = %report.started_at,
            elapsed_ms = report.elapsed.as_millis() as u64,
            collected,
            delivered,
            failed = report.failed(),
            "poll cycle finished"
        );

        report
    }

    /// Fan out one task per device and wait for all of them.
    async fn collect_all(
        &self,
        devices: &[Arc<DeviceDescriptor>],
    ) -> Vec<Result<Record, DeviceFailure>> {
        let permits = Arc::new(Semaphore::new(self.settings.max_concurrency));
        let mut tasks = JoinSet::new();
        let mut spawned: HashMap<task::Id, Arc<DeviceDescriptor>> = HashMap::new();

        for device in devices {
            let task_device = Arc::clone(device);
            let connector = Arc::clone(&self.connector);
            let permits = Arc::clone(&permits);
            let timeout = self.settings.timeout;

            let handle = tasks.spawn(async move {
                // the semaphore is never closed, so acquiring only waits for a free slot
                let _permit = permits.acquire_owned().await;
                collect_device(connector.as_ref(), &task_device, timeout)
                    .await
                    .map_err(|error| DeviceFailure::new(&task_device, error))
            });
            spawned.insert(handle.id(), Arc::clone(device));
        }

        let mut outcomes = Vec::with_capacity(devices.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => match spawned.get(&e.id()) {
                    Some(device) => {
                        let error = CollectionError::Aborted(e.to_string());
                        outcomes.push(Err(DeviceFailure::new(device, error)));
                    }
                    None => error!("collection task of an unknown device failed: {e}"),
                },
            }
        }

        outcomes
    }
}

/// Query a single device and normalize its answer.
#[instrument(skip_all, fields(device = %device.name, ip = %device.ip))]
async fn collect_device(
    connector: &dyn SnmpConnector,
    device: &DeviceDescriptor,
    timeout: Duration,
) -> Result<Record, CollectionError> {
    let params = SessionParams::from_descriptor(device)?;
    let oids: Vec<String> = device.oids.keys().cloned().collect();

    let bindings = tokio::time::timeout(timeout, async {
        let session = connector.connect(&params, timeout).await?;
        session.get(&oids).await
    })
    .await
    .map_err(|_| CollectionError::Timeout(timeout))??;

    trace!(bindings = bindings.len(), "received values");

    Ok(normalize_poll(&device.ip, &device.name, &bindings, &device.oids))
}
