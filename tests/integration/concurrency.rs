//! Parallelism of a poll cycle and serialization of cycles

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use futures::future::join_all;
use pretty_assertions::assert_eq;
use snmp_bridge::{
    actors::{
        poller::{PollOrchestrator, PollSettings},
        scheduler::SchedulerHandle,
    },
    hec::Forwarder,
};

use crate::helpers::*;

fn devices_json(count: usize) -> serde_json::Value {
    serde_json::Value::Array(
        (1..=count)
            .map(|i| device_json(&format!("10.0.2.{i}"), &format!("switch-{i}")))
            .collect(),
    )
}

fn slow_devices(count: usize, delay: Duration) -> Vec<(String, FakeDevice)> {
    (1..=count)
        .map(|i| (format!("10.0.2.{i}"), FakeDevice::Answer { delay }))
        .collect()
}

fn connector_for(devices: &[(String, FakeDevice)]) -> FakeConnector {
    let devices: Vec<(&str, FakeDevice)> = devices
        .iter()
        .map(|(ip, device)| (ip.as_str(), device.clone()))
        .collect();
    FakeConnector::new(&devices)
}

#[tokio::test]
async fn test_devices_are_polled_in_parallel() {
    let server = start_mock_hec(200, "").await;
    let config = create_test_config(&server, devices_json(10));

    let connector = connector_for(&slow_devices(10, Duration::from_millis(200)));
    let peak = connector.peak.clone();
    let orchestrator = create_orchestrator(&config, connector, Duration::from_secs(2));

    let start = Instant::now();
    let report = orchestrator
        .run_cycle(&config.device_descriptors().unwrap())
        .await;
    let elapsed = start.elapsed();

    assert_eq!(report.collected, 10);
    // sequential polling would take two seconds
    assert!(elapsed < Duration::from_secs(1), "cycle took {elapsed:?}");
    assert_eq!(peak.load(Ordering::SeqCst), 10);
}

#[tokio::test]
async fn test_silent_device_does_not_delay_cycle_beyond_timeout() {
    let server = start_mock_hec(200, "").await;
    let config = create_test_config(&server, devices_json(3));

    let mut devices = slow_devices(3, Duration::from_millis(10));
    devices[1].1 = FakeDevice::Silent;
    let orchestrator = create_orchestrator(&config, connector_for(&devices), Duration::from_millis(300));

    let start = Instant::now();
    let report = orchestrator
        .run_cycle(&config.device_descriptors().unwrap())
        .await;

    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(report.collected, 2);
    assert_eq!(report.failures[0].name, "switch-2");
}

#[tokio::test]
async fn test_max_concurrency_caps_parallel_sessions() {
    let server = start_mock_hec(200, "").await;
    let config = create_test_config(&server, devices_json(8));

    let connector = connector_for(&slow_devices(8, Duration::from_millis(50)));
    let peak = connector.peak.clone();

    let orchestrator = PollOrchestrator::new(
        Arc::new(connector),
        Forwarder::from_config(&config.splunk).unwrap(),
        PollSettings {
            timeout: Duration::from_secs(2),
            max_concurrency: 3,
            deliver_empty: false,
        },
    );

    let report = orchestrator
        .run_cycle(&config.device_descriptors().unwrap())
        .await;

    assert_eq!(report.collected, 8);
    assert!(peak.load(Ordering::SeqCst) <= 3);
}

#[tokio::test]
async fn test_requested_cycles_never_overlap() {
    let server = start_mock_hec(200, "").await;
    let config = create_test_config(&server, devices_json(4));

    let connector = connector_for(&slow_devices(4, Duration::from_millis(50)));
    let peak = connector.peak.clone();
    let orchestrator = create_orchestrator(&config, connector, Duration::from_secs(2));

    let handle = SchedulerHandle::spawn(
        orchestrator,
        config.device_descriptors().unwrap(),
        Duration::from_secs(3600),
    );

    let reports = join_all((0..3).map(|_| handle.poll_now())).await;

    for report in reports {
        assert_eq!(report.unwrap().collected, 4);
    }
    // one cycle at a time: never more sessions than devices
    assert_eq!(peak.load(Ordering::SeqCst), 4);

    handle.shutdown().await.unwrap();
}
