//! Failure handling across a whole poll cycle

use std::sync::atomic::Ordering;
use std::time::Duration;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use snmp_bridge::error::CollectionError;

use crate::helpers::*;

#[tokio::test]
async fn test_all_devices_failing_skips_delivery() {
    let server = start_mock_hec(200, "").await;
    let config = create_test_config(
        &server,
        serde_json::json!([
            device_json("10.0.1.1", "refusing"),
            device_json("10.0.1.2", "broken"),
        ]),
    );

    let connector = FakeConnector::new(&[
        ("10.0.1.1", FakeDevice::RefuseConnect),
        ("10.0.1.2", FakeDevice::FailQuery),
    ]);
    let orchestrator = create_orchestrator(&config, connector, Duration::from_secs(1));

    let report = orchestrator
        .run_cycle(&config.device_descriptors().unwrap())
        .await;

    assert_eq!(report.collected, 0);
    assert_eq!(report.delivered, 0);
    assert_eq!(report.failed(), 2);
    assert!(report.delivery_error.is_none());
    assert!(received_bodies(&server).await.is_empty());
}

#[tokio::test]
async fn test_hec_error_is_reported_not_retried() {
    let server = start_mock_hec(500, "internal error").await;
    let config = create_test_config(&server, serde_json::json!([device_json("10.0.1.1", "core")]));

    let connector = FakeConnector::new(&[("10.0.1.1", FakeDevice::Answer { delay: Duration::ZERO })]);
    let orchestrator = create_orchestrator(&config, connector, Duration::from_secs(1));
    let devices = config.device_descriptors().unwrap();

    let report = orchestrator.run_cycle(&devices).await;

    assert_eq!(report.collected, 1);
    assert_eq!(report.delivered, 0);
    assert_eq!(
        report.delivery_error.as_deref(),
        Some("POST request failed with status 500 and message: internal error")
    );
    assert_eq!(server.received_requests().await.unwrap().len(), 1);

    // the next cycle starts from scratch
    let report = orchestrator.run_cycle(&devices).await;
    assert_eq!(report.collected, 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_unreachable_hec_is_reported() {
    let server = start_mock_hec(200, "").await;
    let mut config = create_test_config(&server, serde_json::json!([device_json("10.0.1.1", "core")]));
    // nothing listens on the discard port
    config.splunk.splunk_hec_url = "http://127.0.0.1:9/services/collector".to_string();

    let connector = FakeConnector::new(&[("10.0.1.1", FakeDevice::Answer { delay: Duration::ZERO })]);
    let orchestrator = create_orchestrator(&config, connector, Duration::from_secs(1));

    let report = orchestrator
        .run_cycle(&config.device_descriptors().unwrap())
        .await;

    assert_eq!(report.collected, 1);
    assert!(report.delivery_error.unwrap().starts_with("HTTP request failed"));
}

#[tokio::test]
async fn test_invalid_port_fails_only_that_device() {
    let server = start_mock_hec(200, "").await;
    let config = create_test_config(
        &server,
        serde_json::json!([
            {
                "ip": "10.0.1.1",
                "name": "typo",
                "snmp_port": "16x",
                "oids": { "1.3.6.1.2.1.1.3.0": "uptime" }
            },
            device_json("10.0.1.2", "fine"),
        ]),
    );

    let connector = FakeConnector::new(&[
        ("10.0.1.1", FakeDevice::Answer { delay: Duration::ZERO }),
        ("10.0.1.2", FakeDevice::Answer { delay: Duration::ZERO }),
    ]);
    let connects = connector.connects.clone();
    let orchestrator = create_orchestrator(&config, connector, Duration::from_secs(1));

    let report = orchestrator
        .run_cycle(&config.device_descriptors().unwrap())
        .await;

    assert_eq!(report.collected, 1);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.failures[0].name, "typo");
    assert_matches!(&report.failures[0].error, CollectionError::InvalidPort(port) if port == "16x");

    // the broken device never reached the network
    assert_eq!(connects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unsupported_version_fails_only_that_device() {
    let server = start_mock_hec(200, "").await;
    let config = create_test_config(
        &server,
        serde_json::json!([
            {
                "ip": "10.0.1.1",
                "name": "legacy",
                "snmp_version": "1",
                "oids": { "1.3.6.1.2.1.1.3.0": "uptime" }
            },
            device_json("10.0.1.2", "modern"),
        ]),
    );

    let connector = FakeConnector::new(&[
        ("10.0.1.1", FakeDevice::Answer { delay: Duration::ZERO }),
        ("10.0.1.2", FakeDevice::Answer { delay: Duration::ZERO }),
    ]);
    let orchestrator = create_orchestrator(&config, connector, Duration::from_secs(1));

    let report = orchestrator
        .run_cycle(&config.device_descriptors().unwrap())
        .await;

    assert_eq!(report.collected, 1);
    assert_matches!(
        &report.failures[..],
        [failure] if failure.name == "legacy"
            && failure.error == CollectionError::UnsupportedVersion("1".to_string())
    );

    let bodies = received_bodies(&server).await;
    assert_eq!(bodies[0]["event"][0]["name"], "modern");
}
