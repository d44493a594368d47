//! End-to-end tests: configuration → collection → HEC delivery

use std::collections::BTreeMap;
use std::time::Duration;

use pretty_assertions::assert_eq;
use snmp_bridge::{
    VarBinding, WireValue,
    actors::{listener::ListenerHandle, scheduler::SchedulerHandle},
    error::{CollectionError, NotificationError},
    hec::Forwarder,
    snmp::{InboundNotification, NotificationSource},
};
use tokio::sync::mpsc;

use crate::helpers::*;

#[tokio::test]
async fn test_partial_cycle_delivers_only_answering_devices() {
    let server = start_mock_hec(200, r#"{"text":"Success","code":0}"#).await;
    let config = create_test_config(
        &server,
        serde_json::json!([
            device_json("10.0.0.1", "core-a"),
            device_json("10.0.0.2", "core-b"),
            device_json("10.0.0.3", "core-c"),
        ]),
    );

    let connector = FakeConnector::new(&[
        ("10.0.0.1", FakeDevice::Answer { delay: Duration::ZERO }),
        ("10.0.0.2", FakeDevice::Silent),
        ("10.0.0.3", FakeDevice::Answer { delay: Duration::ZERO }),
    ]);
    let orchestrator = create_orchestrator(&config, connector, Duration::from_millis(200));

    let report = orchestrator
        .run_cycle(&config.device_descriptors().unwrap())
        .await;

    assert_eq!(report.collected, 2);
    assert_eq!(report.delivered, 2);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.failures[0].name, "core-b");
    assert_eq!(
        report.failures[0].error,
        CollectionError::Timeout(Duration::from_millis(200))
    );

    let bodies = received_bodies(&server).await;
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["index"], "network");
    assert_eq!(bodies[0]["sourcetype"], "snmp:poll");

    let events = bodies[0]["event"].as_array().unwrap();
    assert_eq!(events.len(), 2);

    let mut names: Vec<&str> = events.iter().map(|e| e["name"].as_str().unwrap()).collect();
    names.sort();
    assert_eq!(names, vec!["core-a", "core-c"]);

    for event in events {
        assert_eq!(event["values"]["uptime"], 17);
    }
}

#[tokio::test]
async fn test_hec_request_carries_token() {
    let server = start_mock_hec(200, "").await;
    let config = create_test_config(&server, serde_json::json!([device_json("10.0.0.1", "core-a")]));

    let connector = FakeConnector::new(&[("10.0.0.1", FakeDevice::Answer { delay: Duration::ZERO })]);
    let orchestrator = create_orchestrator(&config, connector, Duration::from_secs(1));
    orchestrator
        .run_cycle(&config.device_descriptors().unwrap())
        .await;

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);

    let auth = requests[0].headers.get("authorization").unwrap();
    assert_eq!(auth.to_str().unwrap(), format!("Splunk {HEC_TOKEN}"));

    let content_type = requests[0].headers.get("content-type").unwrap();
    assert_eq!(content_type.to_str().unwrap(), "application/json");
}

#[tokio::test]
async fn test_scheduler_poll_now_end_to_end() {
    let server = start_mock_hec(200, "").await;
    let config = create_test_config(
        &server,
        serde_json::json!([
            device_json("10.0.0.1", "core-a"),
            {
                "ip": "10.0.0.2",
                "oids": {
                    ".1.3.6.1.2.1.1.5.0": "sysName",
                    "1.3.6.1.2.1.2.1.0": "ifNumber"
                }
            }
        ]),
    );

    let connector = FakeConnector::new(&[
        ("10.0.0.1", FakeDevice::Answer { delay: Duration::ZERO }),
        ("10.0.0.2", FakeDevice::Answer { delay: Duration::ZERO }),
    ]);
    let orchestrator = create_orchestrator(&config, connector, Duration::from_secs(1));

    // long interval: only the immediate first tick and the explicit poll run
    let handle = SchedulerHandle::spawn(
        orchestrator,
        config.device_descriptors().unwrap(),
        Duration::from_secs(3600),
    );

    let report = handle.poll_now().await.unwrap();
    assert_eq!(report.collected, 2);
    assert!(report.delivery_error.is_none());

    handle.shutdown().await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), handle.stopped())
        .await
        .unwrap();

    let bodies = received_bodies(&server).await;
    let last = bodies.last().unwrap();
    let unnamed = last["event"]
        .as_array()
        .unwrap()
        .iter()
        .find(|event| event["ip"] == "10.0.0.2")
        .unwrap();

    // the name falls back to the address, labels are taken from the config
    assert_eq!(unnamed["name"], "10.0.0.2");
    let labels: Vec<&String> = unnamed["values"].as_object().unwrap().keys().collect();
    assert_eq!(labels, vec!["ifNumber", "sysName"]);
}

struct ChannelSource {
    rx: mpsc::Receiver<Result<InboundNotification, NotificationError>>,
}

#[async_trait::async_trait]
impl NotificationSource for ChannelSource {
    async fn recv(&mut self) -> Result<InboundNotification, NotificationError> {
        match self.rx.recv().await {
            Some(item) => item,
            None => std::future::pending().await,
        }
    }
}

#[tokio::test]
async fn test_notification_is_forwarded_with_configured_name() {
    let server = start_mock_hec(200, "").await;
    let config = create_test_config(&server, serde_json::json!([device_json("10.0.0.7", "edge-7")]));

    let (tx, rx) = mpsc::channel(4);
    let handle = ListenerHandle::spawn(
        ChannelSource { rx },
        Forwarder::from_config(&config.splunk).unwrap(),
        config.device_names(),
    );

    tx.send(Ok(InboundNotification {
        peer: "10.0.0.7:49152".parse().unwrap(),
        bindings: vec![
            VarBinding::new("1.3.6.1.2.1.1.3.0", WireValue::TimeTicks(4711)),
            VarBinding::new(
                "1.3.6.1.6.3.1.1.4.1.0",
                WireValue::ObjectIdentifier("1.3.6.1.6.3.1.1.5.4".to_string()),
            ),
            VarBinding::new("1.3.6.1.2.1.2.2.1.1.3", WireValue::Integer(3)),
        ],
    }))
    .await
    .unwrap();

    let mut bodies = vec![];
    for _ in 0..100 {
        bodies = received_bodies(&server).await;
        if !bodies.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(bodies.len(), 1);
    let event = &bodies[0]["event"][0];
    assert_eq!(event["ip"], "10.0.0.7");
    assert_eq!(event["name"], "edge-7");

    let expected: BTreeMap<String, serde_json::Value> = BTreeMap::from([
        ("oid".to_string(), serde_json::json!("1.3.6.1.2.1.2.2.1.1.3")),
        ("value".to_string(), serde_json::json!("3")),
    ]);
    let values: BTreeMap<String, serde_json::Value> =
        serde_json::from_value(event["values"].clone()).unwrap();
    assert_eq!(values, expected);

    handle.shutdown().await.unwrap();
}
