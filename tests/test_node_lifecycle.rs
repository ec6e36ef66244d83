//! Node lifecycle tests driven through the full run loop
//!
//! Covers presence (ALIVE, DEAD and the will), the birth certificate against
//! what the node actually subscribes and publishes, remote commands and the
//! sampling interval.


use mqtt_presence::node::{ExitReason, NodeSettings};
use mqtt_presence::sensors::SensorReading;
use mqtt_presence::testing::mocks::{MockSensorSource, MockTransport};
use mqtt_presence::transport::{QoS, TransportEvent};
use mqtt_presence::ConnectionState;
use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;
use test_helpers::*;

fn parse_birth(payload: &[u8]) -> Vec<Value> {
    let value: Value = serde_json::from_slice(payload).unwrap();
    value.as_array().unwrap().clone()
}

fn topics_with_mode(birth: &[Value], mode: &str) -> BTreeSet<String> {
    birth
        .iter()
        .filter(|d| {
            d["modes"]
                .as_array()
                .unwrap()
                .iter()
                .any(|m| m.as_str() == Some(mode))
        })
        .map(|d| d["topic"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_scan_rate_and_rebirth_scenario() {
    let transport = MockTransport::new();
    let mut node = test_node(
        transport.clone(),
        MockSensorSource::with_readings(sample_readings()),
    );
    let handle = node.handle();
    node.start().await.unwrap();
    let task = tokio::spawn(async move { node.run().await });

    let births = wait_for_publishes(&transport, &topic("BIRTH"), 1).await;
    assert_eq!(births.len(), 1);
    assert_eq!(handle.scan_rate().as_secs_f64(), 1.0);

    transport
        .inject_message(&topic("property/scan_rate/set"), b"5", false)
        .await;
    assert!(wait_for_scan_rate(&handle, 5.0).await);

    transport
        .inject_message(&topic("property/scan_rate/set"), b"0.5", false)
        .await;
    transport
        .inject_message(&topic("command/rebirth"), b"", false)
        .await;

    // birth, "5" and rebirth each publish the scan rate
    let scan_rates = wait_for_publishes(&transport, &topic("property/scan_rate"), 3).await;
    assert_eq!(payloads(&scan_rates), vec!["1.0", "5.0", "5.0"]);
    assert_eq!(handle.scan_rate().as_secs_f64(), 5.0);

    let births = transport.published_on(&topic("BIRTH")).await;
    assert_eq!(births.len(), 2);
    assert_eq!(
        parse_birth(&births[0].payload),
        parse_birth(&births[1].payload)
    );

    handle.shutdown();
    let exit = task.await.unwrap().unwrap();
    assert_eq!(exit, ExitReason::LocalShutdown);
}

#[tokio::test]
async fn test_birth_matches_subscriptions_and_publishes() {
    let transport = MockTransport::new();
    let mut node = test_node(
        transport.clone(),
        MockSensorSource::with_readings(sample_readings()),
    );
    let handle = node.handle();
    node.start().await.unwrap();
    let task = tokio::spawn(async move { node.run().await });

    let births = wait_for_publishes(&transport, &topic("BIRTH"), 1).await;
    let birth = parse_birth(&births[0].payload);
    assert!(births[0].retain);
    assert_eq!(births[0].qos, QoS::AtLeastOnce);

    // Values for every advertised pub topic follow the birth
    wait_for_publishes(&transport, &topic("property/in0"), 1).await;

    let subscribed: BTreeSet<String> = transport.subscriptions().await.into_iter().collect();
    assert_eq!(topics_with_mode(&birth, "sub"), subscribed);

    let published: BTreeSet<String> = transport
        .published()
        .await
        .into_iter()
        .map(|m| m.topic)
        .collect();
    for pub_topic in topics_with_mode(&birth, "pub") {
        assert!(published.contains(&pub_topic), "no publish on {pub_topic}");
    }

    let fan = birth
        .iter()
        .find(|d| d["topic"] == topic("property/fan1").as_str())
        .unwrap();
    assert_eq!(fan["type"], "numeric");
    assert_eq!(fan["quantity"], "rate");
    assert_eq!(fan["unit"], "rotations_per_minute");

    handle.shutdown();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_presence_alive_then_dead() {
    let transport = MockTransport::new();
    let mut node = test_node(transport.clone(), MockSensorSource::new());
    let mut handle = node.handle();
    node.start().await.unwrap();

    let will = transport.last_will().unwrap();
    assert_eq!(will.topic, topic("STATE"));
    assert_eq!(will.payload, b"DEAD");
    assert!(will.retain);

    let task = tokio::spawn(async move { node.run().await });
    assert!(handle.wait_for_state(ConnectionState::Online).await);

    transport
        .inject_message(&topic("command/shutdown"), b"", false)
        .await;
    let exit = task.await.unwrap().unwrap();
    assert_eq!(exit, ExitReason::RemoteShutdown);
    assert!(!handle.is_alive());
    assert_eq!(handle.connection_state(), ConnectionState::Offline);

    let states = transport.published_on(&topic("STATE")).await;
    assert_eq!(payloads(&states), vec!["ALIVE", "DEAD"]);
    assert!(states.iter().all(|m| m.retain && m.qos == QoS::AtLeastOnce));
    assert_eq!(transport.disconnect_count(), 1);
}

#[tokio::test]
async fn test_no_dead_publish_when_disabled() {
    let transport = MockTransport::new();
    let settings = NodeSettings {
        publish_dead_on_exit: false,
        ..Default::default()
    };
    let mut node = test_node_with_settings(transport.clone(), MockSensorSource::new(), settings);
    let mut handle = node.handle();
    node.start().await.unwrap();
    let task = tokio::spawn(async move { node.run().await });
    assert!(handle.wait_for_state(ConnectionState::Online).await);

    handle.shutdown();
    assert_eq!(task.await.unwrap().unwrap(), ExitReason::LocalShutdown);

    let states = transport.published_on(&topic("STATE")).await;
    assert_eq!(payloads(&states), vec!["ALIVE"]);
    assert_eq!(transport.disconnect_count(), 1);
}

#[tokio::test]
async fn test_bad_commands_keep_node_running() {
    let transport = MockTransport::new();
    let mut node = test_node(transport.clone(), MockSensorSource::new());
    let handle = node.handle();
    node.start().await.unwrap();
    let task = tokio::spawn(async move { node.run().await });
    wait_for_publishes(&transport, &topic("BIRTH"), 1).await;

    transport
        .inject_message(&topic("property/scan_rate/set"), b"not-a-number", false)
        .await;
    transport
        .inject_message(&topic("command/unknown"), b"", false)
        .await;
    transport
        .inject_message("elsewhere/command/shutdown", b"", false)
        .await;
    transport
        .inject_message(&topic("command/rebirth"), b"", false)
        .await;

    let births = wait_for_publishes(&transport, &topic("BIRTH"), 2).await;
    assert_eq!(births.len(), 2);
    assert!(handle.is_alive());
    assert_eq!(handle.scan_rate().as_secs_f64(), 1.0);

    handle.shutdown();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_reconnect_announces_again() {
    let transport = MockTransport::new();
    let mut node = test_node(transport.clone(), MockSensorSource::new());
    let mut handle = node.handle();
    node.start().await.unwrap();
    let task = tokio::spawn(async move { node.run().await });
    assert!(handle.wait_for_state(ConnectionState::Online).await);

    transport
        .inject(TransportEvent::Disconnected {
            reason: "connection reset".to_string(),
        })
        .await;
    assert!(handle.wait_for_state(ConnectionState::Offline).await);

    transport
        .inject(TransportEvent::Reconnecting { attempt: 1 })
        .await;
    transport.inject(TransportEvent::Connected).await;
    assert!(handle.wait_for_state(ConnectionState::Online).await);

    let births = wait_for_publishes(&transport, &topic("BIRTH"), 2).await;
    assert_eq!(births.len(), 2);
    let states = transport.published_on(&topic("STATE")).await;
    assert_eq!(payloads(&states), vec!["ALIVE", "ALIVE"]);

    handle.shutdown();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_transport_closed_ends_run() {
    let transport = MockTransport::new();
    let mut node = test_node(transport.clone(), MockSensorSource::new());
    let mut handle = node.handle();
    node.start().await.unwrap();
    let task = tokio::spawn(async move { node.run().await });
    assert!(handle.wait_for_state(ConnectionState::Online).await);

    transport.close_events().await;
    assert_eq!(task.await.unwrap().unwrap(), ExitReason::TransportClosed);
}

#[tokio::test(start_paused = true)]
async fn test_sampling_follows_new_scan_rate() {
    let transport = MockTransport::new();
    let sensors = MockSensorSource::with_readings(sample_readings());
    let mut node = test_node(transport.clone(), sensors);
    let handle = node.handle();
    node.start().await.unwrap();
    let task = tokio::spawn(async move { node.run().await });

    wait_for_publishes(&transport, &topic("BIRTH"), 1).await;
    transport
        .inject_message(&topic("property/scan_rate/set"), b"5", false)
        .await;
    assert!(wait_for_scan_rate(&handle, 5.0).await);

    // Only the value published with the birth so far
    tokio::time::sleep(Duration::from_millis(4500)).await;
    assert_eq!(
        transport.published_on(&topic("property/fan1")).await.len(),
        1
    );

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(
        transport.published_on(&topic("property/fan1")).await.len(),
        2
    );

    handle.shutdown();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_sampling_at_default_rate() {
    let transport = MockTransport::new();
    let sensors = MockSensorSource::with_readings(sample_readings());
    let mut node = test_node(transport.clone(), sensors.clone());
    let handle = node.handle();
    node.start().await.unwrap();
    let task = tokio::spawn(async move { node.run().await });

    wait_for_publishes(&transport, &topic("BIRTH"), 1).await;
    tokio::time::sleep(Duration::from_millis(3500)).await;

    let values = transport.published_on(&topic("property/in0")).await;
    assert_eq!(values.len(), 4);
    assert!(values.iter().all(|m| !m.retain));
    assert_eq!(values[0].payload_str(), "0.92");

    // A failing sensor read skips the sample but the node keeps going
    sensors.set_failing(true);
    tokio::time::sleep(Duration::from_millis(2000)).await;
    assert_eq!(
        transport.published_on(&topic("property/in0")).await.len(),
        4
    );
    assert!(handle.is_alive());

    handle.shutdown();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_samples_follow_changing_readings() {
    let transport = MockTransport::new();
    let sensors = MockSensorSource::with_readings(sample_readings());
    let mut node = test_node(transport.clone(), sensors.clone());
    let handle = node.handle();
    node.start().await.unwrap();
    let task = tokio::spawn(async move { node.run().await });

    wait_for_publishes(&transport, &topic("BIRTH"), 1).await;
    sensors
        .set_readings(vec![SensorReading::new("fan1", 3100.0, "RPM")])
        .await;

    let values = wait_for_publishes(&transport, &topic("property/fan1"), 2).await;
    assert_eq!(payloads(&values), vec!["2650.0", "3100.0"]);
    // The certificate only changes on the next birth
    assert_eq!(transport.published_on(&topic("BIRTH")).await.len(), 1);

    handle.shutdown();
    task.await.unwrap().unwrap();
}
