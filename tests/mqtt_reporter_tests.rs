//! The reporter driving the real MQTT client against the mock broker.

use anomaly_edge::decision::Verdict;
use anomaly_edge::reporter::{ConnectionState, PublishError, Reporter};
use mqtt_protocol::{MockBroker, MockBrokerConfig, MqttClient, MqttOptions};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

const TOPIC: &str = "machine/audio/inference";

fn client_for(port: u16) -> MqttClient {
    let mut options = MqttOptions::new("127.0.0.1", port, "edge-anomaly-monitor");
    options.connect_timeout = Duration::from_secs(1);
    MqttClient::new(options)
}

#[test]
fn test_reporter_retries_refused_connections_then_publishes() {
    env_logger::try_init().ok();

    let broker = MockBroker::new(MockBrokerConfig {
        refuse_first: 2,
        ..Default::default()
    })
    .start_background()
    .expect("Failed to start mock broker");

    let mut reporter = Reporter::new(
        Box::new(client_for(broker.port)),
        TOPIC,
        Duration::from_millis(20),
    );

    assert!(reporter.ensure_connected());
    assert_eq!(reporter.state(), ConnectionState::Connected);
    assert_eq!(broker.connect_attempts(), 3);

    reporter
        .publish(&Verdict::from_scores(0.82, 0.10))
        .expect("Publish failed");

    let messages = broker.wait_for_messages(1, Duration::from_secs(2));
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].client_id, "edge-anomaly-monitor");
    assert_eq!(messages[0].topic, TOPIC);
    assert_eq!(
        messages[0].payload_str(),
        r#"{"label":"anomalous","score":0.820}"#
    );
}

#[test]
fn test_one_message_per_publish() {
    env_logger::try_init().ok();

    let broker = MockBroker::new(MockBrokerConfig::default())
        .start_background()
        .expect("Failed to start mock broker");

    let mut reporter = Reporter::new(
        Box::new(client_for(broker.port)),
        TOPIC,
        Duration::from_millis(20),
    );

    reporter.publish(&Verdict::from_scores(0.40, 0.40)).unwrap();
    reporter.service();
    reporter.publish(&Verdict::from_scores(0.95, 0.05)).unwrap();

    let messages = broker.wait_for_messages(2, Duration::from_secs(2));
    let payloads: Vec<&str> = messages.iter().map(|m| m.payload_str()).collect();
    assert_eq!(
        payloads,
        vec![
            r#"{"label":"normal","score":0.400}"#,
            r#"{"label":"anomalous","score":0.950}"#
        ]
    );
    assert_eq!(broker.connect_attempts(), 1);
}

#[test]
fn test_service_detects_lost_broker() {
    env_logger::try_init().ok();

    let mut broker = MockBroker::new(MockBrokerConfig::default())
        .start_background()
        .expect("Failed to start mock broker");

    let mut reporter = Reporter::new(
        Box::new(client_for(broker.port)),
        TOPIC,
        Duration::from_millis(20),
    );
    reporter.ensure_connected();
    assert_eq!(reporter.state(), ConnectionState::Connected);

    broker.stop();

    // The closed socket shows up on one of the next pumps
    let deadline = std::time::Instant::now() + Duration::from_secs(3);
    while reporter.state() == ConnectionState::Connected && std::time::Instant::now() < deadline {
        reporter.service();
        std::thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(reporter.state(), ConnectionState::Disconnected);
}

#[test]
fn test_publish_after_broker_restart_reconnects_first() {
    env_logger::try_init().ok();

    let mut first = MockBroker::new(MockBrokerConfig::default())
        .start_background()
        .expect("Failed to start mock broker");
    let port = first.port;

    let mut reporter = Reporter::new(
        Box::new(client_for(port)),
        TOPIC,
        Duration::from_millis(20),
    );
    reporter.ensure_connected();

    // Session dies while nothing is pumping the client
    first.stop();
    std::thread::sleep(Duration::from_millis(300));

    let second = MockBroker::new(MockBrokerConfig {
        bind_address: format!("127.0.0.1:{}", port),
        ..Default::default()
    })
    .start_background()
    .expect("Failed to restart mock broker");

    reporter
        .publish(&Verdict::from_scores(0.82, 0.10))
        .expect("Publish failed");

    let messages = second.wait_for_messages(1, Duration::from_secs(2));
    assert_eq!(messages.len(), 1);
    assert_eq!(
        messages[0].payload_str(),
        r#"{"label":"anomalous","score":0.820}"#
    );
    assert_eq!(second.connect_attempts(), 1);
    assert!(first.messages().is_empty());
    assert_eq!(reporter.state(), ConnectionState::Connected);
}

#[test]
fn test_publish_to_vanished_broker_is_not_reported_as_sent() {
    env_logger::try_init().ok();

    let mut broker = MockBroker::new(MockBrokerConfig::default())
        .start_background()
        .expect("Failed to start mock broker");

    let shutdown = Arc::new(AtomicBool::new(false));
    let mut reporter = Reporter::new(
        Box::new(client_for(broker.port)),
        TOPIC,
        Duration::from_millis(20),
    )
    .with_shutdown(shutdown.clone());
    reporter.ensure_connected();
    assert_eq!(reporter.state(), ConnectionState::Connected);

    broker.stop();
    std::thread::sleep(Duration::from_millis(300));
    // Lets the reconnect loop give up after one attempt
    shutdown.store(true, std::sync::atomic::Ordering::SeqCst);

    let result = reporter.publish(&Verdict::from_scores(0.82, 0.10));
    assert!(matches!(result, Err(PublishError::NotConnected)));
    assert_eq!(reporter.state(), ConnectionState::Disconnected);
    assert!(broker.messages().is_empty());
}
