use super::*;
use crate::interfaces::Connection;
use crate::options::OptionValue;
use crate::test_utils::unique_url;
use serial_test::serial;
use std::io::Write;

const SAMPLE: &str = r#"
broker:
  type: simulated
  url: amqp://orders-sim:5672/%2f
  queue_capacity: 16
topology:
  exchanges:
    - name: orders
      kind: topic
      options:
        durable: true
  queues:
    - name: order-audit
      options:
        autoDelete: false
        args:
          x-message-ttl: 60000
  bindings:
    - source: orders
      destination: order-audit
      routing_key: "order.#"
"#;

#[test]
fn test_config_default() {
    let config = Config::default();
    assert_eq!(config.broker.broker_type, BrokerType::Simulated);
    assert_eq!(config.broker.url, "amqp://localhost:5672/%2f");
    assert_eq!(config.broker.queue_capacity, 1024);
    assert!(config.broker.start_embedded);
    assert!(config.topology.is_empty());
}

#[test]
fn test_from_yaml() {
    let config = Config::from_yaml(SAMPLE).unwrap();
    assert_eq!(config.broker.url, "amqp://orders-sim:5672/%2f");
    assert_eq!(config.broker.queue_capacity, 16);

    let exchange = &config.topology.exchanges[0];
    assert_eq!(exchange.name, "orders");
    assert_eq!(exchange.kind, "topic");
    assert_eq!(exchange.options.get("durable"), Some(&OptionValue::Bool(true)));

    let binding = &config.topology.bindings[0];
    assert_eq!(binding.destination_type, DestinationType::Queue);
    assert_eq!(binding.routing_key, "order.#");
}

#[test]
fn test_from_yaml_rejects_unknown_broker_type() {
    let err = Config::from_yaml("broker:\n  type: carrier-pigeon\n").unwrap_err();
    assert!(matches!(err, BrokerError::Config(_)));
}

#[test]
fn test_exchange_kind_defaults_to_direct() {
    let config = Config::from_yaml("topology:\n  exchanges:\n    - name: e\n").unwrap();
    assert_eq!(config.topology.exchanges[0].kind, "direct");
}

#[test]
#[serial]
fn test_load_from_path() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(SAMPLE.as_bytes()).unwrap();

    let config = Config::load(file.path().to_str()).unwrap();
    assert_eq!(config.broker.url, "amqp://orders-sim:5672/%2f");
    assert_eq!(config.topology.queues[0].name, "order-audit");
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(SAMPLE.as_bytes()).unwrap();

    std::env::set_var("WARREN__BROKER__URL", "amqp://override:5672/%2f");
    std::env::set_var("WARREN__BROKER__QUEUE_CAPACITY", "8");
    let result = Config::load(file.path().to_str());
    std::env::remove_var("WARREN__BROKER__URL");
    std::env::remove_var("WARREN__BROKER__QUEUE_CAPACITY");

    let config = result.unwrap();
    assert_eq!(config.broker.url, "amqp://override:5672/%2f");
    assert_eq!(config.broker.queue_capacity, 8);
}

#[test]
#[serial]
fn test_load_missing_required_file_fails() {
    let err = Config::load(Some("/nonexistent/warren.yaml")).unwrap_err();
    assert!(matches!(err, BrokerError::Config(_)));
}

#[tokio::test]
async fn test_connect_starts_embedded_server() {
    let config = Config::for_test(unique_url());
    let conn = connect(&config.broker).await.unwrap();
    let ch = conn.channel().await.unwrap();
    let info = ch
        .queue_declare("", &crate::options::Options::new())
        .await
        .unwrap();
    assert!(info.name.starts_with("amq.gen-"));
}

#[tokio::test]
async fn test_connect_without_embedded_server_is_refused() {
    let mut config = Config::for_test(unique_url());
    config.broker.start_embedded = false;
    let err = connect(&config.broker).await.err().unwrap();
    assert!(matches!(err, BrokerError::ConnectionRefused(_)));
}

#[cfg(not(feature = "amqp"))]
#[tokio::test]
async fn test_amqp_requires_feature() {
    let mut config = Config::for_test(unique_url());
    config.broker.broker_type = BrokerType::Amqp;
    let err = connect(&config.broker).await.err().unwrap();
    assert!(matches!(err, BrokerError::Config(_)));
}
