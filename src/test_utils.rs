//! Test utilities.
//!
//! Bounded-wait helpers for consuming from any backend, plus a way to get a
//! server URL no other test is using.

use std::time::Duration;

use uuid::Uuid;

use crate::delivery::Delivery;
use crate::interfaces::Consumer;

/// A simulated-server URL unique to the caller.
pub fn unique_url() -> String {
    format!("amqp://sim-{}:5672/%2f", Uuid::new_v4())
}

/// Next delivery, or `None` if the stream ended or nothing arrived within `wait`.
pub async fn next_delivery(consumer: &mut Consumer, wait: Duration) -> Option<Delivery> {
    tokio::time::timeout(wait, consumer.recv())
        .await
        .ok()
        .flatten()
}

/// Next delivery; panics if none arrives within `wait`.
pub async fn expect_delivery(consumer: &mut Consumer, wait: Duration) -> Delivery {
    match tokio::time::timeout(wait, consumer.recv()).await {
        Ok(Some(delivery)) => delivery,
        Ok(None) => panic!("consumer {} ended while waiting for a delivery", consumer.tag()),
        Err(_) => panic!("no delivery for consumer {} within {wait:?}", consumer.tag()),
    }
}

/// Panics if a delivery arrives within `wait`. A stream that ends counts as silent.
pub async fn expect_silence(consumer: &mut Consumer, wait: Duration) {
    if let Ok(Some(delivery)) = tokio::time::timeout(wait, consumer.recv()).await {
        panic!("unexpected delivery: {delivery:?}");
    }
}

/// Delivery body as UTF-8 text.
pub fn body_text(delivery: &Delivery) -> String {
    String::from_utf8_lossy(delivery.body()).into_owned()
}
