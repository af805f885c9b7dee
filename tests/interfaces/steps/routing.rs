//! Routing interface step definitions.

use std::time::Duration;

use cucumber::{given, then, when, World};
use warren::test_utils::{body_text, expect_delivery};
use warren::Options;

use crate::context::BrokerContext;

const WAIT: Duration = Duration::from_secs(1);

/// Test context for routing scenarios.
#[derive(Debug, World)]
#[world(init = Self::new)]
pub struct RoutingWorld {
    context: Option<BrokerContext>,
    last_error: Option<String>,
}

impl RoutingWorld {
    fn new() -> Self {
        Self {
            context: None,
            last_error: None,
        }
    }

    fn ctx(&self) -> &BrokerContext {
        self.context.as_ref().expect("Broker context not initialized")
    }

    fn record<T>(&mut self, result: warren::Result<T>) {
        self.last_error = result.err().map(|e| e.to_string());
    }
}

// ==========================================================================
// Background
// ==========================================================================

#[given("a running simulated broker")]
async fn given_running_broker(world: &mut RoutingWorld) {
    world.context = Some(BrokerContext::start().await);
}

// ==========================================================================
// Topology
// ==========================================================================

#[given(expr = "a {string} exchange {string}")]
async fn given_exchange(world: &mut RoutingWorld, kind: String, name: String) {
    world
        .ctx()
        .channel
        .exchange_declare(&name, &kind, &Options::new())
        .await
        .expect("Failed to declare exchange");
}

#[given(expr = "a queue {string}")]
async fn given_queue(world: &mut RoutingWorld, name: String) {
    world
        .ctx()
        .channel
        .queue_declare(&name, &Options::new())
        .await
        .expect("Failed to declare queue");
}

#[given(expr = "a queue {string} bound to {string} with key {string}")]
async fn given_bound_queue(world: &mut RoutingWorld, queue: String, exchange: String, key: String) {
    let channel = &world.ctx().channel;
    channel
        .queue_declare(&queue, &Options::new())
        .await
        .expect("Failed to declare queue");
    channel
        .queue_bind(&queue, &key, &exchange, &Options::new())
        .await
        .expect("Failed to bind queue");
}

#[given(expr = "exchange {string} bound to {string} with key {string}")]
async fn given_bound_exchange(
    world: &mut RoutingWorld,
    destination: String,
    source: String,
    key: String,
) {
    world
        .ctx()
        .channel
        .exchange_bind(&destination, &key, &source, &Options::new())
        .await
        .expect("Failed to bind exchange");
}

// ==========================================================================
// Actions
// ==========================================================================

#[when(expr = "I publish {string} to {string} with key {string}")]
async fn when_publish(world: &mut RoutingWorld, body: String, exchange: String, key: String) {
    let result = world
        .ctx()
        .channel
        .publish(&exchange, &key, body.as_bytes(), &Options::new())
        .await;
    world.record(result);
}

#[when(expr = "I unbind queue {string} from {string} with key {string}")]
async fn when_unbind(world: &mut RoutingWorld, queue: String, exchange: String, key: String) {
    world
        .ctx()
        .channel
        .queue_unbind(&queue, &key, &exchange, &Options::new())
        .await
        .expect("Failed to unbind queue");
}

#[when(expr = "I unbind exchange {string} from {string} with key {string}")]
async fn when_unbind_exchange(
    world: &mut RoutingWorld,
    destination: String,
    source: String,
    key: String,
) {
    world
        .ctx()
        .channel
        .exchange_unbind(&destination, &key, &source, &Options::new())
        .await
        .expect("Failed to unbind exchange");
}

#[when(expr = "I bind queue {string} to {string} with key {string}")]
async fn when_bind(world: &mut RoutingWorld, queue: String, exchange: String, key: String) {
    let result = world
        .ctx()
        .channel
        .queue_bind(&queue, &key, &exchange, &Options::new())
        .await;
    world.record(result);
}

#[when(expr = "I delete queue {string}")]
async fn when_delete(world: &mut RoutingWorld, queue: String) {
    world
        .ctx()
        .channel
        .queue_delete(&queue, &Options::new())
        .await
        .expect("Failed to delete queue");
}

#[when(expr = "I declare a {string} exchange {string} with option {string} set to {string}")]
async fn when_declare_with_option(
    world: &mut RoutingWorld,
    kind: String,
    name: String,
    key: String,
    value: String,
) {
    let opts = Options::new().with(key, value);
    let result = world
        .ctx()
        .channel
        .exchange_declare(&name, &kind, &opts)
        .await;
    world.record(result);
}

// ==========================================================================
// Outcomes
// ==========================================================================

#[then(expr = "queue {string} receives {string}")]
async fn then_queue_receives(world: &mut RoutingWorld, queue: String, body: String) {
    let mut consumer = world
        .ctx()
        .channel
        .consume(&queue, "", &Options::new().with("autoAck", true))
        .await
        .expect("Failed to consume");
    let delivery = expect_delivery(&mut consumer, WAIT).await;
    assert_eq!(body_text(&delivery), body);
}

#[then(expr = "queue {string} has {int} ready messages")]
async fn then_queue_depth(world: &mut RoutingWorld, queue: String, count: u32) {
    let info = world
        .ctx()
        .channel
        .queue_declare(&queue, &Options::new())
        .await
        .expect("Failed to inspect queue");
    assert_eq!(info.messages, count, "ready messages in {queue}");
}

#[then(expr = "{int} message(s) was/were unroutable")]
async fn then_unroutable(world: &mut RoutingWorld, count: u64) {
    assert_eq!(world.ctx().broker().unroutable_count(), count);
}

#[then(expr = "the operation fails with {string}")]
async fn then_fails_with(world: &mut RoutingWorld, message: String) {
    assert_eq!(world.last_error.as_deref(), Some(message.as_str()));
}
