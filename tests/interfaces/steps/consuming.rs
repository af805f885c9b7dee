//! Consuming interface step definitions.

use std::collections::HashMap;
use std::time::Duration;

use cucumber::{given, then, when, World};
use warren::interfaces::{Connection, Consumer};
use warren::test_utils::{body_text, expect_delivery, expect_silence};
use warren::{Delivery, Options};

use crate::context::BrokerContext;

const WAIT: Duration = Duration::from_secs(1);
const QUIET: Duration = Duration::from_millis(100);

/// Test context for consuming scenarios.
#[derive(Debug, World)]
#[world(init = Self::new)]
pub struct ConsumingWorld {
    context: Option<BrokerContext>,
    consumers: HashMap<String, Consumer>,
    /// Most recent delivery each consumer received.
    received: HashMap<String, Delivery>,
    discarded: Option<u32>,
    last_error: Option<String>,
}

impl ConsumingWorld {
    fn new() -> Self {
        Self {
            context: None,
            consumers: HashMap::new(),
            received: HashMap::new(),
            discarded: None,
            last_error: None,
        }
    }

    fn ctx(&self) -> &BrokerContext {
        self.context.as_ref().expect("Broker context not initialized")
    }

    fn record<T>(&mut self, result: warren::Result<T>) {
        self.last_error = result.err().map(|e| e.to_string());
    }

    async fn subscribe(&mut self, name: &str, queue: &str, opts: Options) {
        let consumer = self
            .ctx()
            .channel
            .consume(queue, name, &opts)
            .await
            .expect("Failed to consume");
        self.consumers.insert(name.to_string(), consumer);
    }

    fn consumer(&mut self, name: &str) -> &mut Consumer {
        self.consumers
            .get_mut(name)
            .unwrap_or_else(|| panic!("No consumer named {name}"))
    }

    fn last_delivery(&self, name: &str) -> &Delivery {
        self.received
            .get(name)
            .unwrap_or_else(|| panic!("Consumer {name} has received nothing"))
    }
}

// ==========================================================================
// Background
// ==========================================================================

#[given("a running simulated broker")]
async fn given_running_broker(world: &mut ConsumingWorld) {
    world.context = Some(BrokerContext::start().await);
}

#[given(expr = "a queue {string}")]
async fn given_queue(world: &mut ConsumingWorld, name: String) {
    world
        .ctx()
        .channel
        .queue_declare(&name, &Options::new())
        .await
        .expect("Failed to declare queue");
}

// ==========================================================================
// Consumers
// ==========================================================================

#[given(expr = "prefetch {int}")]
async fn given_prefetch(world: &mut ConsumingWorld, count: u16) {
    world
        .ctx()
        .channel
        .qos(count, 0, false)
        .await
        .expect("Failed to set qos");
}

#[given(expr = "consumer {string} on queue {string} with auto-ack")]
async fn given_auto_ack_consumer(world: &mut ConsumingWorld, name: String, queue: String) {
    world
        .subscribe(&name, &queue, Options::new().with("autoAck", true))
        .await;
}

#[given(expr = "consumer {string} on queue {string} with manual ack")]
async fn given_manual_ack_consumer(world: &mut ConsumingWorld, name: String, queue: String) {
    world.subscribe(&name, &queue, Options::new()).await;
}

#[given(expr = "consumer {string} on queue {string} exclusively")]
async fn given_exclusive_consumer(world: &mut ConsumingWorld, name: String, queue: String) {
    world
        .subscribe(
            &name,
            &queue,
            Options::new().with("autoAck", true).with("exclusive", true),
        )
        .await;
}

#[when(expr = "consumer {string} subscribes to queue {string}")]
async fn when_subscribes(world: &mut ConsumingWorld, name: String, queue: String) {
    let result = world
        .ctx()
        .channel
        .consume(&queue, &name, &Options::new().with("autoAck", true))
        .await;
    match result {
        Ok(consumer) => {
            world.consumers.insert(name, consumer);
            world.last_error = None;
        }
        Err(e) => world.last_error = Some(e.to_string()),
    }
}

#[when(expr = "I cancel consumer {string}")]
async fn when_cancel(world: &mut ConsumingWorld, name: String) {
    let result = world.ctx().channel.cancel(&name).await;
    world.record(result);
}

// ==========================================================================
// Publishing and queue management
// ==========================================================================

#[when(expr = "I publish messages {string} to queue {string}")]
async fn when_publish_messages(world: &mut ConsumingWorld, bodies: String, queue: String) {
    for body in bodies.split(',') {
        let result = world
            .ctx()
            .channel
            .publish("", &queue, body.as_bytes(), &Options::new())
            .await;
        let failed = result.is_err();
        world.record(result);
        if failed {
            break;
        }
    }
}

#[when(expr = "I delete queue {string}")]
async fn when_delete(world: &mut ConsumingWorld, queue: String) {
    let discarded = world
        .ctx()
        .channel
        .queue_delete(&queue, &Options::new())
        .await
        .expect("Failed to delete queue");
    world.discarded = Some(discarded);
}

#[when(expr = "I delete queue {string} if empty")]
async fn when_delete_if_empty(world: &mut ConsumingWorld, queue: String) {
    let result = world
        .ctx()
        .channel
        .queue_delete(&queue, &Options::new().with("ifEmpty", true))
        .await;
    world.record(result);
}

#[when("I close the channel")]
async fn when_close_channel(world: &mut ConsumingWorld) {
    world
        .ctx()
        .channel
        .close()
        .await
        .expect("Failed to close channel");
}

#[when("the server stops")]
async fn when_server_stops(world: &mut ConsumingWorld) {
    world.ctx().server.stop();
}

// ==========================================================================
// Acknowledgment
// ==========================================================================

#[when(expr = "consumer {string} acks")]
async fn when_ack(world: &mut ConsumingWorld, name: String) {
    world
        .last_delivery(&name)
        .ack(false)
        .await
        .expect("Failed to ack");
}

#[when(expr = "consumer {string} acks again")]
async fn when_ack_again(world: &mut ConsumingWorld, name: String) {
    let result = world.last_delivery(&name).ack(false).await;
    world.record(result);
}

#[when(expr = "consumer {string} nacks with requeue")]
async fn when_nack_requeue(world: &mut ConsumingWorld, name: String) {
    world
        .last_delivery(&name)
        .nack(false, true)
        .await
        .expect("Failed to nack");
}

#[when(expr = "consumer {string} rejects without requeue")]
async fn when_reject_drop(world: &mut ConsumingWorld, name: String) {
    world
        .last_delivery(&name)
        .reject(false)
        .await
        .expect("Failed to reject");
}

// ==========================================================================
// Outcomes
// ==========================================================================

#[then(expr = "consumer {string} receives {string}")]
async fn then_receives(world: &mut ConsumingWorld, name: String, body: String) {
    let delivery = expect_delivery(world.consumer(&name), WAIT).await;
    assert_eq!(body_text(&delivery), body, "delivery to consumer {name}");
    assert!(!delivery.redelivered());
    world.received.insert(name, delivery);
}

#[then(expr = "consumer {string} receives {string} redelivered")]
async fn then_receives_redelivered(world: &mut ConsumingWorld, name: String, body: String) {
    let delivery = expect_delivery(world.consumer(&name), WAIT).await;
    assert_eq!(body_text(&delivery), body, "delivery to consumer {name}");
    assert!(delivery.redelivered(), "expected redelivered flag");
    world.received.insert(name, delivery);
}

#[then(expr = "consumer {string} receives nothing")]
async fn then_receives_nothing(world: &mut ConsumingWorld, name: String) {
    expect_silence(world.consumer(&name), QUIET).await;
}

#[then(expr = "consumer {string} stream ends")]
async fn then_stream_ends(world: &mut ConsumingWorld, name: String) {
    let next = tokio::time::timeout(WAIT, world.consumer(&name).recv())
        .await
        .expect("Consumer stream did not end");
    assert!(next.is_none(), "unexpected delivery: {next:?}");
}

#[then(expr = "queue {string} holds {int} messages")]
async fn then_queue_holds(world: &mut ConsumingWorld, queue: String, count: u32) {
    let info = world
        .ctx()
        .channel
        .queue_declare(&queue, &Options::new())
        .await
        .expect("Failed to inspect queue");
    assert_eq!(info.messages, count);
}

#[then(expr = "{int} messages were discarded")]
async fn then_discarded(world: &mut ConsumingWorld, count: u32) {
    assert_eq!(world.discarded, Some(count));
}

#[then(expr = "the connection closed with code {int} {string}")]
async fn then_connection_closed(world: &mut ConsumingWorld, code: u16, reason: String) {
    let closed = world.ctx().connection.notify_close().borrow().clone();
    let closed = closed.expect("Connection still open");
    assert_eq!(closed.code, code);
    assert_eq!(closed.reason, reason);
    assert!(closed.server_initiated);
}

#[then(expr = "the operation fails with {string}")]
async fn then_fails_with(world: &mut ConsumingWorld, message: String) {
    assert_eq!(world.last_error.as_deref(), Some(message.as_str()));
}
