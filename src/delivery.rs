//! Message envelopes.
//!
//! A [`Message`] is what routing moves from an exchange into a queue. It is
//! immutable once published. A [`Delivery`] is one message handed to one
//! consumer, together with the bookkeeping needed to acknowledge it.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{BrokerError, Result};
use crate::options::Table;

/// AMQP basic properties carried alongside a message body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties {
    pub headers: Table,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    /// 1 = transient, 2 = persistent.
    pub delivery_mode: Option<u8>,
    pub priority: Option<u8>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub expiration: Option<String>,
    pub message_id: Option<String>,
    /// Unix seconds.
    pub timestamp: Option<u64>,
    /// Application message type (`type` on the wire).
    pub kind: Option<String>,
    pub user_id: Option<String>,
    pub app_id: Option<String>,
}

/// A published message as it travels through exchanges and queues.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    body: Bytes,
    properties: Properties,
    exchange: String,
    routing_key: String,
    redelivered: bool,
}

impl Message {
    pub fn new(
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        body: impl Into<Bytes>,
        properties: Properties,
    ) -> Self {
        Self {
            body: body.into(),
            properties,
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            redelivered: false,
        }
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Exchange the message was originally published to.
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn is_redelivered(&self) -> bool {
        self.redelivered
    }

    /// Copy of this message flagged as a redelivery.
    pub(crate) fn into_redelivered(mut self) -> Self {
        self.redelivered = true;
        self
    }
}

/// Settles deliveries on behalf of a consumer.
///
/// Implemented by each backend: the simulated broker settles against its
/// queue bookkeeping, the AMQP adapter forwards to the wire client.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self, delivery_tag: u64, multiple: bool) -> Result<()>;

    async fn nack(&self, delivery_tag: u64, multiple: bool, requeue: bool) -> Result<()>;

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<()>;
}

/// One message handed to one consumer.
///
/// Deliveries received with `autoAck` carry no acknowledger; settling them
/// fails with [`BrokerError::UnknownDeliveryTag`], as it would on a real broker.
pub struct Delivery {
    message: Message,
    delivery_tag: u64,
    consumer_tag: String,
    acker: Option<Arc<dyn Acknowledger>>,
}

impl Delivery {
    pub fn new(
        message: Message,
        delivery_tag: u64,
        consumer_tag: impl Into<String>,
        acker: Option<Arc<dyn Acknowledger>>,
    ) -> Self {
        Self {
            message,
            delivery_tag,
            consumer_tag: consumer_tag.into(),
            acker,
        }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn body(&self) -> &[u8] {
        self.message.body()
    }

    pub fn properties(&self) -> &Properties {
        self.message.properties()
    }

    pub fn headers(&self) -> &Table {
        &self.message.properties().headers
    }

    pub fn exchange(&self) -> &str {
        self.message.exchange()
    }

    pub fn routing_key(&self) -> &str {
        self.message.routing_key()
    }

    pub fn redelivered(&self) -> bool {
        self.message.is_redelivered()
    }

    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    pub fn message_id(&self) -> Option<&str> {
        self.message.properties().message_id.as_deref()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.message.properties().content_type.as_deref()
    }

    /// Acknowledge this delivery (and every earlier one when `multiple`).
    pub async fn ack(&self, multiple: bool) -> Result<()> {
        self.acker()?.ack(self.delivery_tag, multiple).await
    }

    /// Negatively acknowledge, optionally requeueing.
    pub async fn nack(&self, multiple: bool, requeue: bool) -> Result<()> {
        self.acker()?
            .nack(self.delivery_tag, multiple, requeue)
            .await
    }

    /// Reject this single delivery, optionally requeueing.
    pub async fn reject(&self, requeue: bool) -> Result<()> {
        self.acker()?.reject(self.delivery_tag, requeue).await
    }

    fn acker(&self) -> Result<&Arc<dyn Acknowledger>> {
        self.acker
            .as_ref()
            .ok_or(BrokerError::UnknownDeliveryTag(self.delivery_tag))
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("exchange", &self.message.exchange)
            .field("routing_key", &self.message.routing_key)
            .field("delivery_tag", &self.delivery_tag)
            .field("consumer_tag", &self.consumer_tag)
            .field("redelivered", &self.message.redelivered)
            .field("body_len", &self.message.body.len())
            .finish()
    }
}
