//! Simulated channel.
//!
//! Decodes each operation's option bag and forwards to the [`Broker`].
//! Delivery tags are numbered per channel, starting at 1.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

use super::broker::Broker;
use super::exchange::ExchangeKind;
use super::lock;
use super::queue::{ConsumerSettings, Queue};
use crate::error::{BrokerError, Result};
use crate::interfaces::{Channel, CloseReason, Consumer, QueueInfo};
use crate::options::{
    BindOptions, ConsumeOptions, ExchangeDeclareOptions, Options, PublishOptions,
    QueueDeclareOptions, QueueDeleteOptions,
};

pub(crate) struct ChannelState {
    broker: Arc<Broker>,
    connection: Arc<watch::Sender<Option<CloseReason>>>,
    closed: AtomicBool,
    delivery_tags: Arc<AtomicU64>,
    prefetch: AtomicU16,
    /// Consumer tag to the queue and subscription it names.
    consumers: Mutex<HashMap<String, (Arc<Queue>, u64)>>,
}

impl ChannelState {
    fn ensure_open(&self) -> Result<()> {
        if self.connection.borrow().is_some() {
            return Err(BrokerError::ConnectionClosed);
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::ChannelClosed);
        }
        Ok(())
    }

    /// Mark closed and cancel every consumer started on this channel.
    pub(crate) fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let consumers: Vec<(Arc<Queue>, u64)> =
            lock(&self.consumers).drain().map(|(_, c)| c).collect();
        for (queue, id) in consumers {
            queue.cancel(id);
        }
    }

    #[cfg(test)]
    fn tracked_consumers(&self) -> usize {
        lock(&self.consumers).len()
    }
}

/// A channel on a simulated broker.
pub struct SimChannel {
    state: Arc<ChannelState>,
}

impl SimChannel {
    pub(crate) fn new(
        broker: Arc<Broker>,
        connection: Arc<watch::Sender<Option<CloseReason>>>,
    ) -> Self {
        Self {
            state: Arc::new(ChannelState {
                broker,
                connection,
                closed: AtomicBool::new(false),
                delivery_tags: Arc::new(AtomicU64::new(0)),
                prefetch: AtomicU16::new(0),
                consumers: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub(crate) fn state(&self) -> &Arc<ChannelState> {
        &self.state
    }
}

#[async_trait]
impl Channel for SimChannel {
    async fn exchange_declare(&self, name: &str, kind: &str, opts: &Options) -> Result<()> {
        self.state.ensure_open()?;
        let _opts = ExchangeDeclareOptions::try_from(opts)?;
        let kind: ExchangeKind = kind.parse()?;
        self.state.broker.declare_exchange(name, kind)?;
        Ok(())
    }

    async fn exchange_bind(
        &self,
        destination: &str,
        key: &str,
        source: &str,
        opts: &Options,
    ) -> Result<()> {
        self.state.ensure_open()?;
        let _opts = BindOptions::try_from(opts)?;
        self.state.broker.bind_exchange(destination, key, source)
    }

    async fn exchange_unbind(
        &self,
        destination: &str,
        key: &str,
        source: &str,
        opts: &Options,
    ) -> Result<()> {
        self.state.ensure_open()?;
        let _opts = BindOptions::try_from(opts)?;
        self.state.broker.unbind_exchange(destination, key, source)
    }

    async fn queue_declare(&self, name: &str, opts: &Options) -> Result<QueueInfo> {
        self.state.ensure_open()?;
        let _opts = QueueDeclareOptions::try_from(opts)?;
        let queue = self.state.broker.declare_queue(name)?;
        Ok(QueueInfo {
            name: queue.name().to_string(),
            messages: queue.message_count(),
            consumers: queue.consumer_count(),
        })
    }

    async fn queue_bind(
        &self,
        name: &str,
        key: &str,
        exchange: &str,
        opts: &Options,
    ) -> Result<()> {
        self.state.ensure_open()?;
        let _opts = BindOptions::try_from(opts)?;
        self.state.broker.bind_queue(name, key, exchange)
    }

    async fn queue_unbind(
        &self,
        name: &str,
        key: &str,
        exchange: &str,
        opts: &Options,
    ) -> Result<()> {
        self.state.ensure_open()?;
        let _opts = BindOptions::try_from(opts)?;
        self.state.broker.unbind_queue(name, key, exchange)
    }

    async fn queue_delete(&self, name: &str, opts: &Options) -> Result<u32> {
        self.state.ensure_open()?;
        let opts = QueueDeleteOptions::try_from(opts)?;
        self.state
            .broker
            .delete_queue(name, opts.if_unused, opts.if_empty)
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        opts: &Options,
    ) -> Result<()> {
        self.state.ensure_open()?;
        let opts = PublishOptions::try_from(opts)?;
        self.state
            .broker
            .publish(exchange, routing_key, body, opts.properties)
            .await
    }

    async fn consume(&self, queue: &str, consumer_tag: &str, opts: &Options) -> Result<Consumer> {
        self.state.ensure_open()?;
        let opts = ConsumeOptions::try_from(opts)?;
        let queue = self.state.broker.queue(queue)?;

        let tag = if consumer_tag.is_empty() {
            format!("ctag-{}", Uuid::new_v4())
        } else {
            consumer_tag.to_string()
        };

        let mut consumers = lock(&self.state.consumers);
        // Forget consumers whose stream was dropped or whose queue went away.
        consumers.retain(|_, (queue, id)| queue.is_active(*id));
        if consumers.contains_key(&tag) {
            return Err(BrokerError::PreconditionFailed(format!(
                "consumer tag '{tag}' already in use on this channel"
            )));
        }

        let subscription = queue.subscribe(
            ConsumerSettings {
                tag: tag.clone(),
                auto_ack: opts.auto_ack,
                exclusive: opts.exclusive,
                prefetch: self.state.prefetch.load(Ordering::SeqCst),
            },
            Arc::clone(&self.state.delivery_tags),
        )?;
        consumers.insert(tag.clone(), (queue, subscription.id()));

        Ok(Consumer::new(tag, subscription.into_stream()))
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<()> {
        self.state.ensure_open()?;
        let (queue, id) = lock(&self.state.consumers)
            .remove(consumer_tag)
            .ok_or_else(|| BrokerError::not_found("consumer", consumer_tag))?;
        queue.cancel(id);
        Ok(())
    }

    async fn qos(&self, prefetch_count: u16, prefetch_size: u32, global: bool) -> Result<()> {
        self.state.ensure_open()?;
        self.state.prefetch.store(prefetch_count, Ordering::SeqCst);
        debug!(prefetch_count, prefetch_size, global, "Qos set");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.state.shutdown();
        info!("Channel closed");
        Ok(())
    }
}
