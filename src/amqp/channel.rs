//! AMQP channel.

use std::sync::Arc;

use async_trait::async_trait;
use lapin::options as wire;
use tracing::{debug, warn};

use super::convert::{
    basic_properties, exchange_kind, field_table, properties, wire_error, WireAcker,
};
use crate::delivery::{Acknowledger, Delivery, Message};
use crate::error::Result;
use crate::interfaces::{Channel, Consumer, QueueInfo};
use crate::options::{
    BindOptions, ConsumeOptions, ExchangeDeclareOptions, Options, PublishOptions,
    QueueDeclareOptions, QueueDeleteOptions,
};
use crate::stream::bridge;

/// A channel on an AMQP broker.
pub struct AmqpChannel {
    inner: lapin::Channel,
}

impl AmqpChannel {
    pub(crate) fn new(inner: lapin::Channel) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Channel for AmqpChannel {
    async fn exchange_declare(&self, name: &str, kind: &str, opts: &Options) -> Result<()> {
        let opts = ExchangeDeclareOptions::try_from(opts)?;
        self.inner
            .exchange_declare(
                name,
                exchange_kind(kind),
                wire::ExchangeDeclareOptions {
                    passive: false,
                    durable: opts.durable,
                    auto_delete: opts.auto_delete,
                    internal: opts.internal,
                    nowait: opts.no_wait,
                },
                field_table(&opts.args),
            )
            .await
            .map_err(wire_error)
    }

    async fn exchange_bind(
        &self,
        destination: &str,
        key: &str,
        source: &str,
        opts: &Options,
    ) -> Result<()> {
        let opts = BindOptions::try_from(opts)?;
        self.inner
            .exchange_bind(
                destination,
                source,
                key,
                wire::ExchangeBindOptions {
                    nowait: opts.no_wait,
                },
                field_table(&opts.args),
            )
            .await
            .map_err(wire_error)
    }

    async fn exchange_unbind(
        &self,
        destination: &str,
        key: &str,
        source: &str,
        opts: &Options,
    ) -> Result<()> {
        let opts = BindOptions::try_from(opts)?;
        self.inner
            .exchange_unbind(
                destination,
                source,
                key,
                wire::ExchangeUnbindOptions {
                    nowait: opts.no_wait,
                },
                field_table(&opts.args),
            )
            .await
            .map_err(wire_error)
    }

    async fn queue_declare(&self, name: &str, opts: &Options) -> Result<QueueInfo> {
        let opts = QueueDeclareOptions::try_from(opts)?;
        let queue = self
            .inner
            .queue_declare(
                name,
                wire::QueueDeclareOptions {
                    passive: false,
                    durable: opts.durable,
                    exclusive: opts.exclusive,
                    auto_delete: opts.auto_delete,
                    nowait: opts.no_wait,
                },
                field_table(&opts.args),
            )
            .await
            .map_err(wire_error)?;

        Ok(QueueInfo {
            name: queue.name().as_str().to_string(),
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
        let opts = BindOptions::try_from(opts)?;
        self.inner
            .queue_bind(
                name,
                exchange,
                key,
                wire::QueueBindOptions {
                    nowait: opts.no_wait,
                },
                field_table(&opts.args),
            )
            .await
            .map_err(wire_error)
    }

    async fn queue_unbind(
        &self,
        name: &str,
        key: &str,
        exchange: &str,
        opts: &Options,
    ) -> Result<()> {
        let opts = BindOptions::try_from(opts)?;
        self.inner
            .queue_unbind(name, exchange, key, field_table(&opts.args))
            .await
            .map_err(wire_error)
    }

    async fn queue_delete(&self, name: &str, opts: &Options) -> Result<u32> {
        let opts = QueueDeleteOptions::try_from(opts)?;
        self.inner
            .queue_delete(
                name,
                wire::QueueDeleteOptions {
                    if_unused: opts.if_unused,
                    if_empty: opts.if_empty,
                    nowait: opts.no_wait,
                },
            )
            .await
            .map_err(wire_error)
    }

    #[tracing::instrument(
        name = "amqp.publish",
        skip_all,
        fields(exchange = %exchange, routing_key = %routing_key)
    )]
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        opts: &Options,
    ) -> Result<()> {
        let opts = PublishOptions::try_from(opts)?;
        let confirm = self
            .inner
            .basic_publish(
                exchange,
                routing_key,
                wire::BasicPublishOptions::default(),
                body,
                basic_properties(&opts.properties),
            )
            .await
            .map_err(wire_error)?;
        confirm.await.map_err(wire_error)?;

        debug!("Published");
        Ok(())
    }

    async fn consume(&self, queue: &str, consumer_tag: &str, opts: &Options) -> Result<Consumer> {
        let opts = ConsumeOptions::try_from(opts)?;
        let consumer = self
            .inner
            .basic_consume(
                queue,
                consumer_tag,
                wire::BasicConsumeOptions {
                    no_local: opts.no_local,
                    no_ack: opts.auto_ack,
                    exclusive: opts.exclusive,
                    nowait: opts.no_wait,
                },
                field_table(&opts.args),
            )
            .await
            .map_err(wire_error)?;

        let tag = consumer.tag().as_str().to_string();
        let auto_ack = opts.auto_ack;
        let consumer_tag = tag.clone();

        let deliveries = bridge(consumer, move |item: lapin::Result<lapin::message::Delivery>| {
            match item {
                Ok(delivery) => Some(neutral_delivery(delivery, &consumer_tag, auto_ack)),
                Err(e) => {
                    warn!(consumer_tag = %consumer_tag, error = %e, "AMQP consumer ended");
                    None
                }
            }
        });

        Ok(Consumer::new(tag, deliveries))
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<()> {
        self.inner
            .basic_cancel(consumer_tag, wire::BasicCancelOptions::default())
            .await
            .map_err(wire_error)
    }

    async fn qos(&self, prefetch_count: u16, prefetch_size: u32, global: bool) -> Result<()> {
        if prefetch_size != 0 {
            debug!(prefetch_size, "prefetch_size is not supported by the wire client, ignoring");
        }
        self.inner
            .basic_qos(prefetch_count, wire::BasicQosOptions { global })
            .await
            .map_err(wire_error)
    }

    async fn close(&self) -> Result<()> {
        self.inner.close(200, "OK").await.map_err(wire_error)
    }
}

fn neutral_delivery(
    delivery: lapin::message::Delivery,
    consumer_tag: &str,
    auto_ack: bool,
) -> Delivery {
    let mut message = Message::new(
        delivery.exchange.as_str(),
        delivery.routing_key.as_str(),
        delivery.data,
        properties(&delivery.properties),
    );
    if delivery.redelivered {
        message = message.into_redelivered();
    }

    let acker: Option<Arc<dyn Acknowledger>> = if auto_ack {
        None
    } else {
        Some(Arc::new(WireAcker(delivery.acker)))
    };
    Delivery::new(message, delivery.delivery_tag, consumer_tag, acker)
}
