//! Channel: the per-client operation surface.

use async_trait::async_trait;

use super::Consumer;
use crate::error::Result;
use crate::options::Options;

/// State of a declared queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    /// Queue name (server-generated when declared with an empty name).
    pub name: String,
    /// Messages ready for delivery.
    pub messages: u32,
    /// Active consumers.
    pub consumers: u32,
}

/// Operations a client issues against a broker.
///
/// Every operation takes an [`Options`] bag; see `crate::options` for the
/// recognized keys of each operation and their defaults.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Declare an exchange of `kind` (`direct`, `topic`, ...).
    async fn exchange_declare(&self, name: &str, kind: &str, opts: &Options) -> Result<()>;

    /// Bind `destination` exchange to `source` exchange: source --(key)--> destination.
    async fn exchange_bind(
        &self,
        destination: &str,
        key: &str,
        source: &str,
        opts: &Options,
    ) -> Result<()>;

    /// Remove an exchange-to-exchange binding.
    async fn exchange_unbind(
        &self,
        destination: &str,
        key: &str,
        source: &str,
        opts: &Options,
    ) -> Result<()>;

    /// Declare a queue, or return the existing queue of that name.
    async fn queue_declare(&self, name: &str, opts: &Options) -> Result<QueueInfo>;

    /// Bind queue `name` to `exchange` under routing pattern `key`.
    async fn queue_bind(&self, name: &str, key: &str, exchange: &str, opts: &Options)
        -> Result<()>;

    /// Remove a queue binding.
    async fn queue_unbind(
        &self,
        name: &str,
        key: &str,
        exchange: &str,
        opts: &Options,
    ) -> Result<()>;

    /// Delete a queue. Returns the number of messages discarded with it.
    async fn queue_delete(&self, name: &str, opts: &Options) -> Result<u32>;

    /// Publish `body` to `exchange` with `routing_key`.
    ///
    /// Unroutable messages are dropped, not reported as errors.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        opts: &Options,
    ) -> Result<()>;

    /// Start consuming `queue`. An empty `consumer_tag` is generated.
    async fn consume(&self, queue: &str, consumer_tag: &str, opts: &Options) -> Result<Consumer>;

    /// Cancel a consumer; its stream ends without error.
    async fn cancel(&self, consumer_tag: &str) -> Result<()>;

    /// Limit unacknowledged deliveries per consumer.
    async fn qos(&self, prefetch_count: u16, prefetch_size: u32, global: bool) -> Result<()>;

    /// Close the channel. Later operations fail with `ChannelClosed`.
    async fn close(&self) -> Result<()>;
}
