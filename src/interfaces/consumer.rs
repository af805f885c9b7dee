//! Consumer: the lazy delivery sequence returned by `Channel::consume`.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};

use crate::delivery::Delivery;

/// A subscription's delivery stream.
///
/// Ends (yields `None`) when the consumer is cancelled, the queue is deleted,
/// or the broker goes away. It never yields errors.
pub struct Consumer {
    tag: String,
    inner: BoxStream<'static, Delivery>,
}

impl Consumer {
    pub fn new<S>(tag: impl Into<String>, stream: S) -> Self
    where
        S: Stream<Item = Delivery> + Send + 'static,
    {
        Self {
            tag: tag.into(),
            inner: stream.boxed(),
        }
    }

    /// Consumer tag identifying this subscription on its channel.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Wait for the next delivery.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.inner.next().await
    }
}

impl Stream for Consumer {
    type Item = Delivery;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Delivery>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer").field("tag", &self.tag).finish()
    }
}
