//! AMQP (RabbitMQ) adapter.
//!
//! Implements the broker-neutral [`Connection`]/[`Channel`] traits over
//! lapin. Typed options are translated into lapin's option structs, option
//! tables into field tables, and lapin consumers are bridged into
//! [`Consumer`](crate::interfaces::Consumer) streams.

mod channel;
pub mod convert;

pub use channel::AmqpChannel;

use std::sync::Arc;

use async_trait::async_trait;
use lapin::ConnectionProperties;
use tokio::sync::watch;
use tracing::{error, info};

use crate::error::Result;
use crate::interfaces::{Channel, CloseReason, Connection};
use convert::wire_error;

/// Connect to the AMQP broker at `url`.
pub async fn dial(url: &str) -> Result<AmqpConnection> {
    let inner = lapin::Connection::connect(url, ConnectionProperties::default()).await?;

    let (closed, _) = watch::channel(None);
    let closed = Arc::new(closed);

    let notifier = Arc::clone(&closed);
    inner.on_error(move |e| {
        error!(error = %e, "AMQP connection failed");
        notifier.send_if_modified(|reason| {
            if reason.is_some() {
                return false;
            }
            *reason = Some(CloseReason {
                code: 320,
                reason: e.to_string(),
                server_initiated: true,
            });
            true
        });
    });

    info!("Connected to AMQP");
    Ok(AmqpConnection { inner, closed })
}

/// A connection to an AMQP broker.
pub struct AmqpConnection {
    inner: lapin::Connection,
    closed: Arc<watch::Sender<Option<CloseReason>>>,
}

#[async_trait]
impl Connection for AmqpConnection {
    async fn channel(&self) -> Result<Box<dyn Channel>> {
        let channel = self.inner.create_channel().await.map_err(wire_error)?;
        Ok(Box::new(AmqpChannel::new(channel)))
    }

    async fn close(&self) -> Result<()> {
        self.inner.close(200, "OK").await.map_err(wire_error)?;
        self.closed.send_if_modified(|reason| {
            if reason.is_some() {
                return false;
            }
            *reason = Some(CloseReason::normal());
            true
        });
        info!("AMQP connection closed");
        Ok(())
    }

    fn notify_close(&self) -> watch::Receiver<Option<CloseReason>> {
        self.closed.subscribe()
    }
}
