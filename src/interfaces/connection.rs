//! Connection: the factory for channels.

use async_trait::async_trait;
use tokio::sync::watch;

use super::Channel;
use crate::error::Result;

/// Why a connection closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    /// AMQP reply code (200 = normal close, 320 = forced by the server).
    pub code: u16,
    pub reason: String,
    /// True when the broker side closed the connection.
    pub server_initiated: bool,
}

impl CloseReason {
    /// Normal client-initiated close.
    pub fn normal() -> Self {
        Self {
            code: 200,
            reason: "OK".to_string(),
            server_initiated: false,
        }
    }

    /// Broker shut down underneath the connection.
    pub fn forced() -> Self {
        Self {
            code: 320,
            reason: "CONNECTION_FORCED".to_string(),
            server_initiated: true,
        }
    }
}

/// A live connection to a broker.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Open a new channel.
    async fn channel(&self) -> Result<Box<dyn Channel>>;

    /// Close the connection and every channel opened on it.
    async fn close(&self) -> Result<()>;

    /// Watch for closure. The value turns `Some` once, when the connection closes.
    fn notify_close(&self) -> watch::Receiver<Option<CloseReason>>;
}
