//! Simulated server lifecycle and dialing.
//!
//! A [`Server`] registers a fresh [`Broker`] under its URL in a process-wide
//! table; [`dial`] looks the URL up and connects to whatever is running
//! there. Stopping a server closes its queues and force-closes every
//! connection dialed to it.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, Weak};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::info;

use super::broker::Broker;
use super::channel::{ChannelState, SimChannel};
use super::lock;
use super::queue::DEFAULT_QUEUE_CAPACITY;
use crate::error::{BrokerError, Result};
use crate::interfaces::{Channel, CloseReason, Connection};

static SERVERS: LazyLock<Mutex<HashMap<String, Arc<Broker>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// An in-process broker reachable by URL.
///
/// Dropping a running server stops it.
pub struct Server {
    url: String,
    queue_capacity: usize,
    broker: Mutex<Option<Arc<Broker>>>,
}

impl Server {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            broker: Mutex::new(None),
        }
    }

    /// Per-queue buffer size for brokers this server starts.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Start serving. Each start begins with an empty broker.
    ///
    /// Fails with `PreconditionFailed` if another server holds the URL.
    pub fn start(&self) -> Result<()> {
        let mut current = lock(&self.broker);
        if current.is_some() {
            return Ok(());
        }

        let mut servers = lock(&SERVERS);
        if servers.contains_key(&self.url) {
            return Err(BrokerError::PreconditionFailed(format!(
                "a server is already running on {}",
                self.url
            )));
        }

        let broker = Arc::new(Broker::with_queue_capacity(self.queue_capacity));
        servers.insert(self.url.clone(), Arc::clone(&broker));
        *current = Some(broker);

        info!(url = %self.url, "Simulated broker started");
        Ok(())
    }

    /// Stop serving. Consumer streams end, blocked publishers are released
    /// and connections report a forced close.
    pub fn stop(&self) {
        let Some(broker) = lock(&self.broker).take() else {
            return;
        };

        {
            let mut servers = lock(&SERVERS);
            if servers
                .get(&self.url)
                .is_some_and(|registered| Arc::ptr_eq(registered, &broker))
            {
                servers.remove(&self.url);
            }
        }

        broker.shutdown();
        info!(url = %self.url, "Simulated broker stopped");
    }

    pub fn is_running(&self) -> bool {
        lock(&self.broker).is_some()
    }

    /// The running broker, for inspection.
    pub fn broker(&self) -> Option<Arc<Broker>> {
        lock(&self.broker).clone()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Servers started by [`ensure_running`]; they live until the process exits.
static EMBEDDED: LazyLock<Mutex<Vec<Server>>> = LazyLock::new(|| Mutex::new(Vec::new()));

/// Start a process-lifetime server on `url` unless one is already running there.
pub fn ensure_running(url: &str, queue_capacity: usize) -> Result<()> {
    if lock(&SERVERS).contains_key(url) {
        return Ok(());
    }

    let server = Server::new(url).with_queue_capacity(queue_capacity);
    match server.start() {
        Ok(()) => {
            lock(&EMBEDDED).push(server);
            Ok(())
        }
        // Lost a race with another starter; theirs serves the URL.
        Err(BrokerError::PreconditionFailed(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Connect to the simulated server running on `url`.
pub fn dial(url: &str) -> Result<SimConnection> {
    let broker = lock(&SERVERS)
        .get(url)
        .cloned()
        .ok_or_else(|| BrokerError::ConnectionRefused(url.to_string()))?;
    Ok(SimConnection::new(broker))
}

/// A connection to a simulated broker.
pub struct SimConnection {
    broker: Arc<Broker>,
    closed: Arc<watch::Sender<Option<CloseReason>>>,
    channels: Mutex<Vec<Weak<ChannelState>>>,
}

impl SimConnection {
    /// Connect straight to `broker`, bypassing the server table.
    pub fn new(broker: Arc<Broker>) -> Self {
        let (closed, _) = watch::channel(None);
        let closed = Arc::new(closed);
        broker.watch_shutdown(&closed);
        Self {
            broker,
            closed,
            channels: Mutex::new(Vec::new()),
        }
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    pub fn is_closed(&self) -> bool {
        self.closed.borrow().is_some()
    }
}

#[async_trait]
impl Connection for SimConnection {
    async fn channel(&self) -> Result<Box<dyn Channel>> {
        if self.is_closed() {
            return Err(BrokerError::ConnectionClosed);
        }
        let channel = SimChannel::new(Arc::clone(&self.broker), Arc::clone(&self.closed));

        let mut channels = lock(&self.channels);
        channels.retain(|c| c.strong_count() > 0);
        channels.push(Arc::downgrade(channel.state()));

        Ok(Box::new(channel))
    }

    async fn close(&self) -> Result<()> {
        let first = self.closed.send_if_modified(|reason| {
            if reason.is_some() {
                return false;
            }
            *reason = Some(CloseReason::normal());
            true
        });
        if !first {
            return Ok(());
        }

        let channels: Vec<_> = lock(&self.channels).drain(..).collect();
        for channel in channels.iter().filter_map(Weak::upgrade) {
            channel.shutdown();
        }
        info!("Connection closed");
        Ok(())
    }

    fn notify_close(&self) -> watch::Receiver<Option<CloseReason>> {
        self.closed.subscribe()
    }
}
