//! Simulated broker registry.
//!
//! The broker owns every exchange and queue by name. Bindings between them
//! are held by the exchanges themselves; the registry only resolves names.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::exchange::{new_exchange, Exchange, ExchangeKind};
use super::queue::{Queue, DEFAULT_QUEUE_CAPACITY};
use super::{lock, read, write};
use crate::delivery::{Message, Properties};
use crate::error::{BrokerError, Result};
use crate::interfaces::CloseReason;

/// The nameless direct exchange every queue is bound to under its own name.
pub const DEFAULT_EXCHANGE: &str = "";

/// Exchanges present on every broker: (name, kind).
pub const PREDECLARED_EXCHANGES: [(&str, ExchangeKind); 3] = [
    (DEFAULT_EXCHANGE, ExchangeKind::Direct),
    ("amq.direct", ExchangeKind::Direct),
    ("amq.topic", ExchangeKind::Topic),
];

type CloseSender = watch::Sender<Option<CloseReason>>;

#[derive(Default)]
struct Lifecycle {
    shut_down: bool,
    listeners: Vec<Weak<CloseSender>>,
}

/// Name registry and routing entry point of one simulated broker.
pub struct Broker {
    exchanges: RwLock<HashMap<String, Arc<dyn Exchange>>>,
    queues: RwLock<HashMap<String, Arc<Queue>>>,
    queue_capacity: usize,
    routed: AtomicU64,
    unroutable: AtomicU64,
    lifecycle: Mutex<Lifecycle>,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker {
    pub fn new() -> Self {
        Self::with_queue_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a broker whose queues buffer up to `capacity` ready messages.
    pub fn with_queue_capacity(capacity: usize) -> Self {
        let exchanges = PREDECLARED_EXCHANGES
            .iter()
            .map(|(name, kind)| (name.to_string(), new_exchange(name, *kind)))
            .collect();

        Self {
            exchanges: RwLock::new(exchanges),
            queues: RwLock::new(HashMap::new()),
            queue_capacity: capacity,
            routed: AtomicU64::new(0),
            unroutable: AtomicU64::new(0),
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    /// Declare an exchange.
    ///
    /// Redeclaring with the same kind keeps the existing exchange and its
    /// bindings. A different kind replaces it, dropping its bindings, except
    /// for the predeclared exchanges which cannot change kind.
    pub fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> Result<Arc<dyn Exchange>> {
        let mut exchanges = write(&self.exchanges);
        if let Some(existing) = exchanges.get(name) {
            if existing.kind() == kind {
                return Ok(Arc::clone(existing));
            }
            if is_reserved(name) {
                return Err(BrokerError::PreconditionFailed(format!(
                    "exchange '{name}' is predeclared as {}",
                    existing.kind()
                )));
            }
            info!(exchange = %name, old = %existing.kind(), new = %kind, "Replacing exchange");
        }

        let exchange = new_exchange(name, kind);
        exchanges.insert(name.to_string(), Arc::clone(&exchange));
        info!(exchange = %name, kind = %kind, "Exchange declared");
        Ok(exchange)
    }

    pub fn exchange(&self, name: &str) -> Result<Arc<dyn Exchange>> {
        read(&self.exchanges)
            .get(name)
            .cloned()
            .ok_or_else(|| BrokerError::not_found("exchange", name))
    }

    /// Declare a queue, or return the existing one.
    ///
    /// An empty name gets a generated `amq.gen-<uuid>` name. New queues are
    /// bound to the default exchange under their own name.
    pub fn declare_queue(&self, name: &str) -> Result<Arc<Queue>> {
        let name = if name.is_empty() {
            format!("amq.gen-{}", Uuid::new_v4())
        } else {
            name.to_string()
        };

        let queue = {
            let mut queues = write(&self.queues);
            if let Some(existing) = queues.get(&name) {
                return Ok(Arc::clone(existing));
            }
            let queue = Arc::new(Queue::new(name.clone(), self.queue_capacity));
            queues.insert(name.clone(), Arc::clone(&queue));
            queue
        };

        self.exchange(DEFAULT_EXCHANGE)?
            .bindings()
            .bind_queue(&name, &queue);

        info!(queue = %name, "Queue declared");
        Ok(queue)
    }

    pub fn queue(&self, name: &str) -> Result<Arc<Queue>> {
        read(&self.queues)
            .get(name)
            .cloned()
            .ok_or_else(|| BrokerError::not_found("queue", name))
    }

    /// Bind queue `queue` to `exchange` under `pattern`.
    pub fn bind_queue(&self, queue: &str, pattern: &str, exchange: &str) -> Result<()> {
        let target = self.queue(queue)?;
        self.exchange(exchange)?
            .bindings()
            .bind_queue(pattern, &target);
        info!(exchange = %exchange, queue = %queue, pattern = %pattern, "Queue bound");
        Ok(())
    }

    /// Remove a queue binding. Removing a binding that does not exist is a no-op.
    pub fn unbind_queue(&self, queue: &str, pattern: &str, exchange: &str) -> Result<()> {
        self.queue(queue)?;
        let removed = self
            .exchange(exchange)?
            .bindings()
            .unbind_queue(pattern, queue);
        if removed {
            info!(exchange = %exchange, queue = %queue, pattern = %pattern, "Queue unbound");
        } else {
            debug!(exchange = %exchange, queue = %queue, pattern = %pattern, "No such binding");
        }
        Ok(())
    }

    /// Bind `destination` to `source`: messages reaching `source` under
    /// `pattern` continue into `destination`.
    pub fn bind_exchange(&self, destination: &str, pattern: &str, source: &str) -> Result<()> {
        let target = self.exchange(destination)?;
        self.exchange(source)?
            .bindings()
            .bind_exchange(pattern, &target);
        info!(source = %source, destination = %destination, pattern = %pattern, "Exchange bound");
        Ok(())
    }

    pub fn unbind_exchange(&self, destination: &str, pattern: &str, source: &str) -> Result<()> {
        self.exchange(destination)?;
        let removed = self
            .exchange(source)?
            .bindings()
            .unbind_exchange(pattern, destination);
        if removed {
            info!(source = %source, destination = %destination, pattern = %pattern, "Exchange unbound");
        } else {
            debug!(source = %source, destination = %destination, pattern = %pattern, "No such binding");
        }
        Ok(())
    }

    /// Delete a queue, returning the number of undelivered messages discarded.
    ///
    /// Its consumers' streams end and bindings to it stop matching.
    pub fn delete_queue(&self, name: &str, if_unused: bool, if_empty: bool) -> Result<u32> {
        let mut queues = write(&self.queues);
        let queue = queues
            .get(name)
            .ok_or_else(|| BrokerError::not_found("queue", name))?;
        let discarded = queue.close_if(if_unused, if_empty)?;
        queues.remove(name);

        info!(queue = %name, discarded, "Queue deleted");
        Ok(discarded)
    }

    /// Route a message through `exchange`.
    ///
    /// Fails with `NotFound` for an unknown exchange and `NoRoute` when no
    /// binding accepts the message's routing key.
    pub async fn route(&self, exchange: &str, message: Message) -> Result<String> {
        let exchange = self.exchange(exchange)?;
        let queue = exchange.route(message).await?;
        self.routed.fetch_add(1, Ordering::Relaxed);
        Ok(queue)
    }

    /// Publish a message. Unroutable messages are dropped and counted.
    #[tracing::instrument(
        name = "broker.publish",
        skip_all,
        fields(exchange = %exchange, routing_key = %routing_key)
    )]
    pub async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: Properties,
    ) -> Result<()> {
        let message = Message::new(exchange, routing_key, body.to_vec(), properties);
        match self.route(exchange, message).await {
            Ok(queue) => {
                debug!(queue = %queue, "Published");
                Ok(())
            }
            Err(e) if e.is_no_route() => {
                self.unroutable.fetch_add(1, Ordering::Relaxed);
                warn!("Message unroutable, dropped");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Messages successfully routed into a queue.
    pub fn routed_count(&self) -> u64 {
        self.routed.load(Ordering::Relaxed)
    }

    /// Messages dropped by `publish` because nothing matched.
    pub fn unroutable_count(&self) -> u64 {
        self.unroutable.load(Ordering::Relaxed)
    }

    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = read(&self.queues).keys().cloned().collect();
        names.sort();
        names
    }

    pub fn exchange_names(&self) -> Vec<String> {
        let mut names: Vec<String> = read(&self.exchanges).keys().cloned().collect();
        names.sort();
        names
    }

    /// Register a connection's close signal, fired on shutdown.
    pub(crate) fn watch_shutdown(&self, listener: &Arc<CloseSender>) {
        let mut lifecycle = lock(&self.lifecycle);
        if lifecycle.shut_down {
            notify_forced(listener);
            return;
        }
        lifecycle.listeners.retain(|l| l.strong_count() > 0);
        lifecycle.listeners.push(Arc::downgrade(listener));
    }

    pub fn is_shut_down(&self) -> bool {
        lock(&self.lifecycle).shut_down
    }

    /// Close every queue and force-close every connection.
    pub fn shutdown(&self) {
        let listeners = {
            let mut lifecycle = lock(&self.lifecycle);
            if lifecycle.shut_down {
                return;
            }
            lifecycle.shut_down = true;
            std::mem::take(&mut lifecycle.listeners)
        };

        let queues: Vec<Arc<Queue>> = write(&self.queues).drain().map(|(_, q)| q).collect();
        for queue in &queues {
            queue.close();
        }

        for listener in listeners.iter().filter_map(Weak::upgrade) {
            notify_forced(&listener);
        }

        info!(queues = queues.len(), "Broker shut down");
    }
}

fn is_reserved(name: &str) -> bool {
    name == DEFAULT_EXCHANGE || name.starts_with("amq.")
}

fn notify_forced(listener: &CloseSender) {
    listener.send_if_modified(|reason| {
        if reason.is_some() {
            return false;
        }
        *reason = Some(CloseReason::forced());
        true
    });
}
