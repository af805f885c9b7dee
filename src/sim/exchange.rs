//! Simulated exchanges.
//!
//! An exchange owns two binding tables, one to queues and one to other
//! exchanges, each keyed by routing pattern. Exchange kinds differ only in
//! how a pattern is matched against a routing key ([`Exchange::matches`]).
//!
//! Routing stops at the FIRST matching live queue binding. When no queue
//! binding matches, exchange bindings are tried in order and the first
//! downstream exchange that resolves a queue wins. A real broker fans out to
//! every matching binding; this simulation does not.
//!
//! Each exchange is entered at most once per routed message, so binding
//! cycles cost no more than the number of exchanges they span.
//!
//! Binding targets are held weakly: the broker owns queues and exchanges, so
//! a binding to a deleted queue (or a replaced exchange) no longer matches.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::queue::Queue;
use super::topic::topic_matches;
use super::{read, write};
use crate::delivery::Message;
use crate::error::{BrokerError, Result};

/// Longest exchange-to-exchange chain followed before giving up.
pub const MAX_EXCHANGE_HOPS: usize = 16;

/// Exchange variants supported by the simulated broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Direct,
    Topic,
}

impl FromStr for ExchangeKind {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "direct" => Ok(Self::Direct),
            "topic" => Ok(Self::Topic),
            other => Err(BrokerError::UnsupportedExchangeKind(other.to_string())),
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => f.write_str("direct"),
            Self::Topic => f.write_str("topic"),
        }
    }
}

/// Insertion-ordered binding tables. One target per pattern per table:
/// binding an existing pattern again replaces its target.
#[derive(Default)]
pub struct Bindings {
    queues: RwLock<Vec<(String, Weak<Queue>)>>,
    exchanges: RwLock<Vec<(String, Weak<dyn Exchange>)>>,
}

impl Bindings {
    pub fn bind_queue(&self, pattern: &str, queue: &Arc<Queue>) {
        upsert(&mut write(&self.queues), pattern, Arc::downgrade(queue));
    }

    /// Remove the binding for `pattern` if it targets `queue`.
    pub fn unbind_queue(&self, pattern: &str, queue: &str) -> bool {
        let mut table = write(&self.queues);
        let before = table.len();
        table.retain(|(p, q)| {
            !(p == pattern && q.upgrade().map_or(true, |q| q.name() == queue))
        });
        table.len() != before
    }

    pub fn bind_exchange(&self, pattern: &str, exchange: &Arc<dyn Exchange>) {
        upsert(&mut write(&self.exchanges), pattern, Arc::downgrade(exchange));
    }

    /// Remove the binding for `pattern` if it targets `exchange`.
    pub fn unbind_exchange(&self, pattern: &str, exchange: &str) -> bool {
        let mut table = write(&self.exchanges);
        let before = table.len();
        table.retain(|(p, e)| {
            !(p == pattern && e.upgrade().map_or(true, |e| e.name() == exchange))
        });
        table.len() != before
    }

    /// Bindings whose target is still alive: (queue bindings, exchange bindings).
    pub fn live_counts(&self) -> (usize, usize) {
        let queues = read(&self.queues)
            .iter()
            .filter(|(_, q)| q.upgrade().is_some_and(|q| !q.is_closed()))
            .count();
        let exchanges = read(&self.exchanges)
            .iter()
            .filter(|(_, e)| e.strong_count() > 0)
            .count();
        (queues, exchanges)
    }

    fn queue_snapshot(&self) -> Vec<(String, Weak<Queue>)> {
        read(&self.queues).clone()
    }

    fn exchange_snapshot(&self) -> Vec<(String, Weak<dyn Exchange>)> {
        read(&self.exchanges).clone()
    }
}

fn upsert<T>(table: &mut Vec<(String, T)>, pattern: &str, target: T) {
    match table.iter_mut().find(|(p, _)| p == pattern) {
        Some(entry) => entry.1 = target,
        None => table.push((pattern.to_string(), target)),
    }
}

/// A routing node.
#[async_trait]
pub trait Exchange: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> ExchangeKind;

    fn bindings(&self) -> &Bindings;

    /// Whether a binding under `pattern` accepts `routing_key`.
    fn matches(&self, pattern: &str, routing_key: &str) -> bool;

    /// Find the queue a message with `routing_key` lands in.
    ///
    /// `hops` counts the exchanges already traversed on this path and
    /// `visited` names every exchange entered so far for this message.
    fn resolve(
        &self,
        routing_key: &str,
        hops: usize,
        visited: &mut HashSet<String>,
    ) -> Option<Arc<Queue>> {
        if !visited.insert(self.name().to_string()) {
            return None;
        }
        if hops >= MAX_EXCHANGE_HOPS {
            warn!(
                exchange = %self.name(),
                routing_key = %routing_key,
                "Exchange chain too long, giving up"
            );
            return None;
        }

        let bindings = self.bindings();

        let queue = bindings
            .queue_snapshot()
            .into_iter()
            .filter(|(pattern, _)| self.matches(pattern, routing_key))
            .find_map(|(_, queue)| queue.upgrade().filter(|q| !q.is_closed()));
        if queue.is_some() {
            return queue;
        }

        // Failures downstream are swallowed; the next candidate is tried.
        bindings
            .exchange_snapshot()
            .into_iter()
            .filter(|(pattern, _)| self.matches(pattern, routing_key))
            .filter_map(|(_, exchange)| exchange.upgrade())
            .find_map(|exchange| exchange.resolve(routing_key, hops + 1, visited))
    }

    /// Route `message` by its routing key and deposit it.
    ///
    /// Returns the name of the receiving queue, or `NoRoute`.
    async fn route(&self, message: Message) -> Result<String> {
        let routing_key = message.routing_key().to_string();
        let no_route = || BrokerError::NoRoute {
            exchange: self.name().to_string(),
            routing_key: routing_key.clone(),
        };

        let queue = self
            .resolve(&routing_key, 0, &mut HashSet::new())
            .ok_or_else(no_route)?;

        // A queue deleted between resolution and deposit is a miss, not a failure.
        queue.deposit(message).await.map_err(|_| no_route())?;

        debug!(
            exchange = %self.name(),
            routing_key = %routing_key,
            queue = %queue.name(),
            "Routed message"
        );
        Ok(queue.name().to_string())
    }
}

/// Exact-match exchange: routing key must equal the binding pattern.
pub struct DirectExchange {
    name: String,
    bindings: Bindings,
}

impl DirectExchange {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bindings: Bindings::default(),
        }
    }
}

impl Exchange for DirectExchange {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ExchangeKind {
        ExchangeKind::Direct
    }

    fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    fn matches(&self, pattern: &str, routing_key: &str) -> bool {
        pattern == routing_key
    }
}

/// Wildcard exchange using AMQP topic patterns (`*`, `#`).
pub struct TopicExchange {
    name: String,
    bindings: Bindings,
}

impl TopicExchange {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bindings: Bindings::default(),
        }
    }
}

impl Exchange for TopicExchange {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ExchangeKind {
        ExchangeKind::Topic
    }

    fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    fn matches(&self, pattern: &str, routing_key: &str) -> bool {
        topic_matches(pattern, routing_key)
    }
}

/// Build an exchange of `kind`.
pub fn new_exchange(name: &str, kind: ExchangeKind) -> Arc<dyn Exchange> {
    match kind {
        ExchangeKind::Direct => Arc::new(DirectExchange::new(name)),
        ExchangeKind::Topic => Arc::new(TopicExchange::new(name)),
    }
}
