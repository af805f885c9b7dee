//! Simulated queue.
//!
//! A queue buffers routed messages in arrival order and hands each one to
//! exactly one of its consumers (competing consumers, round-robin).
//!
//! Every consumer has a one-message inbox. Dispatch moves the head of the
//! ready buffer into the inbox of the next consumer in rotation that can take
//! it: not cancelled, inbox empty, and below its prefetch limit when it
//! acknowledges manually. A consumer's stream pops its inbox.
//!
//! State lives behind one mutex that is never held across an await point;
//! waiters park on a single `Notify` that is signalled after every change.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::Notify;
use tracing::{debug, info};

use super::lock;
use crate::delivery::{Acknowledger, Delivery, Message};
use crate::error::{BrokerError, Result};

/// Default number of ready messages a queue buffers before publishers wait.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Settings for one subscription.
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub tag: String,
    pub auto_ack: bool,
    pub exclusive: bool,
    /// Maximum unacknowledged deliveries (0 = unlimited). Ignored with `auto_ack`.
    pub prefetch: u16,
}

struct ConsumerSlot {
    id: u64,
    settings: ConsumerSettings,
    inbox: VecDeque<Message>,
    unacked: BTreeMap<u64, Message>,
    cancelled: bool,
}

impl ConsumerSlot {
    fn can_accept(&self) -> bool {
        if self.cancelled || !self.inbox.is_empty() {
            return false;
        }
        self.settings.auto_ack
            || self.settings.prefetch == 0
            || self.unacked.len() < usize::from(self.settings.prefetch)
    }
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Message>,
    consumers: Vec<ConsumerSlot>,
    cursor: usize,
    next_consumer_id: u64,
    closed: bool,
}

impl QueueState {
    fn slot(&self, id: u64) -> Option<&ConsumerSlot> {
        self.consumers.iter().find(|c| c.id == id)
    }

    fn slot_mut(&mut self, id: u64) -> Option<&mut ConsumerSlot> {
        self.consumers.iter_mut().find(|c| c.id == id)
    }

    fn active_consumers(&self) -> impl Iterator<Item = &ConsumerSlot> {
        self.consumers.iter().filter(|c| !c.cancelled)
    }

    /// Messages not yet handed to any consumer stream.
    fn undelivered(&self) -> usize {
        self.ready.len() + self.consumers.iter().map(|c| c.inbox.len()).sum::<usize>()
    }

    /// Move ready messages into consumer inboxes, round-robin.
    fn dispatch(&mut self) {
        let n = self.consumers.len();
        if n == 0 {
            return;
        }

        while !self.ready.is_empty() {
            let Some(idx) = (0..n)
                .map(|offset| (self.cursor + offset) % n)
                .find(|&idx| self.consumers[idx].can_accept())
            else {
                break;
            };

            if let Some(message) = self.ready.pop_front() {
                self.consumers[idx].inbox.push_back(message);
            }
            self.cursor = (idx + 1) % n;
        }
    }

    /// Put messages back at the head of the ready buffer, keeping their order.
    fn requeue_front(&mut self, messages: impl DoubleEndedIterator<Item = Message>) {
        for message in messages.rev() {
            self.ready.push_front(message);
        }
    }

    /// Remove a consumer; its unacknowledged and undelivered messages return
    /// to the head of the queue.
    fn remove_consumer(&mut self, id: u64) -> bool {
        let Some(pos) = self.consumers.iter().position(|c| c.id == id) else {
            return false;
        };
        let slot = self.consumers.remove(pos);
        if self.cursor > pos {
            self.cursor -= 1;
        }
        if self.cursor >= self.consumers.len() {
            self.cursor = 0;
        }

        let returned: Vec<Message> = slot
            .unacked
            .into_values()
            .map(Message::into_redelivered)
            .chain(slot.inbox)
            .collect();
        self.requeue_front(returned.into_iter());
        self.dispatch();
        true
    }
}

/// A named, ordered delivery sink.
pub struct Queue {
    name: String,
    capacity: usize,
    state: Mutex<QueueState>,
    changed: Notify,
}

impl Queue {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity: capacity.max(1),
            state: Mutex::new(QueueState::default()),
            changed: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Messages waiting for a consumer.
    pub fn message_count(&self) -> u32 {
        u32::try_from(lock(&self.state).undelivered()).unwrap_or(u32::MAX)
    }

    /// Consumers that have not been cancelled.
    pub fn consumer_count(&self) -> u32 {
        u32::try_from(lock(&self.state).active_consumers().count()).unwrap_or(u32::MAX)
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Whether the subscription `id` is still registered and not cancelled.
    pub fn is_active(&self, id: u64) -> bool {
        let state = lock(&self.state);
        !state.closed && state.active_consumers().any(|c| c.id == id)
    }

    /// Append a message.
    ///
    /// Waits while the ready buffer is at capacity. Fails with `NotFound` once
    /// the queue has been closed, including while waiting.
    pub async fn deposit(&self, message: Message) -> Result<()> {
        let mut message = Some(message);
        loop {
            let notified = self.changed.notified();
            let mut notified = std::pin::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = lock(&self.state);
                if state.closed {
                    return Err(BrokerError::not_found("queue", &self.name));
                }
                if state.ready.len() < self.capacity {
                    if let Some(message) = message.take() {
                        state.ready.push_back(message);
                    }
                    state.dispatch();
                    drop(state);
                    self.changed.notify_waiters();
                    return Ok(());
                }
            }

            debug!(queue = %self.name, "Queue at capacity, publisher waiting");
            notified.await;
        }
    }

    /// Register a consumer and return its delivery stream.
    ///
    /// Fails with `QueueBusy` when an exclusive consumer holds the queue, or
    /// when exclusivity is requested while other consumers exist.
    pub fn subscribe(
        self: &Arc<Self>,
        settings: ConsumerSettings,
        delivery_tags: Arc<AtomicU64>,
    ) -> Result<Subscription> {
        let id = {
            let mut state = lock(&self.state);
            if state.closed {
                return Err(BrokerError::not_found("queue", &self.name));
            }

            let held_exclusively = state.active_consumers().any(|c| c.settings.exclusive);
            let has_consumers = state.active_consumers().next().is_some();
            if held_exclusively || (settings.exclusive && has_consumers) {
                return Err(BrokerError::QueueBusy {
                    queue: self.name.clone(),
                });
            }

            state.next_consumer_id += 1;
            let id = state.next_consumer_id;
            state.consumers.push(ConsumerSlot {
                id,
                settings: settings.clone(),
                inbox: VecDeque::new(),
                unacked: BTreeMap::new(),
                cancelled: false,
            });
            state.dispatch();
            id
        };
        self.changed.notify_waiters();

        info!(
            queue = %self.name,
            consumer_tag = %settings.tag,
            auto_ack = settings.auto_ack,
            prefetch = settings.prefetch,
            "Consumer subscribed"
        );

        Ok(Subscription {
            queue: Arc::clone(self),
            id,
            settings,
            delivery_tags,
        })
    }

    /// Cancel the subscription `id`. Its stream ends; unacknowledged
    /// deliveries are requeued once the stream finishes or is dropped.
    ///
    /// Other subscriptions sharing the same consumer tag are untouched.
    pub fn cancel(&self, id: u64) -> bool {
        let cancelled = {
            let mut state = lock(&self.state);
            let Some(slot) = state.slot_mut(id).filter(|c| !c.cancelled) else {
                return false;
            };
            slot.cancelled = true;
            let tag = slot.settings.tag.clone();
            let returned: Vec<Message> = slot.inbox.drain(..).collect();
            state.requeue_front(returned.into_iter());
            state.dispatch();
            tag
        };
        self.changed.notify_waiters();
        debug!(queue = %self.name, consumer_tag = %cancelled, "Consumer cancelled");
        true
    }

    /// Close the queue: discard undelivered messages, end every consumer
    /// stream and release waiting publishers.
    ///
    /// Returns the number of undelivered messages discarded.
    pub fn close(&self) -> u32 {
        let discarded = {
            let mut state = lock(&self.state);
            Self::close_locked(&mut state)
        };
        self.changed.notify_waiters();
        discarded
    }

    /// Close only if the delete preconditions hold.
    pub fn close_if(&self, if_unused: bool, if_empty: bool) -> Result<u32> {
        let discarded = {
            let mut state = lock(&self.state);
            if if_unused && state.active_consumers().next().is_some() {
                return Err(BrokerError::PreconditionFailed(format!(
                    "queue '{}' in use",
                    self.name
                )));
            }
            if if_empty && state.undelivered() > 0 {
                return Err(BrokerError::PreconditionFailed(format!(
                    "queue '{}' not empty",
                    self.name
                )));
            }
            Self::close_locked(&mut state)
        };
        self.changed.notify_waiters();
        Ok(discarded)
    }

    fn close_locked(state: &mut QueueState) -> u32 {
        if state.closed {
            return 0;
        }
        let discarded = u32::try_from(state.undelivered()).unwrap_or(u32::MAX);
        state.closed = true;
        state.ready.clear();
        for slot in state.consumers.iter_mut() {
            slot.inbox.clear();
            slot.unacked.clear();
        }
        discarded
    }

    fn settle(&self, consumer: u64, tag: u64, multiple: bool, requeue: Option<bool>) -> Result<()> {
        {
            let mut state = lock(&self.state);
            let slot = state
                .slot_mut(consumer)
                .ok_or(BrokerError::UnknownDeliveryTag(tag))?;
            if !slot.unacked.contains_key(&tag) {
                return Err(BrokerError::UnknownDeliveryTag(tag));
            }

            let settled: Vec<Message> = if multiple {
                let later = slot.unacked.split_off(&(tag + 1));
                std::mem::replace(&mut slot.unacked, later)
                    .into_values()
                    .collect()
            } else {
                slot.unacked.remove(&tag).into_iter().collect()
            };

            if requeue == Some(true) && !state.closed {
                state.requeue_front(settled.into_iter().map(Message::into_redelivered));
            }
            state.dispatch();
        }
        self.changed.notify_waiters();
        Ok(())
    }

    fn unsubscribe(&self, consumer: u64) {
        let removed = lock(&self.state).remove_consumer(consumer);
        if removed {
            self.changed.notify_waiters();
        }
    }
}

/// One consumer's handle on a queue.
///
/// Dropping it removes the consumer; unacknowledged deliveries are requeued.
pub struct Subscription {
    queue: Arc<Queue>,
    id: u64,
    settings: ConsumerSettings,
    delivery_tags: Arc<AtomicU64>,
}

impl Subscription {
    pub fn tag(&self) -> &str {
        &self.settings.tag
    }

    /// Queue-local identity of this subscription.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next delivery; `None` once cancelled or the queue closes.
    pub async fn next_delivery(&self) -> Option<Delivery> {
        loop {
            let notified = self.queue.changed.notified();
            let mut notified = std::pin::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = lock(&self.queue.state);
                if state.closed {
                    return None;
                }
                let slot = state.slot_mut(self.id)?;
                if slot.cancelled {
                    return None;
                }

                if let Some(message) = slot.inbox.pop_front() {
                    let tag = self.delivery_tags.fetch_add(1, Ordering::SeqCst) + 1;
                    if !self.settings.auto_ack {
                        slot.unacked.insert(tag, message.clone());
                    }
                    state.dispatch();
                    drop(state);
                    self.queue.changed.notify_waiters();

                    let acker: Option<Arc<dyn Acknowledger>> = if self.settings.auto_ack {
                        None
                    } else {
                        Some(Arc::new(QueueAcker {
                            queue: Arc::downgrade(&self.queue),
                            consumer: self.id,
                        }))
                    };
                    return Some(Delivery::new(message, tag, &self.settings.tag, acker));
                }
            }

            notified.await;
        }
    }

    /// Turn the subscription into a stream of deliveries.
    pub fn into_stream(self) -> impl Stream<Item = Delivery> + Send + 'static {
        futures::stream::unfold(self, |sub| async move {
            let delivery = sub.next_delivery().await?;
            Some((delivery, sub))
        })
    }

    /// Unacknowledged deliveries held by this consumer.
    pub fn unacked_count(&self) -> usize {
        lock(&self.queue.state)
            .slot(self.id)
            .map(|s| s.unacked.len())
            .unwrap_or(0)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.queue.unsubscribe(self.id);
    }
}

/// Settles deliveries against the queue they came from.
struct QueueAcker {
    queue: Weak<Queue>,
    consumer: u64,
}

impl QueueAcker {
    fn queue(&self, tag: u64) -> Result<Arc<Queue>> {
        self.queue
            .upgrade()
            .ok_or(BrokerError::UnknownDeliveryTag(tag))
    }
}

#[async_trait]
impl Acknowledger for QueueAcker {
    async fn ack(&self, delivery_tag: u64, multiple: bool) -> Result<()> {
        self.queue(delivery_tag)?
            .settle(self.consumer, delivery_tag, multiple, None)
    }

    async fn nack(&self, delivery_tag: u64, multiple: bool, requeue: bool) -> Result<()> {
        self.queue(delivery_tag)?
            .settle(self.consumer, delivery_tag, multiple, Some(requeue))
    }

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        self.queue(delivery_tag)?
            .settle(self.consumer, delivery_tag, false, Some(requeue))
    }
}
