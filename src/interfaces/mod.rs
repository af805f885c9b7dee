//! Broker capability contracts.
//!
//! Application code talks to a broker only through these traits, so the same
//! code runs against a real AMQP broker or the in-process simulated one.
//!
//! Implementations:
//! - `sim::SimConnection` / `sim::SimChannel`: simulated in-process broker
//! - `amqp::AmqpConnection` / `amqp::AmqpChannel`: RabbitMQ via lapin (feature `amqp`)

mod channel;
mod connection;
mod consumer;

pub use channel::{Channel, QueueInfo};
pub use connection::{CloseReason, Connection};
pub use consumer::Consumer;
