//! Warren - broker-agnostic AMQP messaging
//!
//! Application code publishes and consumes through the [`interfaces`]
//! traits. Behind them sits either a real AMQP broker (feature `amqp`) or
//! [`sim`], an in-process broker that routes through direct and topic
//! exchanges into queues with competing consumers, for tests that should not
//! need a network.

#[cfg(feature = "amqp")]
pub mod amqp;
pub mod config;
pub mod delivery;
pub mod error;
pub mod interfaces;
pub mod options;
pub mod sim;
pub mod stream;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod topology;
pub mod utils;

pub use delivery::{Delivery, Message, Properties};
pub use error::{BrokerError, Result};
pub use options::{OptionValue, Options, Table};
