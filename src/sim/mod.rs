//! Simulated in-process AMQP broker.
//!
//! Models the subset of AMQP 0-9-1 an application's messaging layer needs in
//! tests: direct and topic exchanges, exchange-to-exchange bindings, queues
//! with competing consumers and acknowledgements, all without a network.
//!
//! Start a [`Server`] on a URL, then [`dial`] it to get a connection:
//!
//! ```no_run
//! # async fn demo() -> warren::Result<()> {
//! use warren::interfaces::Connection;
//! use warren::sim::{dial, Server};
//!
//! let server = Server::new("amqp://sim:5672/%2f");
//! server.start()?;
//! let conn = dial("amqp://sim:5672/%2f")?;
//! let channel = conn.channel().await?;
//! # let _ = channel;
//! server.stop();
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod channel;
pub mod exchange;
pub mod queue;
pub mod server;
pub mod topic;

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use broker::Broker;
pub use channel::SimChannel;
pub use exchange::{Exchange, ExchangeKind, MAX_EXCHANGE_HOPS};
pub use queue::{Queue, DEFAULT_QUEUE_CAPACITY};
pub use server::{dial, Server, SimConnection};

// Poisoned locks are recovered: broker state stays usable after a panicking holder.

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

pub(crate) fn read<T: ?Sized>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(|e| e.into_inner())
}

pub(crate) fn write<T: ?Sized>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(|e| e.into_inner())
}
