//! Per-scenario broker context.
//!
//! Every scenario gets its own simulated server on a fresh URL, so scenarios
//! never see each other's exchanges or queues.

use std::fmt;
use std::sync::Arc;

use warren::interfaces::{Channel, Connection};
use warren::sim::{dial, Broker, Server, SimConnection};
use warren::test_utils::unique_url;

pub struct BrokerContext {
    pub server: Server,
    pub connection: SimConnection,
    pub channel: Box<dyn Channel>,
}

impl BrokerContext {
    pub async fn start() -> Self {
        let server = Server::new(unique_url());
        server.start().expect("Failed to start simulated server");
        let connection = dial(server.url()).expect("Failed to dial simulated server");
        let channel = connection
            .channel()
            .await
            .expect("Failed to open channel");
        Self {
            server,
            connection,
            channel,
        }
    }

    pub fn broker(&self) -> Arc<Broker> {
        self.server.broker().expect("Server not running")
    }
}

impl fmt::Debug for BrokerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerContext")
            .field("url", &self.server.url())
            .field("running", &self.server.is_running())
            .finish()
    }
}
