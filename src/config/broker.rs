//! Broker selection and connection factory.

use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use crate::error::Result;
use crate::interfaces::Connection;
use crate::sim;

/// Broker type discriminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerType {
    /// In-process simulated broker (no external dependencies).
    #[default]
    Simulated,
    /// AMQP 0-9-1 broker such as RabbitMQ. Requires the `amqp` feature.
    Amqp,
}

/// Broker connection configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    #[serde(rename = "type")]
    pub broker_type: BrokerType,
    /// Broker URL. For the simulated broker this names the in-process server.
    pub url: String,
    /// Ready messages a simulated queue buffers before publishers wait.
    pub queue_capacity: usize,
    /// Simulated only: start a server on `url` if none is running.
    pub start_embedded: bool,
    /// AMQP only: connection attempts before giving up.
    pub connect_retries: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            broker_type: BrokerType::Simulated,
            url: "amqp://localhost:5672/%2f".to_string(),
            queue_capacity: sim::DEFAULT_QUEUE_CAPACITY,
            start_embedded: true,
            connect_retries: 30,
        }
    }
}

/// Connect to the broker described by `config`.
pub async fn connect(config: &BrokerConfig) -> Result<Arc<dyn Connection>> {
    match config.broker_type {
        BrokerType::Simulated => {
            if config.start_embedded {
                sim::server::ensure_running(&config.url, config.queue_capacity)?;
            }
            let conn = sim::dial(&config.url)?;
            info!(broker_type = "simulated", url = %config.url, "Broker connection established");
            Ok(Arc::new(conn))
        }
        BrokerType::Amqp => {
            #[cfg(feature = "amqp")]
            {
                let url = config.url.as_str();
                let conn = crate::utils::bootstrap::connect_with_retry(
                    "amqp broker",
                    url,
                    config.connect_retries,
                    || crate::amqp::dial(url),
                )
                .await?;
                info!(broker_type = "amqp", "Broker connection established");
                Ok(Arc::new(conn))
            }

            #[cfg(not(feature = "amqp"))]
            {
                Err(crate::error::BrokerError::Config(
                    "AMQP support requires the 'amqp' feature. Rebuild with --features amqp"
                        .to_string(),
                ))
            }
        }
    }
}
