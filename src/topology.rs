//! Declares a configured topology through any channel.

use tracing::info;

use crate::config::{DestinationType, TopologyConfig};
use crate::error::Result;
use crate::interfaces::Channel;

/// Declare exchanges, then queues, then bindings. Stops at the first error.
#[tracing::instrument(
    name = "topology.declare",
    skip_all,
    fields(
        exchanges = topology.exchanges.len(),
        queues = topology.queues.len(),
        bindings = topology.bindings.len()
    )
)]
pub async fn declare(channel: &dyn Channel, topology: &TopologyConfig) -> Result<()> {
    for exchange in &topology.exchanges {
        channel
            .exchange_declare(&exchange.name, &exchange.kind, &exchange.options)
            .await?;
    }

    for queue in &topology.queues {
        channel.queue_declare(&queue.name, &queue.options).await?;
    }

    for binding in &topology.bindings {
        match binding.destination_type {
            DestinationType::Queue => {
                channel
                    .queue_bind(
                        &binding.destination,
                        &binding.routing_key,
                        &binding.source,
                        &binding.options,
                    )
                    .await?
            }
            DestinationType::Exchange => {
                channel
                    .exchange_bind(
                        &binding.destination,
                        &binding.routing_key,
                        &binding.source,
                        &binding.options,
                    )
                    .await?
            }
        }
    }

    info!("Topology declared");
    Ok(())
}
