//! Declarative topology configuration.

use serde::Deserialize;

use crate::options::Options;

/// Exchanges, queues and bindings to declare, in that order.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    pub exchanges: Vec<ExchangeConfig>,
    pub queues: Vec<QueueConfig>,
    pub bindings: Vec<BindingConfig>,
}

impl TopologyConfig {
    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty() && self.queues.is_empty() && self.bindings.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub name: String,
    /// `direct` or `topic` (other kinds only against a real broker).
    pub kind: String,
    pub options: Options,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            kind: "direct".to_string(),
            options: Options::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub name: String,
    pub options: Options,
}

/// What a binding points at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationType {
    #[default]
    Queue,
    Exchange,
}

/// `source --(routing_key)--> destination`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BindingConfig {
    /// Exchange the binding is attached to.
    pub source: String,
    pub destination: String,
    pub destination_type: DestinationType,
    pub routing_key: String,
    pub options: Options,
}
