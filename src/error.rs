//! Error taxonomy shared by every broker backend.

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Errors that can occur during broker operations.
///
/// Every variant is returned to the caller of the `Channel`/`Connection`
/// operation that produced it. Nothing is raised across task boundaries.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// A recognized option key holds a value of the wrong type.
    #[error("{key} option is of type {expected}")]
    ConfigType {
        key: String,
        expected: &'static str,
    },

    /// No binding matched the routing key. The message was discarded.
    #[error("No bindings to route: exchange '{exchange}', routing key '{routing_key}'")]
    NoRoute {
        exchange: String,
        routing_key: String,
    },

    /// An exclusive consumer holds the queue (or exclusivity was requested
    /// on a queue that already has consumers).
    #[error("Queue '{queue}' is busy: exclusive consumer conflict")]
    QueueBusy { queue: String },

    /// The operation referenced a name not present in the registry.
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    /// A conditional operation (e.g. delete if-unused) found its condition unmet.
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Unsupported exchange kind: {0}")]
    UnsupportedExchangeKind(String),

    /// Acknowledgment for a tag that is not outstanding (or an auto-ack delivery).
    #[error("Unknown delivery tag: {0}")]
    UnknownDeliveryTag(u64),

    #[error("Channel is closed")]
    ChannelClosed,

    #[error("Connection is closed")]
    ConnectionClosed,

    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[cfg(feature = "amqp")]
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),
}

impl BrokerError {
    /// Shorthand for a `ConfigType` error on `key`.
    pub fn config_type(key: &str, expected: &'static str) -> Self {
        Self::ConfigType {
            key: key.to_string(),
            expected,
        }
    }

    /// Shorthand for a `NotFound` error.
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// True for the unroutable-message outcome.
    pub fn is_no_route(&self) -> bool {
        matches!(self, Self::NoRoute { .. })
    }
}

impl From<::config::ConfigError> for BrokerError {
    fn from(e: ::config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}
