//! Option bags and typed per-operation options.
//!
//! Every channel operation accepts an [`Options`] bag with well-known
//! optional keys. A bag is decoded into a typed struct before the operation
//! runs:
//! - unknown keys are ignored
//! - a known key holding a value of the wrong type fails with
//!   [`BrokerError::ConfigType`] naming the key, and the operation is not attempted
//!
//! Bags deserialize from YAML, so topology files can carry them verbatim.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::delivery::Properties;
use crate::error::{BrokerError, Result};

/// Ordered string-keyed table of option values (AMQP field table).
pub type Table = BTreeMap<String, OptionValue>;

/// A single option value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Table(Table),
}

impl From<bool> for OptionValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for OptionValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for OptionValue {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<u8> for OptionValue {
    fn from(v: u8) -> Self {
        Self::Int(v.into())
    }
}

impl From<u32> for OptionValue {
    fn from(v: u32) -> Self {
        Self::Int(v.into())
    }
}

impl From<f64> for OptionValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for OptionValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Table> for OptionValue {
    fn from(v: Table) -> Self {
        Self::Table(v)
    }
}

/// Generic option bag passed to every channel operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Options(BTreeMap<String, OptionValue>);

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<OptionValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Look up `key`. Keys folded to lowercase by a configuration layer
    /// still match.
    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.0.get(key).or_else(|| {
            self.0
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v)
        })
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Read a boolean option, `None` when absent.
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        match self.get(key) {
            None => Ok(None),
            Some(OptionValue::Bool(v)) => Ok(Some(*v)),
            Some(_) => Err(BrokerError::config_type(key, "bool")),
        }
    }

    /// Read a string option, `None` when absent.
    pub fn get_string(&self, key: &str) -> Result<Option<String>> {
        match self.get(key) {
            None => Ok(None),
            Some(OptionValue::String(v)) => Ok(Some(v.clone())),
            Some(_) => Err(BrokerError::config_type(key, "string")),
        }
    }

    /// Read a table option, `None` when absent.
    pub fn get_table(&self, key: &str) -> Result<Option<Table>> {
        match self.get(key) {
            None => Ok(None),
            Some(OptionValue::Table(v)) => Ok(Some(v.clone())),
            Some(_) => Err(BrokerError::config_type(key, "table")),
        }
    }

    /// Read an integer option that must fit in a `u8`.
    pub fn get_u8(&self, key: &str) -> Result<Option<u8>> {
        match self.get(key) {
            None => Ok(None),
            Some(OptionValue::Int(v)) => u8::try_from(*v)
                .map(Some)
                .map_err(|_| BrokerError::config_type(key, "u8")),
            Some(_) => Err(BrokerError::config_type(key, "u8")),
        }
    }

    /// Read a non-negative integer option.
    pub fn get_u64(&self, key: &str) -> Result<Option<u64>> {
        match self.get(key) {
            None => Ok(None),
            Some(OptionValue::Int(v)) => u64::try_from(*v)
                .map(Some)
                .map_err(|_| BrokerError::config_type(key, "u64")),
            Some(_) => Err(BrokerError::config_type(key, "u64")),
        }
    }

    fn flag(&self, key: &str) -> Result<bool> {
        Ok(self.get_bool(key)?.unwrap_or(false))
    }

    fn args(&self) -> Result<Table> {
        Ok(self.get_table("args")?.unwrap_or_default())
    }
}

impl<K: Into<String>, V: Into<OptionValue>> FromIterator<(K, V)> for Options {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Options for `exchange_declare`.
///
/// In the simulated broker every flag here is inert: there is no persistence,
/// no lazy deletion and no client/internal distinction. They are decoded and
/// validated so callers see the same errors against either backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExchangeDeclareOptions {
    pub durable: bool,
    pub auto_delete: bool,
    pub internal: bool,
    pub no_wait: bool,
    pub args: Table,
}

impl TryFrom<&Options> for ExchangeDeclareOptions {
    type Error = BrokerError;

    fn try_from(opts: &Options) -> Result<Self> {
        Ok(Self {
            durable: opts.flag("durable")?,
            auto_delete: opts.flag("autoDelete")?,
            internal: opts.flag("internal")?,
            no_wait: opts.flag("noWait")?,
            args: opts.args()?,
        })
    }
}

/// Options for exchange and queue bind/unbind. Inert in the simulated broker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindOptions {
    pub no_wait: bool,
    pub args: Table,
}

impl TryFrom<&Options> for BindOptions {
    type Error = BrokerError;

    fn try_from(opts: &Options) -> Result<Self> {
        Ok(Self {
            no_wait: opts.flag("noWait")?,
            args: opts.args()?,
        })
    }
}

/// Options for `queue_declare`. Inert in the simulated broker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueDeclareOptions {
    pub durable: bool,
    pub auto_delete: bool,
    pub exclusive: bool,
    pub no_wait: bool,
    pub args: Table,
}

impl TryFrom<&Options> for QueueDeclareOptions {
    type Error = BrokerError;

    fn try_from(opts: &Options) -> Result<Self> {
        Ok(Self {
            durable: opts.flag("durable")?,
            auto_delete: opts.flag("autoDelete")?,
            exclusive: opts.flag("exclusive")?,
            no_wait: opts.flag("noWait")?,
            args: opts.args()?,
        })
    }
}

/// Options for `queue_delete`.
///
/// `if_unused` and `if_empty` are enforced by the simulated broker;
/// `no_wait` is inert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueDeleteOptions {
    pub if_unused: bool,
    pub if_empty: bool,
    pub no_wait: bool,
}

impl TryFrom<&Options> for QueueDeleteOptions {
    type Error = BrokerError;

    fn try_from(opts: &Options) -> Result<Self> {
        Ok(Self {
            if_unused: opts.flag("ifUnused")?,
            if_empty: opts.flag("ifEmpty")?,
            no_wait: opts.flag("noWait")?,
        })
    }
}

/// Options for `consume`.
///
/// `auto_ack` and `exclusive` are enforced by the simulated broker;
/// `no_local`, `no_wait` and `args` are inert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsumeOptions {
    pub auto_ack: bool,
    pub exclusive: bool,
    pub no_local: bool,
    pub no_wait: bool,
    pub args: Table,
}

impl TryFrom<&Options> for ConsumeOptions {
    type Error = BrokerError;

    fn try_from(opts: &Options) -> Result<Self> {
        Ok(Self {
            auto_ack: opts.flag("autoAck")?,
            exclusive: opts.flag("exclusive")?,
            no_local: opts.flag("noLocal")?,
            no_wait: opts.flag("noWait")?,
            args: opts.args()?,
        })
    }
}

/// Options for `publish`: the message properties carried with the body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishOptions {
    pub properties: Properties,
}

impl TryFrom<&Options> for PublishOptions {
    type Error = BrokerError;

    fn try_from(opts: &Options) -> Result<Self> {
        let properties = Properties {
            headers: opts.get_table("headers")?.unwrap_or_default(),
            content_type: opts.get_string("contentType")?,
            content_encoding: opts.get_string("contentEncoding")?,
            delivery_mode: opts.get_u8("deliveryMode")?,
            priority: opts.get_u8("priority")?,
            correlation_id: opts.get_string("correlationId")?,
            reply_to: opts.get_string("replyTo")?,
            expiration: opts.get_string("expiration")?,
            message_id: opts.get_string("messageId")?,
            timestamp: opts.get_u64("timestamp")?,
            kind: opts.get_string("type")?,
            user_id: opts.get_string("userId")?,
            app_id: opts.get_string("appId")?,
        };
        Ok(Self { properties })
    }
}
