//! Translation between broker-neutral types and lapin's wire types.

use std::collections::BTreeMap;

use async_trait::async_trait;
use lapin::acker::Acker;
use lapin::options::{BasicAckOptions, BasicNackOptions, BasicRejectOptions};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::{BasicProperties, ExchangeKind};
use tracing::debug;

use crate::delivery::{Acknowledger, Properties};
use crate::error::{BrokerError, Result};
use crate::options::{OptionValue, Table};

/// Exchange kinds pass through; unknown names become custom kinds.
pub fn exchange_kind(kind: &str) -> ExchangeKind {
    match kind {
        "direct" => ExchangeKind::Direct,
        "topic" => ExchangeKind::Topic,
        "fanout" => ExchangeKind::Fanout,
        "headers" => ExchangeKind::Headers,
        other => ExchangeKind::Custom(other.to_string()),
    }
}

pub fn field_table(table: &Table) -> FieldTable {
    let inner: BTreeMap<ShortString, AMQPValue> = table
        .iter()
        .map(|(k, v)| (ShortString::from(k.clone()), amqp_value(v)))
        .collect();
    FieldTable::from(inner)
}

fn amqp_value(value: &OptionValue) -> AMQPValue {
    match value {
        OptionValue::Bool(b) => AMQPValue::Boolean(*b),
        OptionValue::Int(i) => AMQPValue::LongLongInt(*i),
        OptionValue::Float(f) => AMQPValue::Double(*f),
        OptionValue::String(s) => AMQPValue::LongString(LongString::from(s.clone())),
        OptionValue::Table(t) => AMQPValue::FieldTable(field_table(t)),
    }
}

pub fn table(fields: &FieldTable) -> Table {
    fields
        .inner()
        .iter()
        .filter_map(|(k, v)| option_value(v).map(|v| (k.as_str().to_string(), v)))
        .collect()
}

/// Values with no neutral counterpart (arrays, decimals, void) are dropped.
fn option_value(value: &AMQPValue) -> Option<OptionValue> {
    let converted = match value {
        AMQPValue::Boolean(b) => OptionValue::Bool(*b),
        AMQPValue::ShortShortInt(i) => OptionValue::Int((*i).into()),
        AMQPValue::ShortShortUInt(i) => OptionValue::Int((*i).into()),
        AMQPValue::ShortInt(i) => OptionValue::Int((*i).into()),
        AMQPValue::ShortUInt(i) => OptionValue::Int((*i).into()),
        AMQPValue::LongInt(i) => OptionValue::Int((*i).into()),
        AMQPValue::LongUInt(i) => OptionValue::Int((*i).into()),
        AMQPValue::LongLongInt(i) => OptionValue::Int(*i),
        AMQPValue::Timestamp(t) => OptionValue::Int(i64::try_from(*t).ok()?),
        AMQPValue::Float(f) => OptionValue::Float((*f).into()),
        AMQPValue::Double(f) => OptionValue::Float(*f),
        AMQPValue::ShortString(s) => OptionValue::String(s.as_str().to_string()),
        AMQPValue::LongString(s) => {
            OptionValue::String(String::from_utf8_lossy(s.as_bytes()).into_owned())
        }
        AMQPValue::FieldTable(t) => OptionValue::Table(table(t)),
        other => {
            debug!(value = ?other, "Dropping header value with no neutral form");
            return None;
        }
    };
    Some(converted)
}

pub fn basic_properties(props: &Properties) -> BasicProperties {
    let mut out = BasicProperties::default();
    if !props.headers.is_empty() {
        out = out.with_headers(field_table(&props.headers));
    }
    if let Some(v) = &props.content_type {
        out = out.with_content_type(v.as_str().into());
    }
    if let Some(v) = &props.content_encoding {
        out = out.with_content_encoding(v.as_str().into());
    }
    if let Some(v) = props.delivery_mode {
        out = out.with_delivery_mode(v);
    }
    if let Some(v) = props.priority {
        out = out.with_priority(v);
    }
    if let Some(v) = &props.correlation_id {
        out = out.with_correlation_id(v.as_str().into());
    }
    if let Some(v) = &props.reply_to {
        out = out.with_reply_to(v.as_str().into());
    }
    if let Some(v) = &props.expiration {
        out = out.with_expiration(v.as_str().into());
    }
    if let Some(v) = &props.message_id {
        out = out.with_message_id(v.as_str().into());
    }
    if let Some(v) = props.timestamp {
        out = out.with_timestamp(v);
    }
    if let Some(v) = &props.kind {
        out = out.with_kind(v.as_str().into());
    }
    if let Some(v) = &props.user_id {
        out = out.with_user_id(v.as_str().into());
    }
    if let Some(v) = &props.app_id {
        out = out.with_app_id(v.as_str().into());
    }
    out
}

pub fn properties(props: &BasicProperties) -> Properties {
    let text = |v: &Option<ShortString>| v.as_ref().map(|s| s.as_str().to_string());
    Properties {
        headers: props.headers().as_ref().map(table).unwrap_or_default(),
        content_type: text(props.content_type()),
        content_encoding: text(props.content_encoding()),
        delivery_mode: *props.delivery_mode(),
        priority: *props.priority(),
        correlation_id: text(props.correlation_id()),
        reply_to: text(props.reply_to()),
        expiration: text(props.expiration()),
        message_id: text(props.message_id()),
        timestamp: *props.timestamp(),
        kind: text(props.kind()),
        user_id: text(props.user_id()),
        app_id: text(props.app_id()),
    }
}

/// Map lapin state errors onto the neutral closed-state errors.
pub fn wire_error(e: lapin::Error) -> BrokerError {
    match e {
        lapin::Error::InvalidChannelState(_) => BrokerError::ChannelClosed,
        lapin::Error::InvalidConnectionState(_) => BrokerError::ConnectionClosed,
        other => BrokerError::Amqp(other),
    }
}

/// Settles one lapin delivery. The acker is bound to its own delivery tag.
pub struct WireAcker(pub Acker);

#[async_trait]
impl Acknowledger for WireAcker {
    async fn ack(&self, _delivery_tag: u64, multiple: bool) -> Result<()> {
        self.0
            .ack(BasicAckOptions { multiple })
            .await
            .map_err(wire_error)
    }

    async fn nack(&self, _delivery_tag: u64, multiple: bool, requeue: bool) -> Result<()> {
        self.0
            .nack(BasicNackOptions { multiple, requeue })
            .await
            .map_err(wire_error)
    }

    async fn reject(&self, _delivery_tag: u64, requeue: bool) -> Result<()> {
        self.0
            .reject(BasicRejectOptions { requeue })
            .await
            .map_err(wire_error)
    }
}
