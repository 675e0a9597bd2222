// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Lapin Broker Client
//!
//! `BrokerClient` over a lapin channel, and the conversions between the crate's
//! JSON-valued headers and arguments and AMQP field tables.

use crate::{
    broker::BrokerClient,
    errors::AmqpError,
    exchange::ExchangeDefinition,
    message::{Headers, Message, MessageProperties, JSON_CONTENT_TYPE},
    otel,
    queue::{BindingDefinition, QueueDefinition},
};
use async_trait::async_trait;
use lapin::{
    message::Delivery,
    options::{
        BasicGetOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    types::{AMQPValue, FieldArray, FieldTable, LongString, ShortString},
    BasicProperties, Channel,
};
use serde_json::{Map, Number, Value};
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::{debug, error};
use uuid::Uuid;

/// Delay between two polls of an empty queue while receiving
const RECEIVE_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct AmqpBrokerClient {
    channel: Arc<Channel>,
}

impl AmqpBrokerClient {
    pub fn new(channel: Arc<Channel>) -> Arc<AmqpBrokerClient> {
        Arc::new(AmqpBrokerClient { channel })
    }
}

#[async_trait]
impl BrokerClient for AmqpBrokerClient {
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        let (kind, arguments) = def.broker_kind();

        match self
            .channel
            .exchange_declare(
                &def.name,
                kind,
                ExchangeDeclareOptions {
                    passive: false,
                    durable: def.durable,
                    auto_delete: def.auto_delete,
                    internal: def.internal,
                    nowait: false,
                },
                field_table(&arguments),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = %def.name,
                    "error to declare the exchange"
                );
                Err(AmqpError::DeclareExchangeError(def.name.clone()))
            }
            _ => Ok(()),
        }
    }

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), AmqpError> {
        match self
            .channel
            .queue_declare(
                &def.name,
                QueueDeclareOptions {
                    passive: false,
                    durable: def.durable,
                    exclusive: def.exclusive,
                    auto_delete: def.auto_delete,
                    nowait: false,
                },
                field_table(&def.arguments),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), name = %def.name, "error to declare the queue");
                Err(AmqpError::DeclareQueueError(def.name.clone()))
            }
            _ => Ok(()),
        }
    }

    async fn declare_binding(&self, def: &BindingDefinition) -> Result<(), AmqpError> {
        match self
            .channel
            .queue_bind(
                &def.queue,
                &def.exchange,
                &def.routing_key,
                QueueBindOptions { nowait: false },
                field_table(&def.arguments),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to bind queue to exchange");
                Err(AmqpError::BindingExchangeToQueueError(
                    def.exchange.clone(),
                    def.queue.clone(),
                ))
            }
            _ => Ok(()),
        }
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &Message,
    ) -> Result<(), AmqpError> {
        match self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                &message.body,
                basic_properties(message),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    exchange = exchange,
                    routing_key = routing_key,
                    "error publishing message"
                );
                Err(AmqpError::PublishingError(exchange.to_owned()))
            }
            _ => Ok(()),
        }
    }

    async fn send(&self, queue: &str, message: &Message) -> Result<(), AmqpError> {
        self.publish("", queue, message).await
    }

    async fn receive(&self, queue: &str, timeout: Duration) -> Result<Option<Message>, AmqpError> {
        let deadline = Instant::now() + timeout;

        loop {
            match self
                .channel
                .basic_get(queue, BasicGetOptions { no_ack: true })
                .await
            {
                Err(err) => {
                    error!(error = err.to_string(), queue = queue, "error receiving message");
                    return Err(AmqpError::ReceiveError(queue.to_owned()));
                }
                Ok(Some(msg)) => return Ok(Some(delivery_message(&msg.delivery, queue))),
                Ok(None) => {
                    let now = Instant::now();
                    if now >= deadline {
                        debug!(queue = queue, "queue is empty");
                        return Ok(None);
                    }
                    tokio::time::sleep(RECEIVE_POLL_INTERVAL.min(deadline - now)).await;
                }
            }
        }
    }
}

/// Publish properties of `message`, with the current trace context injected in its
/// headers and a fresh message id when it has none.
pub(crate) fn basic_properties(message: &Message) -> BasicProperties {
    let mut headers = message.headers().clone();
    otel::inject_context(&mut headers);

    let props = &message.properties;
    let mut basic = BasicProperties::default()
        .with_content_type(ShortString::from(
            props.content_type.as_deref().unwrap_or(JSON_CONTENT_TYPE),
        ))
        .with_message_id(ShortString::from(
            props
                .message_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
        ))
        .with_headers(field_table(&headers));

    if let Some(id) = &props.correlation_id {
        basic = basic.with_correlation_id(ShortString::from(id.as_str()));
    }
    if let Some(kind) = &props.kind {
        basic = basic.with_type(ShortString::from(kind.as_str()));
    }

    basic
}

/// Converts a delivery consumed from `queue`.
pub(crate) fn delivery_message(delivery: &Delivery, queue: &str) -> Message {
    let props = &delivery.properties;
    let text = |value: &Option<ShortString>| value.as_ref().map(|s| s.as_str().to_owned());

    Message {
        body: delivery.data.clone(),
        properties: MessageProperties {
            headers: props.headers().as_ref().map(headers).unwrap_or_default(),
            correlation_id: text(props.correlation_id()),
            content_type: text(props.content_type()),
            message_id: text(props.message_id()),
            kind: text(props.kind()),
            received_exchange: Some(delivery.exchange.as_str().to_owned()),
            received_routing_key: Some(delivery.routing_key.as_str().to_owned()),
            consumer_queue: Some(queue.to_owned()),
        },
    }
}

pub(crate) fn field_table(entries: &BTreeMap<String, Value>) -> FieldTable {
    let table: BTreeMap<ShortString, AMQPValue> = entries
        .iter()
        .map(|(k, v)| (ShortString::from(k.as_str()), amqp_value(v)))
        .collect();
    FieldTable::from(table)
}

pub(crate) fn headers(table: &FieldTable) -> Headers {
    table
        .inner()
        .iter()
        .map(|(k, v)| (k.as_str().to_owned(), json_value(v)))
        .collect()
}

/// Integers that fit are sent as 32 bit ints, which every AMQP client reads back
/// as a plain integer.
pub(crate) fn amqp_value(value: &Value) -> AMQPValue {
    match value {
        Value::Null => AMQPValue::Void,
        Value::Bool(b) => AMQPValue::Boolean(*b),
        Value::Number(n) => match (n.as_i64(), n.as_u64()) {
            (Some(i), _) => match i32::try_from(i) {
                Ok(small) => AMQPValue::LongInt(small),
                Err(_) => AMQPValue::LongLongInt(i),
            },
            (None, Some(u)) => AMQPValue::Double(u as f64),
            _ => AMQPValue::Double(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => AMQPValue::LongString(LongString::from(s.as_str())),
        Value::Array(items) => AMQPValue::FieldArray(FieldArray::from(
            items.iter().map(amqp_value).collect::<Vec<_>>(),
        )),
        Value::Object(map) => {
            let table: BTreeMap<ShortString, AMQPValue> = map
                .iter()
                .map(|(k, v)| (ShortString::from(k.as_str()), amqp_value(v)))
                .collect();
            AMQPValue::FieldTable(FieldTable::from(table))
        }
    }
}

pub(crate) fn json_value(value: &AMQPValue) -> Value {
    match value {
        AMQPValue::Boolean(b) => Value::Bool(*b),
        AMQPValue::ShortShortInt(v) => Value::from(*v),
        AMQPValue::ShortShortUInt(v) => Value::from(*v),
        AMQPValue::ShortInt(v) => Value::from(*v),
        AMQPValue::ShortUInt(v) => Value::from(*v),
        AMQPValue::LongInt(v) => Value::from(*v),
        AMQPValue::LongUInt(v) => Value::from(*v),
        AMQPValue::LongLongInt(v) => Value::from(*v),
        AMQPValue::Float(v) => float(f64::from(*v)),
        AMQPValue::Double(v) => float(*v),
        AMQPValue::DecimalValue(d) => float(f64::from(d.value) / 10f64.powi(i32::from(d.scale))),
        AMQPValue::ShortString(s) => Value::String(s.as_str().to_owned()),
        AMQPValue::LongString(s) => Value::String(String::from_utf8_lossy(s.as_bytes()).into_owned()),
        AMQPValue::FieldArray(items) => Value::Array(items.as_slice().iter().map(json_value).collect()),
        AMQPValue::Timestamp(t) => Value::from(*t),
        AMQPValue::FieldTable(table) => Value::Object(
            table
                .inner()
                .iter()
                .map(|(k, v)| (k.as_str().to_owned(), json_value(v)))
                .collect::<Map<String, Value>>(),
        ),
        AMQPValue::ByteArray(bytes) => {
            Value::String(String::from_utf8_lossy(bytes.as_slice()).into_owned())
        }
        AMQPValue::Void => Value::Null,
    }
}

fn float(v: f64) -> Value {
    Number::from_f64(v).map_or(Value::Null, Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::HEADER_INFO;
    use serde_json::json;

    #[test]
    fn small_integers_are_long_ints() {
        assert_eq!(amqp_value(&json!(3)), AMQPValue::LongInt(3));
        assert_eq!(
            amqp_value(&json!(5_000_000_000_i64)),
            AMQPValue::LongLongInt(5_000_000_000)
        );
    }

    #[test]
    fn nested_info_block_becomes_a_field_table() {
        let original = Headers::from([(
            HEADER_INFO.to_owned(),
            json!({ "application-name": "billing", "attempt": 1 }),
        )]);

        let table = field_table(&original);

        let Some(AMQPValue::FieldTable(info)) = table.inner().get(&ShortString::from(HEADER_INFO))
        else {
            panic!("info must be a field table");
        };
        assert_eq!(
            info.inner().get(&ShortString::from("application-name")),
            Some(&AMQPValue::LongString(LongString::from("billing")))
        );
        assert_eq!(headers(&table), original);
    }

    #[test]
    fn broker_values_read_back_as_json() {
        assert_eq!(json_value(&AMQPValue::ShortString("x-key".into())), json!("x-key"));
        assert_eq!(json_value(&AMQPValue::LongUInt(7)), json!(7));
        assert_eq!(json_value(&AMQPValue::Void), Value::Null);
        assert_eq!(
            json_value(&AMQPValue::FieldArray(FieldArray::from(vec![
                AMQPValue::Boolean(true),
                AMQPValue::Double(1.5),
            ]))),
            json!([true, 1.5])
        );
    }

    #[test]
    fn publish_properties_keep_message_identity() {
        let mut msg = Message::new("payload").with_header("x-original-queue", "orders");
        msg.properties.correlation_id = Some("order-42".to_owned());
        msg.properties.message_id = Some("m-1".to_owned());

        let props = basic_properties(&msg);

        assert_eq!(props.correlation_id().as_ref().map(|s| s.as_str()), Some("order-42"));
        assert_eq!(props.message_id().as_ref().map(|s| s.as_str()), Some("m-1"));
        assert_eq!(
            props.content_type().as_ref().map(|s| s.as_str()),
            Some(JSON_CONTENT_TYPE)
        );
        let table = props.headers().as_ref().unwrap();
        assert_eq!(headers(table)["x-original-queue"], json!("orders"));
    }
}
