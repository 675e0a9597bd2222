// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Messages
//!
//! Broker-neutral representation of a message travelling through the recoverer,
//! the requeue engine and the publish-side post processors, together with the
//! wire-visible header names those components stamp.

use serde_json::Value;
use std::collections::BTreeMap;

/// Message headers. Values are JSON values so that strings, integers and nested
/// tables (the `info` block) share one representation.
pub type Headers = BTreeMap<String, Value>;

/// End-to-end request identifier, mirrored from the correlation id property
pub const HEADER_CORRELATION_ID: &str = "correlation-id";
/// Informational block stamped before publish
pub const HEADER_INFO: &str = "info";
/// Failure diagnostics stamped by the recoverer
pub const HEADER_EXCEPTION_STACKTRACE: &str = "x-exception-stacktrace";
pub const HEADER_EXCEPTION_MESSAGE: &str = "x-exception-message";
pub const HEADER_EXCEPTION_ROOT_CAUSE_MESSAGE: &str = "x-exception-root-cause-message";
/// Provenance stamped by the recoverer and read back by the requeue consumer
pub const HEADER_ORIGINAL_EXCHANGE: &str = "x-original-exchange";
pub const HEADER_ORIGINAL_ROUTING_KEY: &str = "x-original-routingKey";
pub const HEADER_ORIGINAL_QUEUE: &str = "x-original-queue";
pub const HEADER_RECOVER_TIME: &str = "x-recover-time";
/// Computed dead letter target
pub const HEADER_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
pub const HEADER_DEAD_LETTER_QUEUE: &str = "x-dead-letter-queue";
/// Per-message requeue counter maintained by the threshold policy
pub const HEADER_REQUEUE_COUNT: &str = "x-requeue-count";

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Properties carried alongside the payload.
///
/// The `received_*` and `consumer_queue` fields describe where a consumed message
/// came from; they are filled by the consuming side and are never published.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageProperties {
    pub headers: Headers,
    pub correlation_id: Option<String>,
    pub content_type: Option<String>,
    pub message_id: Option<String>,
    pub kind: Option<String>,
    pub received_exchange: Option<String>,
    pub received_routing_key: Option<String>,
    pub consumer_queue: Option<String>,
}

/// A message body with its properties.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    pub body: Vec<u8>,
    pub properties: MessageProperties,
}

impl Message {
    pub fn new(body: impl Into<Vec<u8>>) -> Message {
        Message {
            body: body.into(),
            properties: MessageProperties::default(),
        }
    }

    /// Serializes `payload` as JSON and marks the content type accordingly.
    pub fn json<T: serde::Serialize>(payload: &T) -> Result<Message, serde_json::Error> {
        let mut msg = Message::new(serde_json::to_vec(payload)?);
        msg.properties.content_type = Some(JSON_CONTENT_TYPE.to_owned());
        Ok(msg)
    }

    pub fn with_header(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.headers.insert(key.to_owned(), value.into());
        self
    }

    pub fn with_consumer_queue(mut self, queue: &str) -> Self {
        self.properties.consumer_queue = Some(queue.to_owned());
        self
    }

    pub fn headers(&self) -> &Headers {
        &self.properties.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.properties.headers
    }

    /// Returns a header as a string slice when it holds a JSON string.
    pub fn header_str(&self, key: &str) -> Option<&str> {
        self.properties.headers.get(key).and_then(Value::as_str)
    }
}
