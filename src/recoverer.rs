// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Dead Letter Recoverer
//!
//! Invoked when processing a delivery fails for good. The recoverer stamps failure
//! diagnostics and provenance headers on the message, runs the registered exception
//! handlers, each in isolation, and republishes the message to the dead letter
//! exchange with the derived dead letter queue name as routing key.

use crate::{
    broker::BrokerClient,
    config::{TopologyConfig, DEFAULT_DEAD_LETTER_QUEUE_POSTFIX},
    errors::{AmqpError, HandlerError},
    message::*,
};
use chrono::Utc;
use serde_json::Value;
use std::{
    error::Error,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};
use tracing::{debug, error, warn};

/// Content types whose payload is logged as text
const READABLE_CONTENT_TYPES: [&str; 4] = [
    "text/plain",
    "application/json",
    "text/x-json",
    "application/xml",
];

/// A pluggable reaction to a failed delivery, run before the message is dead-lettered.
pub trait MessageExceptionHandler: Send + Sync {
    fn handle(&self, message: &Message, cause: &(dyn Error + 'static)) -> Result<(), HandlerError>;
}

/// Extra headers stamped on a failed message after the recovery headers, overriding
/// any of them it repeats.
///
/// Implemented for closures taking the message and the cause.
pub trait AdditionalHeaders: Send + Sync {
    fn headers(&self, message: &Message, cause: &(dyn Error + 'static)) -> Headers;
}

impl<F> AdditionalHeaders for F
where
    F: Fn(&Message, &(dyn Error + 'static)) -> Headers + Send + Sync,
{
    fn headers(&self, message: &Message, cause: &(dyn Error + 'static)) -> Headers {
        self(message, cause)
    }
}

/// Logs the failed message, its headers and the cause.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMessageExceptionHandler;

impl LogMessageExceptionHandler {
    fn message_string(message: &Message) -> String {
        let readable = message
            .properties
            .content_type
            .as_deref()
            .is_some_and(|ct| READABLE_CONTENT_TYPES.contains(&ct));

        if readable {
            String::from_utf8_lossy(&message.body).into_owned()
        } else {
            format!("{:?}(byte[{}])", message.body, message.body.len())
        }
    }
}

impl MessageExceptionHandler for LogMessageExceptionHandler {
    fn handle(&self, message: &Message, cause: &(dyn Error + 'static)) -> Result<(), HandlerError> {
        warn!(
            queue = message.header_str(HEADER_ORIGINAL_QUEUE).unwrap_or_default(),
            message = Self::message_string(message),
            headers = ?message.headers(),
            cause = cause_chain(cause),
            "exception occurred while processing the message"
        );
        Ok(())
    }
}

/// Captures failed deliveries and republishes them to the dead letter exchange.
pub struct DeadLetterRecoverer {
    broker: Arc<dyn BrokerClient>,
    dead_letter_exchange: String,
    queue_postfix: String,
    handlers: Vec<Arc<dyn MessageExceptionHandler>>,
    additional_headers: Option<Arc<dyn AdditionalHeaders>>,
}

impl DeadLetterRecoverer {
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        dead_letter_exchange: &str,
        queue_postfix: &str,
    ) -> DeadLetterRecoverer {
        DeadLetterRecoverer {
            broker,
            dead_letter_exchange: dead_letter_exchange.to_owned(),
            queue_postfix: queue_postfix.to_owned(),
            handlers: vec![],
            additional_headers: None,
        }
    }

    /// Uses the configured dead letter exchange and postfix, or the fallbacks.
    pub fn from_config(broker: Arc<dyn BrokerClient>, cfg: &TopologyConfig) -> DeadLetterRecoverer {
        let postfix = cfg
            .dead_letter
            .as_ref()
            .map_or(DEFAULT_DEAD_LETTER_QUEUE_POSTFIX, |dl| dl.postfix());

        Self::new(broker, cfg.dead_letter_exchange_name(), postfix)
    }

    /// Registers a handler; handlers run in registration order.
    pub fn handler(mut self, handler: Arc<dyn MessageExceptionHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn additional_headers(mut self, additional: Arc<dyn AdditionalHeaders>) -> Self {
        self.additional_headers = Some(additional);
        self
    }

    pub fn dead_letter_queue_name(&self, queue: &str) -> String {
        format!("{}{}", queue, self.queue_postfix)
    }

    /// Enriches `message` and republishes it to the dead letter exchange.
    ///
    /// Handler failures are logged and swallowed; a failed publish is returned.
    ///
    /// # Parameters
    /// * `message` - the failed message, stamped in place
    /// * `cause` - the error its processing ended with
    ///
    /// # Returns
    /// * `Result<(), AmqpError>` - Ok once the message reached the dead letter exchange
    pub async fn recover(
        &self,
        message: &mut Message,
        cause: &(dyn Error + Send + Sync + 'static),
    ) -> Result<(), AmqpError> {
        let queue = message.properties.consumer_queue.clone();
        if queue.is_none() {
            warn!("recovering a message without consumer queue");
        }

        let dead_letter_queue = self.dead_letter_queue_name(queue.as_deref().unwrap_or_default());
        let props = &message.properties;
        let stamps = [
            (HEADER_EXCEPTION_STACKTRACE, Value::String(cause_chain(cause))),
            (HEADER_EXCEPTION_MESSAGE, Value::String(cause.to_string())),
            (HEADER_EXCEPTION_ROOT_CAUSE_MESSAGE, Value::String(root_cause(cause).to_string())),
            (HEADER_ORIGINAL_EXCHANGE, optional(&props.received_exchange)),
            (HEADER_ORIGINAL_ROUTING_KEY, optional(&props.received_routing_key)),
            (HEADER_ORIGINAL_QUEUE, optional(&queue)),
            (HEADER_RECOVER_TIME, Value::String(Utc::now().to_rfc3339())),
            (HEADER_DEAD_LETTER_EXCHANGE, Value::String(self.dead_letter_exchange.clone())),
            (HEADER_DEAD_LETTER_QUEUE, Value::String(dead_letter_queue.clone())),
        ];

        let headers = message.headers_mut();
        for (key, value) in stamps {
            headers.insert(key.to_owned(), value);
        }

        if let Some(id) = message.header_str(HEADER_CORRELATION_ID).map(str::to_owned) {
            message.properties.correlation_id = Some(id);
        }

        if let Some(additional) = &self.additional_headers {
            let extra = additional.headers(message, cause);
            debug!(count = extra.len(), "adding additional headers to the failed message");
            message.headers_mut().extend(extra);
        }

        for (idx, handler) in self.handlers.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| handler.handle(message, cause))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!(
                    handler = idx,
                    error = err.to_string(),
                    "message exception handler failed"
                ),
                Err(_) => error!(handler = idx, "message exception handler panicked"),
            }
        }

        self.broker
            .publish(&self.dead_letter_exchange, &dead_letter_queue, message)
            .await?;

        warn!(
            exchange = %self.dead_letter_exchange,
            routing_key = %dead_letter_queue,
            cause = cause.to_string(),
            "republished failed message to dead letter exchange"
        );

        Ok(())
    }
}

fn optional(value: &Option<String>) -> Value {
    value.clone().map_or(Value::Null, Value::String)
}

fn root_cause<'a>(cause: &'a (dyn Error + 'static)) -> &'a (dyn Error + 'static) {
    let mut current = cause;
    while let Some(source) = current.source() {
        current = source;
    }
    current
}

/// Renders the error and every source beneath it, outermost first.
pub(crate) fn cause_chain(cause: &(dyn Error + 'static)) -> String {
    let mut rendered = cause.to_string();
    let mut source = cause.source();
    let mut depth = 0;

    if source.is_some() {
        rendered.push_str("\n\nCaused by:");
    }
    while let Some(err) = source {
        rendered.push_str(&format!("\n    {}: {}", depth, err));
        depth += 1;
        source = err.source();
    }

    rendered
}
