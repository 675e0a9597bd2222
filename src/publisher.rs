// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Publisher
//!
//! Runs the configured post processors over every outbound message, in registration
//! order, and hands the result to the broker client.

use crate::{
    broker::BrokerClient,
    config::TopologyConfig,
    errors::AmqpError,
    message::Message,
    otel::TraceContext,
    processor::{CorrelationPostProcessor, InfoHeaderPostProcessor, MessagePostProcessor},
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error};

pub struct Publisher {
    broker: Arc<dyn BrokerClient>,
    processors: Vec<Arc<dyn MessagePostProcessor>>,
}

impl Publisher {
    /// Creates a publisher without post processors.
    pub fn new(broker: Arc<dyn BrokerClient>) -> Publisher {
        Publisher {
            broker,
            processors: vec![],
        }
    }

    /// Publisher wired with the correlation and informational header processors.
    pub fn from_config(
        broker: Arc<dyn BrokerClient>,
        cfg: &TopologyConfig,
        app_name: &str,
        trace: Option<Arc<dyn TraceContext>>,
    ) -> Publisher {
        Self::new(broker)
            .with_processor(Arc::new(CorrelationPostProcessor::new(trace)))
            .with_processor(Arc::new(InfoHeaderPostProcessor::new(
                app_name,
                cfg.info_headers.clone(),
            )))
    }

    /// Appends a post processor; processors run in the order they were added.
    pub fn with_processor(mut self, processor: Arc<dyn MessagePostProcessor>) -> Self {
        self.processors.push(processor);
        self
    }

    /// Publishes `message` to `exchange` with `routing_key`.
    ///
    /// Every registered post processor runs on the message first, in registration
    /// order, so correlation and informational headers are in place before the
    /// message reaches the broker.
    ///
    /// # Parameters
    /// * `exchange` - Name of the target exchange
    /// * `routing_key` - Routing key used by the exchange
    /// * `message` - The message to publish
    ///
    /// # Returns
    /// * `Result<(), AmqpError>` - Ok once the broker accepted the message
    pub async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        mut message: Message,
    ) -> Result<(), AmqpError> {
        self.process(&mut message);

        debug!(
            exchange = exchange,
            routing_key = routing_key,
            correlation_id = message.properties.correlation_id.as_deref().unwrap_or_default(),
            "publishing message"
        );

        self.broker.publish(exchange, routing_key, &message).await
    }

    /// Serializes `payload` as JSON and publishes it.
    pub async fn publish_json<T: Serialize + Sync>(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &T,
    ) -> Result<(), AmqpError> {
        let message = Message::json(payload).map_err(|err| {
            error!(error = err.to_string(), "failure to serialize payload");
            AmqpError::SerializationError(err.to_string())
        })?;

        self.publish(exchange, routing_key, message).await
    }

    /// Sends straight to `queue` through the default exchange.
    pub async fn send(&self, queue: &str, mut message: Message) -> Result<(), AmqpError> {
        self.process(&mut message);
        self.broker.send(queue, &message).await
    }

    fn process(&self, message: &mut Message) {
        for processor in &self.processors {
            processor.process(message);
        }
    }
}
