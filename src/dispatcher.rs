// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Dispatcher
//!
//! Registers one `ConsumerHandler` per queue and consumes every registered queue
//! concurrently. Failed deliveries are handed to the dead letter recoverer when one
//! is configured.

use crate::{
    consumer::consume,
    errors::{AmqpError, HandlerError},
    message::Message,
    recoverer::DeadLetterRecoverer,
};
use async_trait::async_trait;
use futures_util::{future::join_all, StreamExt};
use lapin::{options::BasicConsumeOptions, types::FieldTable, Channel};
use opentelemetry::global;
use std::sync::Arc;
use tracing::{debug, error};

/// Application logic run for every message consumed from a queue.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConsumerHandler: Send + Sync {
    async fn exec(&self, message: &Message) -> Result<(), HandlerError>;
}

/// Associates a queue with its handler.
#[derive(Clone)]
pub struct RabbitMQDispatcherDefinition {
    pub(crate) queue: String,
    pub(crate) handler: Arc<dyn ConsumerHandler>,
}

/// Runs registered handlers on the deliveries of their queues.
pub struct RabbitMQDispatcher {
    channel: Arc<Channel>,
    recoverer: Option<Arc<DeadLetterRecoverer>>,
    pub(crate) dispatchers_def: Vec<RabbitMQDispatcherDefinition>,
}

impl RabbitMQDispatcher {
    /// Creates a dispatcher with no handlers and no recoverer.
    ///
    /// # Parameters
    /// * `channel` - A channel to the RabbitMQ server
    ///
    /// # Returns
    /// A new RabbitMQDispatcher instance
    pub fn new(channel: Arc<Channel>) -> Self {
        RabbitMQDispatcher {
            channel,
            recoverer: None,
            dispatchers_def: vec![],
        }
    }

    /// Dead-letters deliveries whose handler fails.
    pub fn recoverer(mut self, recoverer: Arc<DeadLetterRecoverer>) -> Self {
        self.recoverer = Some(recoverer);
        self
    }

    /// Registers the handler for the deliveries of `queue`.
    ///
    /// # Parameters
    /// * `queue` - Name of the queue to consume from
    /// * `handler` - Handler to process its messages
    ///
    /// # Returns
    /// Self for method chaining
    pub fn register(mut self, queue: &str, handler: Arc<dyn ConsumerHandler>) -> Self {
        self.dispatchers_def.push(RabbitMQDispatcherDefinition {
            queue: queue.to_owned(),
            handler,
        });
        self
    }

    /// Consumes every registered queue until the consumers are cancelled.
    ///
    /// One consumer task is spawned per registered queue. A delivery is acked once
    /// handled or dead-lettered and nacked without requeue otherwise.
    ///
    /// # Returns
    /// Ok(()) once every consumer ended, or an AmqpError when a consumer could not
    /// be created or a consumer task failed
    pub async fn consume_blocking(&self) -> Result<(), AmqpError> {
        let mut spawns = vec![];

        for def in &self.dispatchers_def {
            let mut consumer = match self
                .channel
                .basic_consume(
                    &def.queue,
                    &def.queue,
                    BasicConsumeOptions {
                        no_local: false,
                        no_ack: false,
                        exclusive: false,
                        nowait: false,
                    },
                    FieldTable::default(),
                )
                .await
            {
                Err(err) => {
                    error!(error = err.to_string(), queue = %def.queue, "failure to create the consumer");
                    Err(AmqpError::ConsumerDeclarationError(def.queue.clone()))
                }
                Ok(c) => Ok(c),
            }?;

            debug!(queue = %def.queue, "consumer created");

            let def = def.clone();
            let recoverer = self.recoverer.clone();

            spawns.push(tokio::spawn({
                async move {
                    while let Some(result) = consumer.next().await {
                        match result {
                            Ok(delivery) => {
                                if let Err(err) = consume(
                                    &global::tracer("amqp consumer"),
                                    &delivery,
                                    &def,
                                    recoverer.as_deref(),
                                )
                                .await
                                {
                                    error!(error = err.to_string(), "error consume msg")
                                }
                            }

                            Err(err) => error!(error = err.to_string(), "errors consume msg"),
                        }
                    }
                }
            }));
        }

        let spawned = join_all(spawns).await;
        for res in spawned {
            if res.is_err() {
                error!("tokio process error");
                return Err(AmqpError::InternalError);
            }
        }

        Ok(())
    }
}
