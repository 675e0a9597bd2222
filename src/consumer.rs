// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Consumer
//!
//! Processing of a single delivery: the registered handler runs first; when it fails
//! the message goes through the dead letter recoverer. A delivery is acked once it
//! was handled or dead-lettered, and nacked without requeue when recovery is not
//! possible, leaving it to the queue's broker-level dead letter arguments.

use crate::{
    client::delivery_message,
    dispatcher::{ConsumerHandler, RabbitMQDispatcherDefinition},
    errors::AmqpError,
    message::Message,
    otel,
    recoverer::DeadLetterRecoverer,
};
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicNackOptions},
};
use opentelemetry::{
    global::BoxedTracer,
    trace::{Span, Status},
};
use std::borrow::Cow;
use tracing::{debug, error, warn};

/// Settlement of a processed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Ack,
    Reject,
}

/// Runs `handler` on `message`, recovering it on failure.
pub(crate) async fn process(
    handler: &dyn ConsumerHandler,
    recoverer: Option<&DeadLetterRecoverer>,
    message: &mut Message,
) -> Outcome {
    let Err(err) = handler.exec(message).await else {
        debug!("message successfully processed");
        return Outcome::Ack;
    };

    warn!(error = err.to_string(), "error whiling handling msg");

    let Some(recoverer) = recoverer else {
        return Outcome::Reject;
    };

    match recoverer.recover(message, err.as_ref()).await {
        Ok(()) => Outcome::Ack,
        Err(e) => {
            error!(error = e.to_string(), "failure to recover msg, rejecting it");
            Outcome::Reject
        }
    }
}

/// Consumes one delivery from the queue of `def`.
pub(crate) async fn consume(
    tracer: &BoxedTracer,
    delivery: &Delivery,
    def: &RabbitMQDispatcherDefinition,
    recoverer: Option<&DeadLetterRecoverer>,
) -> Result<(), AmqpError> {
    let mut message = delivery_message(delivery, &def.queue);
    let mut span = otel::new_span(message.headers(), tracer, &def.queue);

    debug!(
        queue = %def.queue,
        exchange = delivery.exchange.as_str(),
        "received message"
    );

    match process(def.handler.as_ref(), recoverer, &mut message).await {
        Outcome::Ack => match delivery.ack(BasicAckOptions { multiple: false }).await {
            Err(e) => {
                error!("error whiling ack msg");
                span.record_error(&e);
                span.set_status(Status::Error {
                    description: Cow::from("error to ack msg"),
                });
                Err(AmqpError::AckMessageError)
            }
            _ => {
                span.set_status(Status::Ok);
                Ok(())
            }
        },
        Outcome::Reject => {
            span.record_error(&AmqpError::ConsumerError(def.queue.clone()));
            span.set_status(Status::Error {
                description: Cow::from("msg rejected"),
            });

            match delivery
                .nack(BasicNackOptions {
                    multiple: false,
                    requeue: false,
                })
                .await
            {
                Err(e) => {
                    error!("error whiling nack msg");
                    span.record_error(&e);
                    Err(AmqpError::NackMessageError)
                }
                _ => Ok(()),
            }
        }
    }
}
