// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types
//!
//! `AmqpError` covers every failure this crate surfaces: fatal configuration errors
//! raised while resolving and validating the topology, broker transport failures and
//! consumer bookkeeping errors. Failures raised by pluggable handlers are boxed as
//! [`HandlerError`] and never escape the component that isolates them.

use thiserror::Error;

/// Error type returned by user supplied handlers (consumer handlers, exception handlers).
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Represents errors that can occur while configuring the topology or talking to the broker.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AmqpError {
    /// Internal errors that don't fit into other categories
    #[error("internal error")]
    InternalError,

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect")]
    ConnectionError,

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// Invalid topology configuration, one entry per invalid entity
    #[error("invalid topology configuration: {}", .0.join("; "))]
    ConfigurationError(Vec<String>),

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding an exchange to a queue
    #[error("failure to binding exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    /// Error publishing or sending a message
    #[error("failure to publish to `{0}`")]
    PublishingError(String),

    /// Error receiving a message from a queue
    #[error("failure to receive from `{0}`")]
    ReceiveError(String),

    /// Error (de)serializing a payload
    #[error("failure to parse payload `{0}`")]
    SerializationError(String),

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error negative-acknowledging a message
    #[error("failure to nack message")]
    NackMessageError,

    /// Error declaring a consumer on a queue
    #[error("failure to declare consumer `{0}`")]
    ConsumerDeclarationError(String),

    /// Error consuming a message
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),
}

impl AmqpError {
    /// Shorthand for a configuration error with a single itemized reason.
    pub fn configuration(reason: impl Into<String>) -> Self {
        AmqpError::ConfigurationError(vec![reason.into()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_error_lists_every_item() {
        let err = AmqpError::ConfigurationError(vec![
            "exchange `a`: name must be provided".to_owned(),
            "queue `b`: name must be provided".to_owned(),
        ]);

        assert_eq!(
            err.to_string(),
            "invalid topology configuration: exchange `a`: name must be provided; queue `b`: name must be provided"
        );
    }

    #[test]
    fn binding_error_names_both_sides() {
        let err = AmqpError::BindingExchangeToQueueError("orders-ex".into(), "orders".into());
        assert_eq!(
            err.to_string(),
            "failure to binding exchange `orders-ex` to queue `orders`"
        );
    }
}
