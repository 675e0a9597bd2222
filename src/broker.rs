// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Client Capability
//!
//! The operations the topology builder, the recoverer and the requeue engine need from
//! a broker. `AmqpBrokerClient` implements it over a lapin channel; tests substitute
//! a mock or an in-memory broker.

use crate::{
    errors::AmqpError,
    exchange::ExchangeDefinition,
    message::Message,
    queue::{BindingDefinition, QueueDefinition},
};
use async_trait::async_trait;
use std::time::Duration;

/// Declarations must be idempotent: re-declaring an identical entity is a no-op.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError>;

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), AmqpError>;

    async fn declare_binding(&self, def: &BindingDefinition) -> Result<(), AmqpError>;

    /// Publishes `message` to `exchange` with `routing_key`.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &Message,
    ) -> Result<(), AmqpError>;

    /// Sends `message` straight to `queue` through the default exchange.
    async fn send(&self, queue: &str, message: &Message) -> Result<(), AmqpError>;

    /// Takes the next message from `queue`, waiting at most `timeout`.
    /// `None` means the queue stayed empty.
    async fn receive(&self, queue: &str, timeout: Duration) -> Result<Option<Message>, AmqpError>;
}
