// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Topology Builder
//!
//! Declares a validated `TopologyConfig` on the broker, in dependency order:
//!
//! 1. the dead letter exchange, configured or fallback
//! 2. every configured exchange
//! 3. every configured queue, plus the derived dead letter queue and its binding to
//!    the dead letter exchange for queues with dead-lettering enabled
//! 4. every configured binding, resolved against what was declared so far
//! 5. the requeue exchange, queue and binding, when enabled; a dead-lettering
//!    requeue queue gets its dead letter queue like any configured queue
//!
//! Validation runs before the first declaration, so an invalid configuration
//! declares nothing.

use crate::{
    broker::BrokerClient,
    config::{DeadLetterSpec, TopologyConfig, DEFAULT_DEAD_LETTER_EXCHANGE},
    errors::AmqpError,
    exchange::{ExchangeDefinition, ExchangeKind},
    queue::{BindingDefinition, QueueDefinition, QueueSpec},
};
use indexmap::IndexMap;
use tracing::{debug, error, info};

/// What a build pass declared. Exchanges and queues are keyed the way bindings
/// reference them: configured entities by their key, derived ones by their name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeclaredTopology {
    pub dead_letter_exchange: Option<String>,
    pub exchanges: IndexMap<String, ExchangeDefinition>,
    pub queues: IndexMap<String, QueueDefinition>,
    pub bindings: Vec<BindingDefinition>,
}

pub struct TopologyBuilder<'tp> {
    broker: &'tp dyn BrokerClient,
    declared: DeclaredTopology,
}

impl<'tp> TopologyBuilder<'tp> {
    /// Creates a builder declaring through `broker`.
    pub fn new(broker: &'tp dyn BrokerClient) -> TopologyBuilder<'tp> {
        TopologyBuilder {
            broker,
            declared: DeclaredTopology::default(),
        }
    }

    /// Validates `cfg`, resolves its defaults in place and declares it.
    ///
    /// Nothing is declared when the topology is disabled or fails validation; every
    /// violation is reported at once in the `ConfigurationError`. A broker failure
    /// stops the build at the failing declaration.
    ///
    /// # Parameters
    /// * `cfg` - The topology; each entity is left with its defaults applied
    ///
    /// # Returns
    /// * `Result<DeclaredTopology, AmqpError>` - Everything that was declared, keyed
    ///   the way bindings reference it
    pub async fn build(mut self, cfg: &mut TopologyConfig) -> Result<DeclaredTopology, AmqpError> {
        if !cfg.enabled {
            info!("topology auto configuration disabled, nothing declared");
            return Ok(self.declared);
        }

        cfg.validate()?;

        self.install_dead_letter_exchange(cfg).await?;
        self.install_exchanges(cfg).await?;
        self.install_queues(cfg).await?;
        self.install_bindings(cfg).await?;
        self.install_requeue(cfg).await?;

        info!(
            exchanges = self.declared.exchanges.len(),
            queues = self.declared.queues.len(),
            bindings = self.declared.bindings.len(),
            "topology declared"
        );

        Ok(self.declared)
    }
}

impl TopologyBuilder<'_> {
    async fn install_dead_letter_exchange(&mut self, cfg: &mut TopologyConfig) -> Result<(), AmqpError> {
        let TopologyConfig {
            default_exchange,
            dead_letter,
            ..
        } = cfg;

        let def = match dead_letter
            .as_mut()
            .and_then(|dl| dl.dead_letter_exchange.as_mut())
        {
            Some(dlx) => dlx.build(default_exchange),
            None => {
                debug!("no dead letter exchange configured, using the fallback exchange");
                ExchangeDefinition::new(DEFAULT_DEAD_LETTER_EXCHANGE)
                    .kind(ExchangeKind::Topic)
                    .durable()
            }
        };

        self.declared.dead_letter_exchange = Some(def.name.clone());
        self.declare_exchange(&def.name.clone(), def).await
    }

    async fn install_exchanges(&mut self, cfg: &mut TopologyConfig) -> Result<(), AmqpError> {
        let TopologyConfig {
            default_exchange,
            exchanges,
            ..
        } = cfg;

        for (key, spec) in exchanges.iter_mut() {
            let def = spec.build(default_exchange);
            self.declare_exchange(key, def).await?;
        }

        Ok(())
    }

    async fn install_queues(&mut self, cfg: &mut TopologyConfig) -> Result<(), AmqpError> {
        let TopologyConfig {
            default_queue,
            dead_letter,
            queues,
            ..
        } = cfg;

        for (key, spec) in queues.iter_mut() {
            self.install_queue(key, spec, default_queue, dead_letter.as_ref())
                .await?;
        }

        Ok(())
    }

    /// Declares one queue and, when it dead-letters, its dead letter queue bound to
    /// the dead letter exchange under the dead letter queue name.
    async fn install_queue(
        &mut self,
        key: &str,
        spec: &mut QueueSpec,
        default_queue: &QueueSpec,
        dead_letter: Option<&DeadLetterSpec>,
    ) -> Result<(), AmqpError> {
        let def = spec.build(default_queue, dead_letter)?;
        self.declare_queue(key, def).await?;

        let Some(dl) = dead_letter else {
            return Ok(());
        };
        if !spec.dead_letter_enabled.unwrap_or_default() {
            return Ok(());
        }

        let dlq = spec.build_dead_letter_queue(default_queue, dl);
        let dlq_name = dlq.name.clone();
        self.declare_queue(&dlq_name, dlq).await?;

        let dlx = self.declared.dead_letter_exchange.clone().unwrap_or_default();
        let binding = BindingDefinition::new(&dlq_name)
            .exchange(&dlx)
            .routing_key(&dlq_name);
        self.declare_binding(binding).await
    }

    async fn install_bindings(&mut self, cfg: &TopologyConfig) -> Result<(), AmqpError> {
        for (key, spec) in &cfg.bindings {
            let Some(exchange) = self.declared.exchanges.get(&spec.exchange) else {
                error!(binding = %key, exchange = %spec.exchange, "binding references an undeclared exchange");
                return Err(AmqpError::configuration(format!(
                    "binding `{}`: exchange `{}` was not declared",
                    key, spec.exchange
                )));
            };

            let Some(queue) = self.declared.queues.get(&spec.queue) else {
                error!(binding = %key, queue = %spec.queue, "binding references an undeclared queue");
                return Err(AmqpError::configuration(format!(
                    "binding `{}`: queue `{}` was not declared",
                    key, spec.queue
                )));
            };

            let def = spec.bind(exchange, queue)?;
            self.declare_binding(def).await?;
        }

        Ok(())
    }

    async fn install_requeue(&mut self, cfg: &mut TopologyConfig) -> Result<(), AmqpError> {
        let TopologyConfig {
            default_exchange,
            default_queue,
            dead_letter,
            requeue,
            ..
        } = cfg;

        let Some(requeue) = requeue.as_mut().filter(|r| r.enabled) else {
            return Ok(());
        };

        let (Some(exchange), Some(queue)) = (requeue.exchange.as_mut(), requeue.queue.as_mut()) else {
            return Err(AmqpError::configuration(
                "exchange and queue must be provided for requeue",
            ));
        };

        let exchange = exchange.build(default_exchange);
        let exchange_name = exchange.name.clone();
        self.declare_exchange(&exchange_name, exchange).await?;

        let queue_name = queue.name.clone();
        self.install_queue(&queue_name, queue, default_queue, dead_letter.as_ref())
            .await?;

        let binding = BindingDefinition::new(&queue_name)
            .exchange(&exchange_name)
            .routing_key(&requeue.routing_key);
        self.declare_binding(binding).await
    }

    async fn declare_exchange(&mut self, key: &str, def: ExchangeDefinition) -> Result<(), AmqpError> {
        debug!(key = key, exchange = %def.name, kind = def.kind.as_str(), "declaring exchange");

        if let Err(err) = self.broker.declare_exchange(&def).await {
            error!(error = err.to_string(), exchange = %def.name, "error to declare the exchange");
            return Err(err);
        }

        self.declared.exchanges.insert(key.to_owned(), def);
        Ok(())
    }

    async fn declare_queue(&mut self, key: &str, def: QueueDefinition) -> Result<(), AmqpError> {
        debug!(key = key, queue = %def.name, "declaring queue");

        if let Err(err) = self.broker.declare_queue(&def).await {
            error!(error = err.to_string(), queue = %def.name, "error to declare the queue");
            return Err(err);
        }

        self.declared.queues.insert(key.to_owned(), def);
        Ok(())
    }

    async fn declare_binding(&mut self, def: BindingDefinition) -> Result<(), AmqpError> {
        debug!(
            queue = %def.queue,
            exchange = %def.exchange,
            routing_key = %def.routing_key,
            "binding queue to exchange"
        );

        if let Err(err) = self.broker.declare_binding(&def).await {
            error!(error = err.to_string(), "error to bind queue to exchange");
            return Err(err);
        }

        self.declared.bindings.push(def);
        Ok(())
    }
}
