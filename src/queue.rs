// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue and Binding Configuration
//!
//! `QueueSpec` and `BindingSpec` are the configured entities; `QueueDefinition` and
//! `BindingDefinition` are the resolved declarations sent to the broker. A queue with
//! dead-lettering enabled is declared with broker-level dead letter arguments and gets
//! a derived dead letter queue named after it.

use crate::{
    config::{DeadLetterSpec, Validate},
    defaults::{merge_arguments, pick, ApplyDefaults, Arguments, DefaultsApplied},
    errors::AmqpError,
    exchange::{ExchangeDefinition, ExchangeKind},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Constant for the argument used to specify a dead letter exchange
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
/// Constant for the argument used to specify a dead letter routing key
pub const AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY: &str = "x-dead-letter-routing-key";

/// A queue as configured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct QueueSpec {
    /// Name of the queue. Mandatory.
    pub name: String,
    pub durable: Option<bool>,
    pub auto_delete: Option<bool>,
    pub exclusive: Option<bool>,
    /// Derive and declare a dead letter queue for this queue.
    pub dead_letter_enabled: Option<bool>,
    pub arguments: Arguments,
    #[serde(skip)]
    applied: DefaultsApplied,
}

impl QueueSpec {
    pub fn new(name: &str) -> QueueSpec {
        QueueSpec {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = Some(durable);
        self
    }

    pub fn dead_letter_enabled(mut self, enabled: bool) -> Self {
        self.dead_letter_enabled = Some(enabled);
        self
    }

    pub fn argument(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.arguments.insert(key.to_owned(), value.into());
        self
    }

    /// Whether dead-lettering is enabled once `defaults` are taken into account.
    pub fn effective_dead_letter_enabled(&self, defaults: &QueueSpec) -> bool {
        self.dead_letter_enabled
            .or(defaults.dead_letter_enabled)
            .unwrap_or_default()
    }

    /// Applies `defaults` unless already applied and returns the declaration.
    ///
    /// When dead-lettering is enabled the declaration carries the dead letter exchange
    /// and the derived dead letter queue name as broker arguments, which requires a
    /// dead letter exchange to be configured.
    pub fn build(
        &mut self,
        defaults: &QueueSpec,
        dead_letter: Option<&DeadLetterSpec>,
    ) -> Result<QueueDefinition, AmqpError> {
        let mut def = self.declaration(defaults, self.name.clone());

        if self.dead_letter_enabled.unwrap_or_default() {
            let Some((dlx, dl)) = dead_letter
                .and_then(|dl| dl.dead_letter_exchange.as_ref().map(|dlx| (dlx, dl)))
            else {
                return Err(AmqpError::configuration(format!(
                    "queue `{}`: dead-letter exchange must be provided when dead-letter-enabled=true",
                    self.name
                )));
            };

            def.arguments.insert(
                AMQP_HEADERS_DEAD_LETTER_EXCHANGE.to_owned(),
                Value::String(dlx.name.clone()),
            );
            def.arguments.insert(
                AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY.to_owned(),
                Value::String(dl.dead_letter_queue_name(&self.name)),
            );
        }

        Ok(def)
    }

    /// Declaration of the dead letter queue derived from this queue: same flags and
    /// arguments, named with the dead letter postfix.
    pub fn build_dead_letter_queue(
        &mut self,
        defaults: &QueueSpec,
        dead_letter: &DeadLetterSpec,
    ) -> QueueDefinition {
        let name = dead_letter.dead_letter_queue_name(&self.name);
        self.declaration(defaults, name)
    }

    fn declaration(&mut self, defaults: &QueueSpec, name: String) -> QueueDefinition {
        self.apply_defaults(defaults);

        QueueDefinition {
            name,
            durable: self.durable.unwrap_or_default(),
            auto_delete: self.auto_delete.unwrap_or_default(),
            exclusive: self.exclusive.unwrap_or_default(),
            arguments: self.arguments.clone(),
        }
    }
}

impl ApplyDefaults for QueueSpec {
    fn apply_defaults(&mut self, defaults: &QueueSpec) {
        if self.applied.is_set() {
            return;
        }

        debug!(queue = %self.name, "applying default queue configuration");

        let name = self.name.clone();
        self.durable = Some(pick(&name, "durable", self.durable, defaults.durable, false));
        self.auto_delete = Some(pick(
            &name,
            "auto-delete",
            self.auto_delete,
            defaults.auto_delete,
            false,
        ));
        self.exclusive = Some(pick(
            &name,
            "exclusive",
            self.exclusive,
            defaults.exclusive,
            false,
        ));
        self.dead_letter_enabled = Some(pick(
            &name,
            "dead-letter-enabled",
            self.dead_letter_enabled,
            defaults.dead_letter_enabled,
            false,
        ));
        self.arguments = merge_arguments(&self.arguments, &defaults.arguments);
        self.applied.set();
    }

    fn defaults_applied(&self) -> bool {
        self.applied.is_set()
    }
}

impl Validate for QueueSpec {
    fn violations(&self) -> Vec<String> {
        if self.name.is_empty() {
            return vec!["name must be provided for a queue".to_owned()];
        }
        vec![]
    }
}

/// Fully resolved declaration of a RabbitMQ queue.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueDefinition {
    pub name: String,
    pub durable: bool,
    pub auto_delete: bool,
    pub exclusive: bool,
    pub arguments: Arguments,
}

/// A binding as configured. `exchange` and `queue` are keys of the topology's
/// exchange and queue maps, not broker names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BindingSpec {
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
    pub arguments: Arguments,
}

impl BindingSpec {
    pub fn new(exchange: &str, queue: &str) -> BindingSpec {
        BindingSpec {
            exchange: exchange.to_owned(),
            queue: queue.to_owned(),
            ..Default::default()
        }
    }

    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = key.to_owned();
        self
    }

    pub fn argument(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.arguments.insert(key.to_owned(), value.into());
        self
    }

    /// Checks the routing rule for a binding to an exchange of `kind`: headers
    /// exchanges need match arguments, every other kind needs a routing key.
    pub fn routing_violation(&self, kind: ExchangeKind) -> Option<String> {
        match kind {
            ExchangeKind::Headers if self.arguments.is_empty() => Some(format!(
                "arguments must be provided for a binding to headers exchange `{}`",
                self.exchange
            )),
            ExchangeKind::Headers => None,
            _ if self.routing_key.is_empty() => Some(format!(
                "routing key must be provided for a binding to {} exchange `{}`",
                kind.as_str(),
                self.exchange
            )),
            _ => None,
        }
    }

    /// Binds the resolved `queue` to the resolved `exchange`.
    pub fn bind(
        &self,
        exchange: &ExchangeDefinition,
        queue: &QueueDefinition,
    ) -> Result<BindingDefinition, AmqpError> {
        if let Some(violation) = self.routing_violation(exchange.kind) {
            return Err(AmqpError::configuration(violation));
        }

        Ok(BindingDefinition::new(&queue.name)
            .exchange(&exchange.name)
            .routing_key(&self.routing_key)
            .arguments(self.arguments.clone()))
    }
}

impl Validate for BindingSpec {
    fn violations(&self) -> Vec<String> {
        let mut violations = vec![];
        if self.exchange.is_empty() {
            violations.push("exchange must be provided for a binding".to_owned());
        }
        if self.queue.is_empty() {
            violations.push("queue must be provided for a binding".to_owned());
        }
        violations
    }
}

/// Resolved binding of a queue to an exchange, using broker names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindingDefinition {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
    pub arguments: Arguments,
}

impl BindingDefinition {
    /// Creates a new binding for the given queue; the exchange and routing key
    /// are set with the builder methods.
    pub fn new(queue: &str) -> BindingDefinition {
        BindingDefinition {
            queue: queue.to_owned(),
            ..Default::default()
        }
    }

    pub fn exchange(mut self, exchange: &str) -> Self {
        self.exchange = exchange.to_owned();
        self
    }

    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = key.to_owned();
        self
    }

    pub fn arguments(mut self, arguments: Arguments) -> Self {
        self.arguments = arguments;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{defaults::resolve, exchange::ExchangeSpec};
    use serde_json::json;

    fn dead_letter() -> DeadLetterSpec {
        DeadLetterSpec::new(ExchangeSpec::new("dlx"))
    }

    #[test]
    fn queue_defaults_cascade() {
        let defaults = QueueSpec::default()
            .durable(true)
            .argument("x-queue-mode", "lazy");
        let mut spec = QueueSpec::new("orders").argument("x-message-ttl", 1000);

        let def = spec.build(&defaults, None).unwrap();

        assert!(def.durable);
        assert!(!def.exclusive);
        assert!(!def.auto_delete);
        assert_eq!(def.arguments["x-queue-mode"], json!("lazy"));
        assert_eq!(def.arguments["x-message-ttl"], json!(1000));
        assert_eq!(spec.dead_letter_enabled, Some(false));
    }

    #[test]
    fn queue_resolution_is_idempotent() {
        let defaults = QueueSpec::default()
            .durable(true)
            .argument("x-queue-mode", "lazy");
        let once = resolve(&QueueSpec::new("orders"), &defaults);

        let mut twice = once.clone();
        twice.apply_defaults(
            &QueueSpec::default()
                .durable(false)
                .dead_letter_enabled(true)
                .argument("x-queue-mode", "default"),
        );

        assert_eq!(once, twice);
        assert_eq!(twice.durable, Some(true));
        assert_eq!(twice.dead_letter_enabled, Some(false));
        assert_eq!(twice.arguments["x-queue-mode"], json!("lazy"));
    }

    #[test]
    fn queue_applied_flag_is_ignored_by_equality() {
        let resolved = resolve(&QueueSpec::new("orders"), &QueueSpec::default());
        let mut manual = QueueSpec::new("orders")
            .durable(false)
            .dead_letter_enabled(false);
        manual.auto_delete = Some(false);
        manual.exclusive = Some(false);

        assert!(resolved.defaults_applied());
        assert!(!manual.defaults_applied());
        assert_eq!(resolved, manual);
    }

    #[test]
    fn dead_letter_enabled_queue_points_at_its_dead_letter_queue() {
        let mut spec = QueueSpec::new("orders").dead_letter_enabled(true);

        let def = spec
            .build(&QueueSpec::default(), Some(&dead_letter()))
            .unwrap();

        assert_eq!(def.arguments[AMQP_HEADERS_DEAD_LETTER_EXCHANGE], json!("dlx"));
        assert_eq!(
            def.arguments[AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY],
            json!("orders.DLQ")
        );
    }

    #[test]
    fn dead_letter_enabled_through_defaults() {
        let defaults = QueueSpec::default().dead_letter_enabled(true);
        let mut spec = QueueSpec::new("orders");

        assert!(spec.effective_dead_letter_enabled(&defaults));
        assert!(spec.build(&defaults, Some(&dead_letter())).is_ok());
        assert_eq!(spec.dead_letter_enabled, Some(true));
    }

    #[test]
    fn dead_letter_enabled_without_exchange_is_fatal() {
        let mut spec = QueueSpec::new("orders").dead_letter_enabled(true);

        let err = spec.build(&QueueSpec::default(), None).unwrap_err();
        assert!(matches!(err, AmqpError::ConfigurationError(_)));

        let mut spec = QueueSpec::new("orders").dead_letter_enabled(true);
        let without_exchange = DeadLetterSpec::default();
        assert!(spec
            .build(&QueueSpec::default(), Some(&without_exchange))
            .is_err());
    }

    #[test]
    fn dead_letter_queue_keeps_flags_without_routing_arguments() {
        let mut spec = QueueSpec::new("orders")
            .durable(true)
            .dead_letter_enabled(true)
            .argument("x-message-ttl", 1000);
        let dl = dead_letter().queue_postfix(".dlq-new");

        spec.build(&QueueSpec::default(), Some(&dl)).unwrap();
        let dlq = spec.build_dead_letter_queue(&QueueSpec::default(), &dl);

        assert_eq!(dlq.name, "orders.dlq-new");
        assert!(dlq.durable);
        assert_eq!(dlq.arguments["x-message-ttl"], json!(1000));
        assert!(!dlq.arguments.contains_key(AMQP_HEADERS_DEAD_LETTER_EXCHANGE));
    }

    #[test]
    fn headers_binding_requires_arguments() {
        let spec = BindingSpec::new("ex", "q");
        assert!(spec.routing_violation(ExchangeKind::Headers).is_some());

        let spec = spec.argument("x-match", "all");
        assert!(spec.routing_violation(ExchangeKind::Headers).is_none());
    }

    #[test]
    fn non_headers_binding_requires_routing_key() {
        let spec = BindingSpec::new("ex", "q");
        assert!(spec.routing_violation(ExchangeKind::Topic).is_some());
        assert!(spec.routing_violation(ExchangeKind::Direct).is_some());

        let spec = spec.routing_key("orders.#");
        assert!(spec.routing_violation(ExchangeKind::Topic).is_none());
    }

    #[test]
    fn bind_resolves_broker_names() {
        let spec = BindingSpec::new("orders-key", "orders-queue-key").routing_key("orders.#");
        let exchange = ExchangeDefinition::new("orders-ex");
        let queue = QueueDefinition {
            name: "orders".to_owned(),
            ..Default::default()
        };

        let binding = spec.bind(&exchange, &queue).unwrap();

        assert_eq!(binding.exchange, "orders-ex");
        assert_eq!(binding.queue, "orders");
        assert_eq!(binding.routing_key, "orders.#");
    }

    #[test]
    fn bind_to_headers_exchange_without_arguments_fails() {
        let spec = BindingSpec::new("ex", "q").routing_key("ignored");
        let exchange = ExchangeDefinition::new("ex").kind(ExchangeKind::Headers);

        assert!(spec.bind(&exchange, &QueueDefinition::default()).is_err());
    }

    #[test]
    fn binding_requires_both_references() {
        let violations = BindingSpec::default().violations();
        assert_eq!(violations.len(), 2);
        assert!(BindingSpec::new("ex", "q").validate());
    }
}
