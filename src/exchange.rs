// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exchange Configuration
//!
//! `ExchangeSpec` is the exchange as configured: every flag is optional and falls back
//! through the default exchange to a hard-coded constant. Resolving it yields an
//! `ExchangeDefinition`, the fully-specified declaration handed to the broker.

use crate::{
    config::Validate,
    defaults::{merge_arguments, pick, ApplyDefaults, Arguments, DefaultsApplied},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Constant for the argument used to specify the routing type of a delayed exchange
pub const AMQP_HEADERS_DELAYED_EXCHANGE_TYPE: &str = "x-delayed-type";
/// Broker type of exchanges provided by the delayed message plugin
pub const DELAYED_MESSAGE_EXCHANGE_TYPE: &str = "x-delayed-message";

/// Represents the types of exchanges available in RabbitMQ.
///
/// - Direct: Routes messages to queues based on an exact match of routing keys
/// - Fanout: Broadcasts messages to all bound queues regardless of routing keys
/// - Topic: Routes messages based on wildcard pattern matching of routing keys
/// - Headers: Routes based on message header values instead of routing keys
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    Direct,
    Fanout,
    #[default]
    Topic,
    Headers,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Topic => "topic",
            ExchangeKind::Headers => "headers",
        }
    }
}

impl From<ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: ExchangeKind) -> lapin::ExchangeKind {
        match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeKind::Headers => lapin::ExchangeKind::Headers,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
        }
    }
}

/// An exchange as configured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ExchangeSpec {
    /// Name of the exchange. Mandatory.
    pub name: String,
    /// Exchange type, `topic` when unset everywhere.
    #[serde(rename = "type")]
    pub kind: Option<ExchangeKind>,
    pub durable: Option<bool>,
    pub auto_delete: Option<bool>,
    pub internal: Option<bool>,
    pub delayed: Option<bool>,
    pub arguments: Arguments,
    #[serde(skip)]
    applied: DefaultsApplied,
}

impl ExchangeSpec {
    pub fn new(name: &str) -> ExchangeSpec {
        ExchangeSpec {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    pub fn kind(mut self, kind: ExchangeKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = Some(durable);
        self
    }

    pub fn delayed(mut self, delayed: bool) -> Self {
        self.delayed = Some(delayed);
        self
    }

    pub fn argument(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.arguments.insert(key.to_owned(), value.into());
        self
    }

    /// The exchange kind as it resolves against `defaults`, without mutating anything.
    pub fn effective_kind(&self, defaults: &ExchangeSpec) -> ExchangeKind {
        self.kind.or(defaults.kind).unwrap_or_default()
    }

    /// Applies `defaults` unless already applied and returns the declaration.
    pub fn build(&mut self, defaults: &ExchangeSpec) -> ExchangeDefinition {
        self.apply_defaults(defaults);

        ExchangeDefinition {
            name: self.name.clone(),
            kind: self.kind.unwrap_or_default(),
            durable: self.durable.unwrap_or_default(),
            auto_delete: self.auto_delete.unwrap_or_default(),
            internal: self.internal.unwrap_or_default(),
            delayed: self.delayed.unwrap_or_default(),
            arguments: self.arguments.clone(),
        }
    }
}

impl ApplyDefaults for ExchangeSpec {
    fn apply_defaults(&mut self, defaults: &ExchangeSpec) {
        if self.applied.is_set() {
            return;
        }

        debug!(exchange = %self.name, "applying default exchange configuration");

        let name = self.name.clone();
        self.kind = Some(pick(&name, "type", self.kind, defaults.kind, ExchangeKind::Topic));
        self.durable = Some(pick(&name, "durable", self.durable, defaults.durable, false));
        self.auto_delete = Some(pick(
            &name,
            "auto-delete",
            self.auto_delete,
            defaults.auto_delete,
            false,
        ));
        self.internal = Some(pick(&name, "internal", self.internal, defaults.internal, false));
        self.delayed = Some(pick(&name, "delayed", self.delayed, defaults.delayed, false));
        self.arguments = merge_arguments(&self.arguments, &defaults.arguments);
        self.applied.set();
    }

    fn defaults_applied(&self) -> bool {
        self.applied.is_set()
    }
}

impl Validate for ExchangeSpec {
    fn violations(&self) -> Vec<String> {
        if self.name.is_empty() {
            return vec!["name must be provided for an exchange".to_owned()];
        }
        vec![]
    }
}

/// Fully resolved declaration of a RabbitMQ exchange.
///
/// Implements the builder pattern so fixed exchanges (the fallback dead letter
/// exchange) can be described without going through configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExchangeDefinition {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
    pub auto_delete: bool,
    pub internal: bool,
    pub delayed: bool,
    pub arguments: Arguments,
}

impl ExchangeDefinition {
    /// Creates a new non-durable topic exchange definition with the given name.
    pub fn new(name: &str) -> ExchangeDefinition {
        ExchangeDefinition {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    /// Sets the exchange type.
    pub fn kind(mut self, kind: ExchangeKind) -> Self {
        self.kind = kind;
        self
    }

    /// Makes the exchange durable, persisting across broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Broker-level type and arguments of the declaration.
    ///
    /// Delayed exchanges are declared with the `x-delayed-message` type provided by the
    /// delayed message plugin, carrying their routing type in `x-delayed-type`.
    pub fn broker_kind(&self) -> (lapin::ExchangeKind, Arguments) {
        let mut args = self.arguments.clone();
        if !self.delayed {
            return (self.kind.into(), args);
        }

        args.insert(
            AMQP_HEADERS_DELAYED_EXCHANGE_TYPE.to_owned(),
            Value::String(self.kind.as_str().to_owned()),
        );
        (
            lapin::ExchangeKind::Custom(DELAYED_MESSAGE_EXCHANGE_TYPE.to_owned()),
            args,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::resolve;
    use serde_json::json;

    #[test]
    fn unset_fields_fall_back_to_hard_coded_values() {
        let mut spec = ExchangeSpec::new("orders-ex");
        let def = spec.build(&ExchangeSpec::default());

        assert_eq!(def.kind, ExchangeKind::Topic);
        assert!(!def.durable);
        assert!(!def.auto_delete);
        assert!(!def.internal);
        assert!(!def.delayed);
        assert!(def.arguments.is_empty());
        assert!(spec.defaults_applied());
    }

    #[test]
    fn entity_values_win_over_defaults() {
        let defaults = ExchangeSpec::default()
            .kind(ExchangeKind::Fanout)
            .durable(true)
            .argument("alternate-exchange", "ae");
        let spec = ExchangeSpec::new("orders-ex")
            .kind(ExchangeKind::Direct)
            .argument("alternate-exchange", "orders-ae");

        let resolved = resolve(&spec, &defaults);

        assert_eq!(resolved.kind, Some(ExchangeKind::Direct));
        assert_eq!(resolved.durable, Some(true));
        assert_eq!(resolved.arguments["alternate-exchange"], json!("orders-ae"));
        assert_eq!(defaults.name, "");
        assert!(!defaults.defaults_applied());
    }

    #[test]
    fn resolution_is_idempotent() {
        let defaults = ExchangeSpec::default().durable(true);
        let once = resolve(&ExchangeSpec::new("orders-ex"), &defaults);

        let mut twice = once.clone();
        twice.apply_defaults(&ExchangeSpec::default().durable(false));

        assert_eq!(once, twice);
        assert_eq!(twice.durable, Some(true));
    }

    #[test]
    fn applied_flag_is_ignored_by_equality() {
        let resolved = resolve(&ExchangeSpec::new("x"), &ExchangeSpec::default());
        let mut manual = ExchangeSpec::new("x")
            .kind(ExchangeKind::Topic)
            .durable(false)
            .delayed(false);
        manual.auto_delete = Some(false);
        manual.internal = Some(false);

        assert!(resolved.defaults_applied());
        assert!(!manual.defaults_applied());
        assert_eq!(resolved, manual);
    }

    #[test]
    fn exchange_without_name_is_invalid() {
        assert!(!ExchangeSpec::default().validate());
        assert!(ExchangeSpec::new("orders-ex").validate());
    }

    #[test]
    fn delayed_exchange_uses_plugin_type() {
        let mut spec = ExchangeSpec::new("delayed-ex")
            .kind(ExchangeKind::Direct)
            .delayed(true);
        let (kind, args) = spec.build(&ExchangeSpec::default()).broker_kind();

        assert!(matches!(
            kind,
            lapin::ExchangeKind::Custom(ref t) if t == DELAYED_MESSAGE_EXCHANGE_TYPE
        ));
        assert_eq!(args[AMQP_HEADERS_DELAYED_EXCHANGE_TYPE], json!("direct"));
    }

    #[test]
    fn deserializes_kebab_case_keys() {
        let spec: ExchangeSpec = serde_json::from_value(json!({
            "name": "orders-ex",
            "type": "headers",
            "auto-delete": true
        }))
        .unwrap();

        assert_eq!(spec.kind, Some(ExchangeKind::Headers));
        assert_eq!(spec.auto_delete, Some(true));
        assert_eq!(spec.durable, None);
    }
}
