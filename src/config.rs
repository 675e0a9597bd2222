// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Topology Configuration
//!
//! `TopologyConfig` is the root of the declarative configuration: default exchange and
//! queue templates, the dead letter and requeue sections, informational headers and the
//! ordered exchange, queue and binding maps. It is loaded once at startup and validated
//! as a whole before anything is declared; validation collects every violation and
//! reports them together.

use crate::{
    errors::AmqpError,
    exchange::{ExchangeKind, ExchangeSpec},
    queue::{BindingSpec, QueueSpec},
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::BTreeMap, path::Path};
use tracing::{error, info};

/// Postfix appended to a queue name to derive its dead letter queue
pub const DEFAULT_DEAD_LETTER_QUEUE_POSTFIX: &str = ".DLQ";
/// Dead letter exchange used when no dead letter section is configured
pub const DEFAULT_DEAD_LETTER_EXCHANGE: &str = "DEFAULT-DEAD-LETTER-EXCHANGE.DLQ";
pub const DEFAULT_REQUEUE_BATCH_SIZE: i64 = 10;
pub const DEFAULT_REQUEUE_THRESHOLD: i64 = 3;
pub const DEFAULT_RECEIVE_TIMEOUT_MS: u64 = 1000;

/// Local, per-entity validation.
pub trait Validate {
    /// Every reason the entity is invalid; empty when valid.
    fn violations(&self) -> Vec<String>;

    fn validate(&self) -> bool {
        self.violations().is_empty()
    }
}

/// Dead letter exchange and the postfix used to name dead letter queues.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DeadLetterSpec {
    pub dead_letter_exchange: Option<ExchangeSpec>,
    pub queue_postfix: Option<String>,
}

impl DeadLetterSpec {
    pub fn new(exchange: ExchangeSpec) -> DeadLetterSpec {
        DeadLetterSpec {
            dead_letter_exchange: Some(exchange),
            queue_postfix: None,
        }
    }

    pub fn queue_postfix(mut self, postfix: &str) -> Self {
        self.queue_postfix = Some(postfix.to_owned());
        self
    }

    pub fn postfix(&self) -> &str {
        self.queue_postfix
            .as_deref()
            .unwrap_or(DEFAULT_DEAD_LETTER_QUEUE_POSTFIX)
    }

    pub fn dead_letter_queue_name(&self, queue: &str) -> String {
        format!("{}{}", queue, self.postfix())
    }
}

impl Validate for DeadLetterSpec {
    fn violations(&self) -> Vec<String> {
        match &self.dead_letter_exchange {
            None => vec!["a dead letter exchange must be provided".to_owned()],
            Some(exchange) => exchange
                .violations()
                .into_iter()
                .map(|v| format!("dead letter exchange: {}", v))
                .collect(),
        }
    }
}

/// Requeue command channel and auto-requeue settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RequeueSpec {
    /// Declare the requeue exchange, queue and binding on startup.
    pub enabled: bool,
    pub exchange: Option<ExchangeSpec>,
    pub queue: Option<QueueSpec>,
    pub routing_key: String,
    /// Periodically push a requeue command for every dead letter queue.
    pub auto_requeue_enabled: bool,
    /// Opaque schedule expression handed to the scheduling collaborator.
    pub trigger_expression: String,
    /// Messages requested per auto requeue command.
    pub batch_size: i64,
    /// Admission threshold of the threshold requeue policy.
    pub threshold: i64,
    /// How long a single receive on a dead letter queue may block.
    pub receive_timeout_ms: u64,
}

impl Default for RequeueSpec {
    fn default() -> Self {
        RequeueSpec {
            enabled: false,
            exchange: None,
            queue: None,
            routing_key: String::new(),
            auto_requeue_enabled: false,
            trigger_expression: String::new(),
            batch_size: DEFAULT_REQUEUE_BATCH_SIZE,
            threshold: DEFAULT_REQUEUE_THRESHOLD,
            receive_timeout_ms: DEFAULT_RECEIVE_TIMEOUT_MS,
        }
    }
}

impl Validate for RequeueSpec {
    fn violations(&self) -> Vec<String> {
        let mut violations = vec![];

        match &self.exchange {
            None => violations.push("exchange must be provided for requeue".to_owned()),
            Some(exchange) => violations.extend(
                exchange
                    .violations()
                    .into_iter()
                    .map(|v| format!("requeue exchange: {}", v)),
            ),
        }

        match &self.queue {
            None => violations.push("queue must be provided for requeue".to_owned()),
            Some(queue) => violations.extend(
                queue
                    .violations()
                    .into_iter()
                    .map(|v| format!("requeue queue: {}", v)),
            ),
        }

        if self.routing_key.is_empty() {
            violations.push("routing key must be provided for requeue".to_owned());
        }

        if self.auto_requeue_enabled && self.trigger_expression.is_empty() {
            violations.push("trigger expression must be provided for auto requeue".to_owned());
        }

        violations
    }
}

/// Root of the topology configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct TopologyConfig {
    /// Master switch; nothing is declared when false.
    pub enabled: bool,
    pub default_exchange: ExchangeSpec,
    pub default_queue: QueueSpec,
    pub dead_letter: Option<DeadLetterSpec>,
    pub requeue: Option<RequeueSpec>,
    /// Static key/values added to the `info` header of every published message.
    pub info_headers: BTreeMap<String, Value>,
    pub exchanges: IndexMap<String, ExchangeSpec>,
    pub queues: IndexMap<String, QueueSpec>,
    pub bindings: IndexMap<String, BindingSpec>,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        TopologyConfig {
            enabled: true,
            default_exchange: ExchangeSpec::default(),
            default_queue: QueueSpec::default(),
            dead_letter: None,
            requeue: None,
            info_headers: BTreeMap::default(),
            exchanges: IndexMap::default(),
            queues: IndexMap::default(),
            bindings: IndexMap::default(),
        }
    }
}

impl TopologyConfig {
    pub fn from_json(raw: &str) -> Result<TopologyConfig, AmqpError> {
        serde_json::from_str(raw).map_err(|err| {
            error!(error = err.to_string(), "failure to parse topology configuration");
            AmqpError::SerializationError(err.to_string())
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<TopologyConfig, AmqpError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            error!(
                error = err.to_string(),
                path = %path.display(),
                "failure to read topology configuration"
            );
            AmqpError::configuration(format!("cannot read `{}`: {}", path.display(), err))
        })?;

        Self::from_json(&raw)
    }

    /// True when the default queue or any configured queue enables dead-lettering.
    pub fn is_dead_letter_enabled(&self) -> bool {
        self.default_queue.dead_letter_enabled == Some(true)
            || self
                .queues
                .values()
                .any(|q| q.dead_letter_enabled == Some(true))
    }

    /// Name of the dead letter queue derived from `queue`.
    pub fn dead_letter_queue_name(&self, queue: &str) -> String {
        match &self.dead_letter {
            Some(dl) => dl.dead_letter_queue_name(queue),
            None => format!("{}{}", queue, DEFAULT_DEAD_LETTER_QUEUE_POSTFIX),
        }
    }

    /// Name of the dead letter exchange, configured or fallback.
    pub fn dead_letter_exchange_name(&self) -> &str {
        self.dead_letter
            .as_ref()
            .and_then(|dl| dl.dead_letter_exchange.as_ref())
            .map(|dlx| dlx.name.as_str())
            .unwrap_or(DEFAULT_DEAD_LETTER_EXCHANGE)
    }

    /// Queues that resolve to dead-lettering enabled, in configuration order.
    pub fn dead_letter_queues(&self) -> impl Iterator<Item = &QueueSpec> {
        self.queues
            .values()
            .filter(|q| q.effective_dead_letter_enabled(&self.default_queue))
    }

    /// Validates the whole topology, collecting every violation.
    pub fn validate(&self) -> Result<(), AmqpError> {
        let mut violations = vec![];

        info!("validating exchanges...");
        for (key, exchange) in &self.exchanges {
            collect(&mut violations, "exchange", key, exchange.violations());
        }

        info!("validating queues...");
        for (key, queue) in &self.queues {
            collect(&mut violations, "queue", key, queue.violations());
        }

        violations.extend(self.derived_name_collisions());

        info!("validating bindings...");
        let exchange_kinds = self.bindable_exchanges();
        let queue_keys = self.bindable_queues();
        for (key, binding) in &self.bindings {
            let mut binding_violations = binding.violations();

            if !binding.exchange.is_empty() {
                match exchange_kinds.get(&binding.exchange) {
                    None => binding_violations
                        .push(format!("exchange `{}` is not configured", binding.exchange)),
                    Some(kind) => binding_violations.extend(binding.routing_violation(*kind)),
                }
            }

            if !binding.queue.is_empty() && !queue_keys.contains(&binding.queue) {
                binding_violations.push(format!("queue `{}` is not configured", binding.queue));
            }

            collect(&mut violations, "binding", key, binding_violations);
        }

        if self.is_dead_letter_enabled() {
            info!("validating dead letter configuration...");
            match &self.dead_letter {
                None => violations.push(
                    "dead letter configuration must be provided when a queue enables dead-lettering"
                        .to_owned(),
                ),
                Some(dl) => collect(&mut violations, "dead-letter", "", dl.violations()),
            }
        }

        if let Some(requeue) = &self.requeue {
            info!("validating requeue configuration...");
            collect(&mut violations, "requeue", "", requeue.violations());
        }

        if !violations.is_empty() {
            for violation in &violations {
                error!(violation = %violation, "invalid topology configuration");
            }
            return Err(AmqpError::ConfigurationError(violations));
        }

        info!("topology configuration validated");
        Ok(())
    }

    /// Configured keys shadowing an entity the builder derives. Bindings reference the
    /// dead letter exchange and the derived dead letter queues by name, in the same
    /// namespace as configured keys, so such a key would be ambiguous.
    fn derived_name_collisions(&self) -> Vec<String> {
        let mut violations = vec![];

        let dlx = self.dead_letter_exchange_name();
        if self.exchanges.contains_key(dlx) {
            violations.push(format!(
                "exchange `{}`: key collides with the dead letter exchange name",
                dlx
            ));
        }

        if self.dead_letter.is_some() {
            for queue in self.dead_letter_queues() {
                let dlq = self.dead_letter_queue_name(&queue.name);
                if self.queues.contains_key(&dlq) {
                    violations.push(format!(
                        "queue `{}`: key collides with the dead letter queue of `{}`",
                        dlq, queue.name
                    ));
                }
            }
        }

        violations
    }

    /// Exchanges a binding may reference: configured keys plus the dead letter exchange.
    fn bindable_exchanges(&self) -> IndexMap<String, ExchangeKind> {
        let mut kinds: IndexMap<String, ExchangeKind> = self
            .exchanges
            .iter()
            .map(|(key, ex)| (key.clone(), ex.effective_kind(&self.default_exchange)))
            .collect();

        let dlx = self
            .dead_letter
            .as_ref()
            .and_then(|dl| dl.dead_letter_exchange.as_ref());
        match dlx {
            Some(dlx) => {
                kinds.insert(dlx.name.clone(), dlx.effective_kind(&self.default_exchange));
            }
            None => {
                kinds.insert(DEFAULT_DEAD_LETTER_EXCHANGE.to_owned(), ExchangeKind::Topic);
            }
        }

        kinds
    }

    /// Queues a binding may reference: configured keys plus derived dead letter queues.
    fn bindable_queues(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.queues.keys().cloned().collect();
        keys.extend(
            self.dead_letter_queues()
                .map(|q| self.dead_letter_queue_name(&q.name)),
        );
        keys
    }
}

fn collect(violations: &mut Vec<String>, entity: &str, key: &str, found: Vec<String>) {
    violations.extend(found.into_iter().map(|v| {
        if key.is_empty() {
            format!("{}: {}", entity, v)
        } else {
            format!("{} `{}`: {}", entity, key, v)
        }
    }));
}
