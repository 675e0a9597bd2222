// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Post Processors
//!
//! Stateless hooks applied to every outbound message before it is published: one
//! assigns a correlation identifier, the other stamps an informational header block.

use crate::{
    message::{Message, HEADER_CORRELATION_ID, HEADER_INFO},
    otel::TraceContext,
};
use chrono::Utc;
use serde_json::{Map, Value};
use std::{collections::BTreeMap, sync::Arc};
use uuid::Uuid;

/// Info block key holding the publishing application name
pub const INFO_APPLICATION_NAME: &str = "application-name";
/// Info block key holding the send timestamp
pub const INFO_EXECUTION_TIME: &str = "execution-time";

/// A pre-publish hook.
pub trait MessagePostProcessor: Send + Sync {
    fn process(&self, message: &mut Message);
}

/// Assigns a correlation id when the message has none, preferring the current trace
/// id over a fresh UUID, and mirrors it into the `correlation-id` header.
#[derive(Clone, Default)]
pub struct CorrelationPostProcessor {
    trace: Option<Arc<dyn TraceContext>>,
}

impl CorrelationPostProcessor {
    pub fn new(trace: Option<Arc<dyn TraceContext>>) -> CorrelationPostProcessor {
        CorrelationPostProcessor { trace }
    }

    /// Applies an id supplied with publisher-confirm correlation data, then processes
    /// the message as usual. Returns the correlation id the message ends up with.
    pub fn correlation_data(&self, message: &mut Message, id: Option<&str>) -> String {
        if let Some(id) = id {
            message.properties.correlation_id = Some(id.to_owned());
        }
        self.process(message);
        message.properties.correlation_id.clone().unwrap_or_default()
    }

    fn next_id(&self) -> String {
        self.trace
            .as_ref()
            .and_then(|trace| trace.current_trace_id())
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    }
}

impl MessagePostProcessor for CorrelationPostProcessor {
    fn process(&self, message: &mut Message) {
        let id = match &message.properties.correlation_id {
            Some(id) => id.clone(),
            None => {
                let id = self.next_id();
                message.properties.correlation_id = Some(id.clone());
                id
            }
        };

        message
            .headers_mut()
            .insert(HEADER_CORRELATION_ID.to_owned(), Value::String(id));
    }
}

/// Stamps the `info` header: application name, send time and configured static
/// key/values. Keys already present in a caller-supplied `info` block are kept.
#[derive(Debug, Clone)]
pub struct InfoHeaderPostProcessor {
    app_name: String,
    headers: BTreeMap<String, Value>,
}

impl InfoHeaderPostProcessor {
    pub fn new(app_name: &str, headers: BTreeMap<String, Value>) -> InfoHeaderPostProcessor {
        InfoHeaderPostProcessor {
            app_name: app_name.to_owned(),
            headers,
        }
    }

    fn block(&self) -> Map<String, Value> {
        let mut block: Map<String, Value> = self
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        block
            .entry(INFO_APPLICATION_NAME)
            .or_insert_with(|| Value::String(self.app_name.clone()));
        block.insert(
            INFO_EXECUTION_TIME.to_owned(),
            Value::String(Utc::now().to_rfc3339()),
        );
        block
    }
}

impl MessagePostProcessor for InfoHeaderPostProcessor {
    fn process(&self, message: &mut Message) {
        let block = self.block();

        match message.headers_mut().get_mut(HEADER_INFO) {
            None => {
                message
                    .headers_mut()
                    .insert(HEADER_INFO.to_owned(), Value::Object(block));
            }
            Some(Value::Object(existing)) => {
                for (key, value) in block {
                    existing.entry(key).or_insert(value);
                }
            }
            // caller owns a non-table info header
            Some(_) => {}
        }
    }
}
