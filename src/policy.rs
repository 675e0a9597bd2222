// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Requeue Admission Policies
//!
//! A policy decides, message by message, whether a dead-lettered message may go back
//! to its original queue. Policies may mutate the message only when they admit it.

use crate::{
    config::{RequeueSpec, DEFAULT_REQUEUE_THRESHOLD},
    message::{Message, HEADER_REQUEUE_COUNT},
};
use serde_json::Value;
use tracing::debug;

#[cfg_attr(test, mockall::automock)]
pub trait RequeuePolicy: Send + Sync {
    /// Returns true to admit `message` for requeue.
    fn can_requeue(&self, message: &mut Message) -> bool;
}

/// Admits a message while its `x-requeue-count` header is below the threshold,
/// incrementing the counter on every admission.
///
/// The counter travels with the message, so the policy keeps no state of its own.
#[derive(Debug, Clone)]
pub struct ThresholdRequeuePolicy {
    threshold: i64,
}

impl ThresholdRequeuePolicy {
    pub fn new(threshold: i64) -> ThresholdRequeuePolicy {
        ThresholdRequeuePolicy { threshold }
    }

    pub fn from_config(requeue: Option<&RequeueSpec>) -> ThresholdRequeuePolicy {
        Self::new(requeue.map_or(DEFAULT_REQUEUE_THRESHOLD, |r| r.threshold))
    }
}

impl Default for ThresholdRequeuePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEUE_THRESHOLD)
    }
}

impl RequeuePolicy for ThresholdRequeuePolicy {
    fn can_requeue(&self, message: &mut Message) -> bool {
        let count = requeue_count(message);

        if count >= self.threshold {
            debug!(count = count, threshold = self.threshold, "requeue threshold reached");
            return false;
        }

        message
            .headers_mut()
            .insert(HEADER_REQUEUE_COUNT.to_owned(), Value::from(count + 1));
        true
    }
}

fn requeue_count(message: &Message) -> i64 {
    match message.headers().get(HEADER_REQUEUE_COUNT) {
        Some(Value::Number(n)) => n.as_i64().unwrap_or_default(),
        Some(Value::String(s)) => s.parse().unwrap_or_default(),
        _ => 0,
    }
}
