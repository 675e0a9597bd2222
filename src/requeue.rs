// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Requeue Engine
//!
//! A `RequeueMessage` asks for a bounded drain of one dead letter queue. The
//! `RequeueConsumer` receives messages from that queue in order, asks the admission
//! policy about each one and sends admitted messages back to the queue recorded in
//! their `x-original-queue` header. Rejected messages are collected and pushed back
//! to the dead letter queue only once the whole batch is done.

use crate::{
    broker::BrokerClient,
    config::{RequeueSpec, DEFAULT_RECEIVE_TIMEOUT_MS},
    dispatcher::ConsumerHandler,
    errors::{AmqpError, HandlerError},
    message::{Message, HEADER_CORRELATION_ID, HEADER_ORIGINAL_QUEUE},
    policy::RequeuePolicy,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::{error, info, warn};

/// Command to drain up to `message_count` messages from `dead_letter_queue`.
/// A negative count drains until the queue is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequeueMessage {
    pub dead_letter_queue: String,
    #[serde(default)]
    pub message_count: i64,
}

impl RequeueMessage {
    pub fn new(dead_letter_queue: &str, message_count: i64) -> RequeueMessage {
        RequeueMessage {
            dead_letter_queue: dead_letter_queue.to_owned(),
            message_count,
        }
    }
}

/// Outcome of one requeue command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequeueReport {
    pub requeued: usize,
    pub rejected: usize,
}

/// Drains dead letter queues back to their original queues.
pub struct RequeueConsumer {
    broker: Arc<dyn BrokerClient>,
    policy: Option<Arc<dyn RequeuePolicy>>,
    timeout: Duration,
}

impl RequeueConsumer {
    /// Without a policy every drained message is rejected.
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        policy: Option<Arc<dyn RequeuePolicy>>,
        timeout: Duration,
    ) -> RequeueConsumer {
        RequeueConsumer {
            broker,
            policy,
            timeout,
        }
    }

    /// Takes the receive timeout from the requeue section, or the default.
    pub fn from_config(
        broker: Arc<dyn BrokerClient>,
        policy: Option<Arc<dyn RequeuePolicy>>,
        requeue: Option<&RequeueSpec>,
    ) -> RequeueConsumer {
        let timeout_ms = requeue.map_or(DEFAULT_RECEIVE_TIMEOUT_MS, |r| r.receive_timeout_ms);
        Self::new(broker, policy, Duration::from_millis(timeout_ms))
    }

    /// Drains the dead letter queue named by `request`.
    ///
    /// Every received message goes through the admission policy: admitted messages
    /// are sent back to their original queue, rejected ones are held until the batch
    /// ends and then returned to the dead letter queue. Receiving stops once
    /// `message_count` messages were handled (never for a negative count) or when the
    /// queue has nothing more to deliver within the receive timeout.
    ///
    /// When the broker fails midway, every message still held is returned to the dead
    /// letter queue before the first error is reported.
    ///
    /// # Parameters
    /// * `request` - the dead letter queue and how many messages to take from it
    ///
    /// # Returns
    /// * `Result<RequeueReport, AmqpError>` - how many messages were requeued and
    ///   rejected, or the first broker error
    pub async fn on_message(&self, request: &RequeueMessage) -> Result<RequeueReport, AmqpError> {
        info!(
            dead_letter_queue = %request.dead_letter_queue,
            message_count = request.message_count,
            "requeue processing started"
        );

        let mut count: i64 = 0;
        let mut report = RequeueReport::default();
        let mut failures = vec![];
        let mut first_error = None;

        loop {
            let mut msg = match self
                .broker
                .receive(&request.dead_letter_queue, self.timeout)
                .await
            {
                Ok(Some(msg)) => msg,
                Ok(None) => break,
                Err(err) => {
                    error!(
                        error = err.to_string(),
                        dead_letter_queue = %request.dead_letter_queue,
                        "failure to receive from the dead letter queue, stopping the batch"
                    );
                    first_error = Some(err);
                    break;
                }
            };

            match self.admit(&mut msg) {
                Some(queue) => match self.broker.send(&queue, &msg).await {
                    Ok(()) => report.requeued += 1,
                    Err(err) => {
                        error!(
                            error = err.to_string(),
                            queue = %queue,
                            "failure to requeue message, stopping the batch"
                        );
                        failures.push(msg);
                        first_error = Some(err);
                        break;
                    }
                },
                None => failures.push(msg),
            }

            count += 1;
            if request.message_count >= 0 && count >= request.message_count {
                break;
            }
        }

        report.rejected = failures.len();
        for msg in &failures {
            if let Err(err) = self.broker.send(&request.dead_letter_queue, msg).await {
                error!(
                    error = err.to_string(),
                    dead_letter_queue = %request.dead_letter_queue,
                    "failure to return message to the dead letter queue"
                );
                first_error = first_error.or(Some(err));
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }

        info!(
            dead_letter_queue = %request.dead_letter_queue,
            requeued = report.requeued,
            rejected = report.rejected,
            "requeue processing completed"
        );

        Ok(report)
    }

    /// Original queue of an admitted message.
    ///
    /// A message without `x-original-queue` never reached the recoverer; it is
    /// rejected before the policy sees it so its counter is untouched.
    fn admit(&self, msg: &mut Message) -> Option<String> {
        let correlation_id = msg
            .header_str(HEADER_CORRELATION_ID)
            .unwrap_or_default()
            .to_owned();

        let Some(queue) = msg.header_str(HEADER_ORIGINAL_QUEUE).map(str::to_owned) else {
            error!(
                correlation_id = %correlation_id,
                "dead-lettered message has no original queue, returning it to the dead letter queue"
            );
            return None;
        };

        let Some(policy) = &self.policy else {
            warn!(
                correlation_id = %correlation_id,
                "no requeue policy configured, returning message to the dead letter queue"
            );
            return None;
        };

        if !policy.can_requeue(msg) {
            warn!(
                correlation_id = %correlation_id,
                "can not requeue the message as per the requeue policy"
            );
            return None;
        }

        Some(queue)
    }
}

#[async_trait]
impl ConsumerHandler for RequeueConsumer {
    async fn exec(&self, message: &Message) -> Result<(), HandlerError> {
        let request: RequeueMessage = serde_json::from_slice(&message.body)?;
        self.on_message(&request).await?;
        Ok(())
    }
}
