// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Auto Requeue Scheduler
//!
//! On every tick, submits one requeue command per dead-letter-enabled queue to the
//! requeue command channel. The schedule itself is a collaborator: the trigger
//! expression is opaque here and a `Schedule` decides when the next tick happens.

use crate::{
    config::TopologyConfig,
    errors::AmqpError,
    publisher::Publisher,
    requeue::RequeueMessage,
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, info};

/// Source of tick delays. `None` ends the schedule.
pub trait Schedule: Send {
    fn next_delay(&mut self) -> Option<Duration>;
}

/// Ticks at a fixed period, forever.
#[derive(Debug, Clone, Copy)]
pub struct IntervalSchedule {
    period: Duration,
}

impl IntervalSchedule {
    pub fn new(period: Duration) -> IntervalSchedule {
        IntervalSchedule { period }
    }
}

impl Schedule for IntervalSchedule {
    fn next_delay(&mut self) -> Option<Duration> {
        Some(self.period)
    }
}

pub struct AutoRequeueScheduler {
    publisher: Arc<Publisher>,
    exchange: String,
    routing_key: String,
    batch_size: i64,
    dead_letter_queues: Vec<String>,
}

impl AutoRequeueScheduler {
    /// Builds the scheduler from the requeue section. Fails when there is no requeue
    /// section or it names no exchange.
    pub fn from_config(
        publisher: Arc<Publisher>,
        cfg: &TopologyConfig,
    ) -> Result<AutoRequeueScheduler, AmqpError> {
        let Some(requeue) = &cfg.requeue else {
            return Err(AmqpError::configuration(
                "requeue configuration must be provided for auto requeue",
            ));
        };

        let Some(exchange) = &requeue.exchange else {
            return Err(AmqpError::configuration(
                "exchange must be provided for requeue",
            ));
        };

        let dead_letter_queues = cfg
            .dead_letter_queues()
            .map(|q| cfg.dead_letter_queue_name(&q.name))
            .collect();

        Ok(AutoRequeueScheduler {
            publisher,
            exchange: exchange.name.clone(),
            routing_key: requeue.routing_key.clone(),
            batch_size: requeue.batch_size,
            dead_letter_queues,
        })
    }

    pub fn dead_letter_queues(&self) -> &[String] {
        &self.dead_letter_queues
    }

    /// Fans out one requeue command per dead letter queue and returns how many were
    /// submitted. A failed submission is logged and does not stop the others.
    pub async fn trigger(&self) -> usize {
        let mut submitted = 0;

        for queue in &self.dead_letter_queues {
            let command = RequeueMessage::new(queue, self.batch_size);

            match self
                .publisher
                .publish_json(&self.exchange, &self.routing_key, &command)
                .await
            {
                Ok(()) => {
                    debug!(dead_letter_queue = %queue, "requeue command submitted");
                    submitted += 1;
                }
                Err(err) => error!(
                    error = err.to_string(),
                    dead_letter_queue = %queue,
                    "failure to submit requeue command"
                ),
            }
        }

        info!(submitted = submitted, "auto requeue triggered");
        submitted
    }

    /// Waits for each delay of `schedule` and triggers, until the schedule ends.
    pub async fn run(&self, mut schedule: impl Schedule) {
        while let Some(delay) = schedule.next_delay() {
            tokio::time::sleep(delay).await;
            self.trigger().await;
        }

        info!("auto requeue schedule finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        broker::MockBrokerClient,
        config::{DeadLetterSpec, RequeueSpec},
        exchange::ExchangeSpec,
        queue::QueueSpec,
    };

    fn config() -> TopologyConfig {
        let mut cfg = TopologyConfig::default();
        cfg.dead_letter = Some(DeadLetterSpec::new(ExchangeSpec::new("dlx")));
        cfg.queues
            .insert("orders".into(), QueueSpec::new("orders").dead_letter_enabled(true));
        cfg.queues.insert("audit".into(), QueueSpec::new("audit"));
        cfg.queues
            .insert("billing".into(), QueueSpec::new("billing").dead_letter_enabled(true));
        cfg.requeue = Some(RequeueSpec {
            enabled: true,
            exchange: Some(ExchangeSpec::new("requeue-ex")),
            queue: Some(QueueSpec::new("requeue")),
            routing_key: "requeue".into(),
            auto_requeue_enabled: true,
            trigger_expression: "0 */5 * * * *".into(),
            batch_size: 25,
            ..Default::default()
        });
        cfg
    }

    fn scheduler(broker: MockBrokerClient) -> AutoRequeueScheduler {
        let publisher = Arc::new(Publisher::new(Arc::new(broker)));
        AutoRequeueScheduler::from_config(publisher, &config()).unwrap()
    }

    fn command(msg: &crate::message::Message) -> RequeueMessage {
        serde_json::from_slice(&msg.body).unwrap()
    }

    #[tokio::test]
    async fn one_command_per_dead_letter_queue() {
        let mut broker = MockBrokerClient::new();
        broker
            .expect_publish()
            .withf(|exchange, key, msg| {
                let cmd = command(msg);
                exchange == "requeue-ex"
                    && key == "requeue"
                    && cmd.message_count == 25
                    && (cmd.dead_letter_queue == "orders.DLQ" || cmd.dead_letter_queue == "billing.DLQ")
            })
            .times(2)
            .returning(|_, _, _| Ok(()));

        assert_eq!(scheduler(broker).trigger().await, 2);
    }

    #[tokio::test]
    async fn failed_submission_does_not_stop_fan_out() {
        let mut broker = MockBrokerClient::new();
        broker
            .expect_publish()
            .withf(|_, _, msg| command(msg).dead_letter_queue == "orders.DLQ")
            .times(1)
            .returning(|exchange, _, _| Err(AmqpError::PublishingError(exchange.to_owned())));
        broker
            .expect_publish()
            .withf(|_, _, msg| command(msg).dead_letter_queue == "billing.DLQ")
            .times(1)
            .returning(|_, _, _| Ok(()));

        assert_eq!(scheduler(broker).trigger().await, 1);
    }

    #[tokio::test]
    async fn run_triggers_once_per_tick() {
        struct Ticks(usize);

        impl Schedule for Ticks {
            fn next_delay(&mut self) -> Option<Duration> {
                if self.0 == 0 {
                    return None;
                }
                self.0 -= 1;
                Some(Duration::from_millis(1))
            }
        }

        let mut broker = MockBrokerClient::new();
        broker.expect_publish().times(6).returning(|_, _, _| Ok(()));

        scheduler(broker).run(Ticks(3)).await;
    }

    #[test]
    fn requires_requeue_exchange() {
        let publisher = Arc::new(Publisher::new(Arc::new(MockBrokerClient::new())));
        let mut cfg = config();
        cfg.requeue = None;

        assert!(AutoRequeueScheduler::from_config(publisher, &cfg).is_err());
    }

    #[test]
    fn interval_schedule_never_ends() {
        let mut schedule = IntervalSchedule::new(Duration::from_secs(30));
        assert_eq!(schedule.next_delay(), Some(Duration::from_secs(30)));
        assert_eq!(schedule.next_delay(), Some(Duration::from_secs(30)));
    }
}
