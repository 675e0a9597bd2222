// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

use async_trait::async_trait;
use rabbitmq_advanced::{
    broker::BrokerClient,
    config::TopologyConfig,
    dispatcher::ConsumerHandler,
    errors::AmqpError,
    exchange::ExchangeDefinition,
    message::{
        Message, HEADER_CORRELATION_ID, HEADER_INFO, HEADER_ORIGINAL_EXCHANGE,
        HEADER_ORIGINAL_QUEUE, HEADER_REQUEUE_COUNT,
    },
    policy::{RequeuePolicy, ThresholdRequeuePolicy},
    publisher::Publisher,
    queue::{BindingDefinition, QueueDefinition},
    recoverer::{DeadLetterRecoverer, LogMessageExceptionHandler},
    requeue::{RequeueConsumer, RequeueMessage},
    scheduler::AutoRequeueScheduler,
    topology::TopologyBuilder,
};
use serde_json::json;
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

/// Broker routing by exact routing key match, enough for direct style bindings.
#[derive(Default)]
struct InMemoryBroker {
    exchanges: Mutex<Vec<String>>,
    bindings: Mutex<Vec<BindingDefinition>>,
    queues: Mutex<HashMap<String, VecDeque<Message>>>,
}

impl InMemoryBroker {
    fn enqueue(&self, queue: &str, exchange: &str, routing_key: &str, message: &Message) {
        let mut delivered = message.clone();
        delivered.properties.received_exchange = Some(exchange.to_owned());
        delivered.properties.received_routing_key = Some(routing_key.to_owned());
        delivered.properties.consumer_queue = Some(queue.to_owned());

        self.queues
            .lock()
            .unwrap()
            .entry(queue.to_owned())
            .or_default()
            .push_back(delivered);
    }

    fn depth(&self, queue: &str) -> usize {
        self.queues.lock().unwrap().get(queue).map_or(0, VecDeque::len)
    }
}

#[async_trait]
impl BrokerClient for InMemoryBroker {
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        self.exchanges.lock().unwrap().push(def.name.clone());
        Ok(())
    }

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), AmqpError> {
        self.queues.lock().unwrap().entry(def.name.clone()).or_default();
        Ok(())
    }

    async fn declare_binding(&self, def: &BindingDefinition) -> Result<(), AmqpError> {
        self.bindings.lock().unwrap().push(def.clone());
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &Message,
    ) -> Result<(), AmqpError> {
        let targets: Vec<String> = self
            .bindings
            .lock()
            .unwrap()
            .iter()
            .filter(|b| b.exchange == exchange && b.routing_key == routing_key)
            .map(|b| b.queue.clone())
            .collect();

        if targets.is_empty() {
            return Err(AmqpError::PublishingError(exchange.to_owned()));
        }

        for queue in targets {
            self.enqueue(&queue, exchange, routing_key, message);
        }
        Ok(())
    }

    async fn send(&self, queue: &str, message: &Message) -> Result<(), AmqpError> {
        self.enqueue(queue, "", queue, message);
        Ok(())
    }

    async fn receive(&self, queue: &str, _timeout: Duration) -> Result<Option<Message>, AmqpError> {
        Ok(self
            .queues
            .lock()
            .unwrap()
            .get_mut(queue)
            .and_then(VecDeque::pop_front))
    }
}

const TOPOLOGY: &str = r#"{
    "default-exchange": { "durable": true },
    "default-queue": { "durable": true },
    "dead-letter": {
        "dead-letter-exchange": { "name": "dlx", "type": "direct" }
    },
    "requeue": {
        "enabled": true,
        "exchange": { "name": "requeue.exchange", "type": "direct" },
        "queue": { "name": "requeue" },
        "routing-key": "requeue",
        "auto-requeue-enabled": true,
        "trigger-expression": "0 */5 * * * *",
        "batch-size": 5,
        "threshold": 2
    },
    "info-headers": { "team": "billing" },
    "exchanges": {
        "orders-ex": { "name": "orders.exchange", "type": "direct" }
    },
    "queues": {
        "orders-q": { "name": "orders", "dead-letter-enabled": true },
        "audit-q": { "name": "audit" }
    },
    "bindings": {
        "orders-binding": { "exchange": "orders-ex", "queue": "orders-q", "routing-key": "orders.created" }
    }
}"#;

struct Harness {
    broker: Arc<InMemoryBroker>,
    publisher: Arc<Publisher>,
    recoverer: DeadLetterRecoverer,
    requeue: RequeueConsumer,
    scheduler: AutoRequeueScheduler,
}

async fn harness() -> Harness {
    let broker = Arc::new(InMemoryBroker::default());
    let mut cfg = TopologyConfig::from_json(TOPOLOGY).unwrap();

    TopologyBuilder::new(broker.as_ref())
        .build(&mut cfg)
        .await
        .unwrap();

    let client: Arc<dyn BrokerClient> = broker.clone();
    let publisher = Arc::new(Publisher::from_config(client.clone(), &cfg, "orders-service", None));
    let recoverer = DeadLetterRecoverer::from_config(client.clone(), &cfg)
        .handler(Arc::new(LogMessageExceptionHandler));
    let policy: Arc<dyn RequeuePolicy> =
        Arc::new(ThresholdRequeuePolicy::from_config(cfg.requeue.as_ref()));
    let requeue = RequeueConsumer::from_config(client, Some(policy), cfg.requeue.as_ref());
    let scheduler = AutoRequeueScheduler::from_config(publisher.clone(), &cfg).unwrap();

    Harness {
        broker,
        publisher,
        recoverer,
        requeue,
        scheduler,
    }
}

impl Harness {
    /// Takes the next order and dead-letters it, as a failing consumer would.
    async fn fail_next_order(&self) {
        let mut msg = self
            .broker
            .receive("orders", Duration::ZERO)
            .await
            .unwrap()
            .expect("an order to consume");
        let cause = std::io::Error::other("payment service unavailable");

        self.recoverer.recover(&mut msg, &cause).await.unwrap();
    }
}

#[tokio::test]
async fn failed_message_is_dead_lettered_and_requeued_until_threshold() {
    let h = harness().await;
    assert_eq!(
        *h.broker.exchanges.lock().unwrap(),
        vec!["dlx", "orders.exchange", "requeue.exchange"]
    );

    h.publisher
        .publish_json("orders.exchange", "orders.created", &json!({ "order": 42 }))
        .await
        .unwrap();
    assert_eq!(h.broker.depth("orders"), 1);

    h.fail_next_order().await;
    assert_eq!(h.broker.depth("orders"), 0);
    assert_eq!(h.broker.depth("orders.DLQ"), 1);

    let dead = h.broker.queues.lock().unwrap()["orders.DLQ"][0].clone();
    assert_eq!(dead.header_str(HEADER_ORIGINAL_QUEUE), Some("orders"));
    assert_eq!(dead.header_str(HEADER_ORIGINAL_EXCHANGE), Some("orders.exchange"));
    assert_eq!(
        dead.properties.correlation_id.as_deref(),
        dead.header_str(HEADER_CORRELATION_ID)
    );
    assert_eq!(dead.headers()[HEADER_INFO]["team"], json!("billing"));

    // two requeues are admitted with a threshold of 2
    for attempt in 1..=2 {
        let report = h
            .requeue
            .on_message(&RequeueMessage::new("orders.DLQ", -1))
            .await
            .unwrap();
        assert_eq!(report.requeued, 1);
        assert_eq!(h.broker.depth("orders"), 1);
        assert_eq!(
            h.broker.queues.lock().unwrap()["orders"][0].headers()[HEADER_REQUEUE_COUNT],
            json!(attempt)
        );

        h.fail_next_order().await;
    }

    let report = h
        .requeue
        .on_message(&RequeueMessage::new("orders.DLQ", -1))
        .await
        .unwrap();
    assert_eq!(report.requeued, 0);
    assert_eq!(report.rejected, 1);
    assert_eq!(h.broker.depth("orders"), 0);
    assert_eq!(h.broker.depth("orders.DLQ"), 1);
}

#[tokio::test]
async fn scheduled_command_drains_dead_letter_queue() {
    let h = harness().await;

    for order in 0..3 {
        h.publisher
            .publish_json("orders.exchange", "orders.created", &json!({ "order": order }))
            .await
            .unwrap();
        h.fail_next_order().await;
    }
    assert_eq!(h.broker.depth("orders.DLQ"), 3);

    assert_eq!(h.scheduler.trigger().await, 1);
    let command = h
        .broker
        .receive("requeue", Duration::ZERO)
        .await
        .unwrap()
        .expect("a requeue command");
    let parsed: RequeueMessage = serde_json::from_slice(&command.body).unwrap();
    assert_eq!(parsed, RequeueMessage::new("orders.DLQ", 5));

    h.requeue.exec(&command).await.unwrap();

    assert_eq!(h.broker.depth("orders"), 3);
    assert_eq!(h.broker.depth("orders.DLQ"), 0);
}
