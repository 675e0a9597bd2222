// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod consumer;

pub mod broker;
pub mod channel;
pub mod client;
pub mod config;
pub mod defaults;
pub mod dispatcher;
pub mod errors;
pub mod exchange;
pub mod message;
pub mod otel;
pub mod policy;
pub mod processor;
pub mod publisher;
pub mod queue;
pub mod recoverer;
pub mod requeue;
pub mod scheduler;
pub mod topology;
