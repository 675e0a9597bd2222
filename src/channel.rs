// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Channel Management
//!
//! Connection settings and the creation of the connection and channel every other
//! lapin-backed component shares.

use crate::errors::AmqpError;
use lapin::{types::LongString, Channel, Connection, ConnectionProperties};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ConnectionConfig {
    /// Reported to the broker as the connection name and stamped in the `info` header.
    pub app_name: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub vhost: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            app_name: "rabbitmq-advanced".to_owned(),
            host: "localhost".to_owned(),
            port: 5672,
            user: "guest".to_owned(),
            password: "guest".to_owned(),
            vhost: String::new(),
        }
    }
}

impl ConnectionConfig {
    pub fn uri(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.vhost
        )
    }
}

/// Connects to the broker and opens a channel on the connection.
///
/// The connection is named after `app_name` so it can be told apart in the broker
/// management UI. Both handles are wrapped in `Arc` to be shared across tasks.
///
/// # Parameters
/// * `cfg` - Broker host, port, credentials and virtual host
///
/// # Returns
/// * `Result<(Arc<Connection>, Arc<Channel>), AmqpError>` -
///   The connection and its channel on success, or a connection/channel error.
///
/// # Example
/// ```ignore
/// let (conn, channel) = new_amqp_channel(&ConnectionConfig::default()).await?;
/// ```
pub async fn new_amqp_channel(
    cfg: &ConnectionConfig,
) -> Result<(Arc<Connection>, Arc<Channel>), AmqpError> {
    debug!(host = %cfg.host, port = cfg.port, "creating amqp connection...");
    let options =
        ConnectionProperties::default().with_connection_name(LongString::from(cfg.app_name.clone()));

    let conn = match Connection::connect(&cfg.uri(), options).await {
        Ok(c) => Ok(c),
        Err(err) => {
            error!(error = err.to_string(), "failure to connect");
            Err(AmqpError::ConnectionError)
        }
    }?;
    debug!("amqp connected");

    debug!("creating amqp channel...");
    match conn.create_channel().await {
        Ok(c) => {
            debug!("channel created");
            Ok((Arc::new(conn), Arc::new(c)))
        }
        Err(err) => {
            error!(error = err.to_string(), "error to create the channel");
            Err(AmqpError::ChannelError)
        }
    }
}
