// Copyright 2025 Cowboy AI, LLC.

//! NATS connection settings shared by the KV store and the gateway

use crate::errors::{SagaError, SagaResult};
use async_nats::{Client, ConnectOptions};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, warn};

/// Configuration for the NATS client connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    /// NATS server URL (e.g., "nats://localhost:4222")
    pub url: String,

    /// Optional username for authentication
    pub user: Option<String>,

    /// Optional password for authentication
    pub password: Option<String>,

    /// Whether TLS is required
    pub tls_required: bool,

    /// Connection timeout in seconds
    pub connection_timeout_secs: u64,

    /// Reconnect interval in seconds
    pub reconnect_interval_secs: u64,

    /// Maximum reconnect attempts (0 = infinite)
    pub max_reconnects: usize,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            user: None,
            password: None,
            tls_required: false,
            connection_timeout_secs: 10,
            reconnect_interval_secs: 5,
            max_reconnects: 0, // Infinite reconnects
        }
    }
}

impl NatsConfig {
    /// Check the settings before connecting
    pub fn validate(&self) -> SagaResult<()> {
        if self.url.trim().is_empty() {
            return Err(SagaError::Configuration("NATS url must not be empty".to_string()));
        }
        if self.user.is_some() != self.password.is_some() {
            return Err(SagaError::Configuration(
                "NATS user and password must be set together".to_string(),
            ));
        }
        Ok(())
    }
}

/// Connect to NATS with the provided configuration
pub async fn connect(config: &NatsConfig) -> SagaResult<Client> {
    config.validate()?;

    let reconnect_interval = config.reconnect_interval_secs;
    let max_reconnects = config.max_reconnects;
    let mut options = ConnectOptions::new()
        .connection_timeout(Duration::from_secs(config.connection_timeout_secs))
        .reconnect_delay_callback(move |attempts| {
            if max_reconnects > 0 && attempts >= max_reconnects {
                Duration::from_secs(0)
            } else {
                Duration::from_secs(reconnect_interval)
            }
        })
        .event_callback(|event| async move {
            match event {
                async_nats::Event::Disconnected => warn!("NATS disconnected"),
                async_nats::Event::Connected => info!("NATS connected"),
                async_nats::Event::ClientError(err) => error!(error = %err, "NATS client error"),
                _ => {}
            }
        });

    if let (Some(user), Some(password)) = (&config.user, &config.password) {
        options = options.user_and_password(user.clone(), password.clone());
    }

    if config.tls_required {
        options = options.require_tls(true);
    }

    options.connect(&config.url).await.map_err(|e| {
        SagaError::Transport(format!("Failed to connect to {}: {}", config.url, e))
    })
}
