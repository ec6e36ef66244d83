//! Pure connection state management for the MQTT session
//!
//! This module contains pure functions for session state, reconnection
//! policy and option building.

use crate::config::MqttSection;
use crate::transport::WillMessage;
use rumqttc::v5::mqttbytes::v5::LastWill;
use rumqttc::v5::MqttOptions;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Session state for the MQTT event loop
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    /// Initial state - waiting for the first ConnAck
    Connecting,
    /// ConnAck received, publishing and subscribing allowed
    Connected,
    /// Disconnected with reason
    Disconnected(String),
    /// Attempting to reconnect (attempt count)
    Reconnecting(u32),
    /// Event loop stopped, either on request or after giving up
    Closed(String),
}

/// Reconnection configuration
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of consecutive reconnection attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Backoff pattern in milliseconds
    pub backoff_pattern: Vec<u64>,
    /// Delay to use after pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_pattern: vec![25, 50, 100, 250],
            sustained_delay: 250,
        }
    }
}

impl ReconnectConfig {
    /// Backoff delay for the given attempt: the pattern entry, then the
    /// sustained delay once the pattern is exhausted
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Publishing to {topic} failed")]
    PublishFailed {
        topic: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Subscription to {topic} failed")]
    SubscriptionFailed {
        topic: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Disconnect failed")]
    DisconnectFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: SessionState },
    #[error("Session already started")]
    AlreadyStarted,
}

impl MqttError {
    pub fn publish_failed<E>(topic: &str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::PublishFailed {
            topic: topic.to_string(),
            source: Box::new(source),
        }
    }

    pub fn subscription_failed<E>(topic: &str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::SubscriptionFailed {
            topic: topic.to_string(),
            source: Box::new(source),
        }
    }
}

/// Unique client id per session so two nodes never steal each other's session
pub fn generate_client_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

/// Build MQTT options from config, registering the will when present
pub fn configure_mqtt_options(
    client_prefix: &str,
    config: &MqttSection,
    will: Option<&WillMessage>,
) -> MqttOptions {
    let client_id = generate_client_id(client_prefix);
    let mut mqtt_options = MqttOptions::new(client_id, config.host.clone(), config.port);

    mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));

    if let Some(will) = will {
        // MQTT v5 LastWill takes 5 parameters: topic, payload, qos, retain, properties
        let lwt = LastWill::new(
            will.topic.clone(),
            will.payload.clone(),
            will.qos,
            will.retain,
            None,
        );
        mqtt_options.set_last_will(lwt);
    }

    mqtt_options
}
