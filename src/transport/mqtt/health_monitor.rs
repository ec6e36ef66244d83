//! Pure reconnection logic for the MQTT session
//!
//! This module contains pure functions for reconnection decisions and
//! session state transitions.

use super::connection::{ReconnectConfig, SessionState};
use tracing::{error, info};

/// Pure health monitoring and reconnection decision logic
pub struct HealthMonitor;

impl HealthMonitor {
    /// Determine if reconnection should be attempted (pure function)
    /// Supports unlimited retries when max_attempts is None
    pub fn should_attempt_reconnection(
        current_attempts: u32,
        config: &ReconnectConfig,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }

        if let Some(max_attempts) = config.max_attempts {
            if current_attempts >= max_attempts {
                return ReconnectionDecision::AbortMaxAttemptsExceeded { max_attempts };
            }
        }

        let attempt = current_attempts + 1;
        ReconnectionDecision::Proceed {
            attempt,
            delay_ms: config.calculate_backoff_delay(attempt),
        }
    }

    /// Determine next state after a session event (pure function)
    pub fn determine_next_state(event: SessionEvent) -> SessionState {
        match event {
            SessionEvent::ConnAckReceived => {
                info!("MQTT session connected");
                SessionState::Connected
            }
            SessionEvent::DisconnectedByBroker => {
                info!("MQTT broker closed the session");
                SessionState::Disconnected("Broker disconnected".to_string())
            }
            SessionEvent::NetworkError(error) => {
                error!(error = %error, "MQTT event loop error");
                SessionState::Disconnected(error)
            }
            SessionEvent::ReconnectionStarted(attempt) => {
                info!(attempt, "Starting reconnection attempt");
                SessionState::Reconnecting(attempt)
            }
            SessionEvent::Stopped(reason) => {
                info!(reason = %reason, "MQTT event loop stopped");
                SessionState::Closed(reason)
            }
        }
    }

    /// Check if session state allows publishing and subscribing (pure function)
    pub fn can_publish(state: &SessionState) -> bool {
        matches!(state, SessionState::Connected)
    }
}

/// Session events that drive [`SessionState`]
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ConnAckReceived,
    DisconnectedByBroker,
    NetworkError(String),
    ReconnectionStarted(u32),
    Stopped(String),
}

/// Reconnection decision
#[derive(Debug, Clone, PartialEq)]
pub enum ReconnectionDecision {
    /// Wait `delay_ms`, then poll again
    Proceed { attempt: u32, delay_ms: u64 },
    AbortShutdownRequested,
    AbortMaxAttemptsExceeded { max_attempts: u32 },
}
