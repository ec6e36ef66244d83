//! Error types for node presence and command handling
//!
//! Every failure a node can hit while talking to the broker or handling an
//! inbound command is one of the [`NodeError`] variants. Only
//! [`NodeError::ConnectFailure`] on the initial session is fatal; everything
//! else is logged at the per-message boundary and the node keeps running.

use thiserror::Error;

/// Main error type for node operations
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Connect failure: {message}")]
    ConnectFailure { message: String },

    #[error("Malformed payload on {topic}: {reason}")]
    MalformedCommandPayload { topic: String, reason: String },

    #[error("Unhandled topic: {topic}")]
    UnhandledTopic { topic: String },

    #[error("Transport error: {0}")]
    Transport(#[from] Box<dyn std::error::Error + Send + Sync>),

    #[error("Sensor error: {0}")]
    Sensor(#[from] crate::sensors::SensorError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl NodeError {
    /// Create connect failure error
    pub fn connect_failure<S: Into<String>>(message: S) -> Self {
        Self::ConnectFailure {
            message: message.into(),
        }
    }

    /// Create malformed payload error
    pub fn malformed_payload<T: Into<String>, R: Into<String>>(topic: T, reason: R) -> Self {
        Self::MalformedCommandPayload {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    /// Create unhandled topic error
    pub fn unhandled_topic<S: Into<String>>(topic: S) -> Self {
        Self::UnhandledTopic {
            topic: topic.into(),
        }
    }

    /// Wrap any transport error
    pub fn transport<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport(Box::new(error))
    }

    /// Whether the failure was caused by the inbound message itself rather
    /// than by the node (bad payload or unknown topic)
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            NodeError::MalformedCommandPayload { .. } | NodeError::UnhandledTopic { .. }
        )
    }
}

/// Result type for node operations
pub type NodeResult<T> = Result<T, NodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_failure_constructor() {
        let error = NodeError::connect_failure("broker unreachable");
        assert!(matches!(error, NodeError::ConnectFailure { .. }));
        assert_eq!(error.to_string(), "Connect failure: broker unreachable");
    }

    #[test]
    fn test_sensor_and_config_errors_convert() {
        fn resolve(config: crate::config::NodeConfig) -> NodeResult<String> {
            Ok(config.resolve_application_id()?)
        }
        fn sensors(command: &str) -> NodeResult<crate::sensors::LmSensorsSource> {
            Ok(crate::sensors::LmSensorsSource::new(command)?)
        }

        let mut config = crate::config::NodeConfig::default();
        config.node.application_id = Some("bad/id".to_string());
        let error = resolve(config).unwrap_err();
        assert!(matches!(error, NodeError::Config(_)));
        assert!(!error.is_input_error());

        assert!(matches!(sensors("   "), Err(NodeError::Sensor(_))));
    }

    #[test]
    fn test_malformed_payload_constructor() {
        let error = NodeError::malformed_payload("node/property/scan_rate/set", "not a number");
        assert!(matches!(error, NodeError::MalformedCommandPayload { .. }));
        assert_eq!(
            error.to_string(),
            "Malformed payload on node/property/scan_rate/set: not a number"
        );
    }

    #[test]
    fn test_unhandled_topic_constructor() {
        let error = NodeError::unhandled_topic("node/command/reboot");
        assert_eq!(error.to_string(), "Unhandled topic: node/command/reboot");
    }

    #[test]
    fn test_transport_wrapping() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "socket closed");
        let error = NodeError::transport(io);
        assert!(matches!(error, NodeError::Transport(_)));
        assert!(error.to_string().contains("socket closed"));
    }

    #[test]
    fn test_input_error_classification() {
        assert!(NodeError::malformed_payload("t", "r").is_input_error());
        assert!(NodeError::unhandled_topic("t").is_input_error());
        assert!(!NodeError::connect_failure("x").is_input_error());

        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert!(!NodeError::transport(io).is_input_error());
    }
}
