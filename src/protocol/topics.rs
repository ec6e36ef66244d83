//! Node topic namespace and application id validation
//!
//! Every topic a node owns lives under `{application_id}/`. The suffixes are
//! fixed; only sensor property names vary and they are sanitized so a sensor
//! label can never inject a level separator or wildcard.

use thiserror::Error;

/// Retained payload on `STATE` while the node is up
pub const STATE_ALIVE: &str = "ALIVE";
/// Retained payload on `STATE` once the node is gone (will or clean exit)
pub const STATE_DEAD: &str = "DEAD";

pub const STATE_SUFFIX: &str = "STATE";
pub const BIRTH_SUFFIX: &str = "BIRTH";
pub const REBIRTH_SUFFIX: &str = "command/rebirth";
pub const SHUTDOWN_SUFFIX: &str = "command/shutdown";
pub const SCAN_RATE_SUFFIX: &str = "property/scan_rate";
pub const SCAN_RATE_SET_SUFFIX: &str = "property/scan_rate/set";

/// Topic builder for one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTopics {
    application_id: String,
}

impl NodeTopics {
    /// Create topics for a validated application id
    pub fn new(application_id: &str) -> Result<Self, ValidationError> {
        validate_application_id(application_id)?;
        Ok(Self {
            application_id: application_id.to_string(),
        })
    }

    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    /// Full topic for a suffix under this node's namespace
    pub fn topic(&self, suffix: &str) -> String {
        format!("{}/{}", self.application_id, suffix)
    }

    pub fn state(&self) -> String {
        self.topic(STATE_SUFFIX)
    }

    pub fn birth(&self) -> String {
        self.topic(BIRTH_SUFFIX)
    }

    pub fn command_rebirth(&self) -> String {
        self.topic(REBIRTH_SUFFIX)
    }

    pub fn command_shutdown(&self) -> String {
        self.topic(SHUTDOWN_SUFFIX)
    }

    pub fn scan_rate(&self) -> String {
        self.topic(SCAN_RATE_SUFFIX)
    }

    pub fn scan_rate_set(&self) -> String {
        self.topic(SCAN_RATE_SET_SUFFIX)
    }

    /// `property/<name>` with the sensor name sanitized
    pub fn property(&self, name: &str) -> String {
        self.topic(&format!("property/{}", sanitize_property_name(name)))
    }

    /// Topics the node subscribes to on every connect
    pub fn command_subscriptions(&self) -> [String; 3] {
        [
            self.command_rebirth(),
            self.command_shutdown(),
            self.scan_rate_set(),
        ]
    }

    /// Suffix of a topic in this node's namespace, if it belongs to it
    pub fn strip_namespace<'a>(&self, topic: &'a str) -> Option<&'a str> {
        topic
            .strip_prefix(self.application_id.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
    }
}

/// Replace characters that would change the meaning of a topic level
pub fn sanitize_property_name(name: &str) -> String {
    let trimmed = name.trim();
    let cleaned: String = trimmed
        .chars()
        .map(|c| match c {
            '/' | '+' | '#' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

/// Decimal string with a decimal point (`5.0`, `45.5`)
pub fn format_decimal(value: f64) -> String {
    format!("{value:?}")
}

pub fn validate_application_id(application_id: &str) -> Result<(), ValidationError> {
    if application_id.is_empty() {
        return Err(ValidationError::EmptyApplicationId);
    }

    for ch in application_id.chars() {
        if !ch.is_ascii_alphanumeric() && ch != '.' && ch != '_' && ch != '-' {
            return Err(ValidationError::InvalidApplicationIdChar(ch));
        }
    }

    Ok(())
}

/// Validation errors for node identity
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Application ID cannot be empty")]
    EmptyApplicationId,
    #[error("Application ID contains invalid character: '{0}'")]
    InvalidApplicationIdChar(char),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn topics() -> NodeTopics {
        NodeTopics::new("node-1").unwrap()
    }

    #[test]
    fn test_node_topics() {
        let topics = topics();
        assert_eq!(topics.state(), "node-1/STATE");
        assert_eq!(topics.birth(), "node-1/BIRTH");
        assert_eq!(topics.command_rebirth(), "node-1/command/rebirth");
        assert_eq!(topics.command_shutdown(), "node-1/command/shutdown");
        assert_eq!(topics.scan_rate(), "node-1/property/scan_rate");
        assert_eq!(topics.scan_rate_set(), "node-1/property/scan_rate/set");
        assert_eq!(topics.property("Core 0"), "node-1/property/Core 0");
    }

    #[test]
    fn test_command_subscriptions() {
        assert_eq!(
            topics().command_subscriptions(),
            [
                "node-1/command/rebirth".to_string(),
                "node-1/command/shutdown".to_string(),
                "node-1/property/scan_rate/set".to_string(),
            ]
        );
    }

    #[test]
    fn test_strip_namespace() {
        let topics = topics();
        assert_eq!(
            topics.strip_namespace("node-1/command/rebirth"),
            Some("command/rebirth")
        );
        assert_eq!(topics.strip_namespace("node-10/command/rebirth"), None);
        assert_eq!(topics.strip_namespace("other/command/rebirth"), None);
        assert_eq!(topics.strip_namespace("node-1"), None);
    }

    #[test]
    fn test_property_names_are_sanitized() {
        assert_eq!(sanitize_property_name("in0/vcore"), "in0_vcore");
        assert_eq!(sanitize_property_name("fan+1#"), "fan_1_");
        assert_eq!(sanitize_property_name("  temp1 "), "temp1");
        assert_eq!(sanitize_property_name(""), "_");
    }

    #[test]
    fn test_format_decimal_keeps_decimal_point() {
        assert_eq!(format_decimal(5.0), "5.0");
        assert_eq!(format_decimal(1.0), "1.0");
        assert_eq!(format_decimal(45.5), "45.5");
        assert_eq!(format_decimal(2650.0), "2650.0");
    }

    #[test]
    fn test_application_id_validation_examples() {
        assert!(validate_application_id("my-node").is_ok());
        assert!(validate_application_id("rack_7.sensor-2").is_ok());

        assert_eq!(
            validate_application_id(""),
            Err(ValidationError::EmptyApplicationId)
        );
        assert_eq!(
            validate_application_id("a/b"),
            Err(ValidationError::InvalidApplicationIdChar('/'))
        );
        assert_eq!(
            validate_application_id("node#"),
            Err(ValidationError::InvalidApplicationIdChar('#'))
        );
        assert!(NodeTopics::new("node+1").is_err());
    }

    proptest! {
        #[test]
        fn test_valid_application_id_format(id in "[a-zA-Z0-9._-]{1,64}") {
            prop_assert!(validate_application_id(&id).is_ok(), "Valid id should pass: {}", id);
        }

        #[test]
        fn test_invalid_application_id_chars(id in "[^a-zA-Z0-9._-]{1}[a-zA-Z0-9._-]*") {
            prop_assert!(validate_application_id(&id).is_err(), "Invalid id should fail: {}", id);
        }

        #[test]
        fn test_sanitized_property_stays_one_level(name in ".*") {
            let sanitized = sanitize_property_name(&name);
            prop_assert!(!sanitized.is_empty());
            prop_assert!(!sanitized.contains('/'));
            prop_assert!(!sanitized.contains('+'));
            prop_assert!(!sanitized.contains('#'));
        }

        #[test]
        fn test_format_decimal_round_trips(value in -1.0e9f64..1.0e9f64) {
            let text = format_decimal(value);
            prop_assert_eq!(text.parse::<f64>().unwrap(), value);
        }
    }
}
