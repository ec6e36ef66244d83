//! Birth certificate: the retained description of every topic a node
//! publishes or listens on.
//!
//! The certificate is a JSON array with one descriptor per topic:
//!
//! ```json
//! [
//!   { "topic": "node-1/command/rebirth", "modes": ["sub"], "type": "null" },
//!   { "topic": "node-1/property/fan1", "modes": ["pub"], "type": "numeric",
//!     "quantity": "rate", "unit": "rotations_per_minute" }
//! ]
//! ```

use crate::protocol::{lookup_unit, NodeTopics, Quantity, Unit};
use crate::sensors::SensorReading;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};

/// Direction of a topic from the node's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicMode {
    Pub,
    Sub,
}

/// Payload type carried on a topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicType {
    /// Payload is ignored
    Null,
    /// Decimal number as text
    Numeric,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicDescriptor {
    pub topic: String,
    pub modes: BTreeSet<TopicMode>,
    #[serde(rename = "type")]
    pub kind: TopicType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<Quantity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<Unit>,
}

impl TopicDescriptor {
    fn command(topic: String) -> Self {
        Self {
            topic,
            modes: BTreeSet::from([TopicMode::Sub]),
            kind: TopicType::Null,
            quantity: None,
            unit: None,
        }
    }

    fn numeric(topic: String, mode: TopicMode, quantity: Quantity, unit: Unit) -> Self {
        Self {
            topic,
            modes: BTreeSet::from([mode]),
            kind: TopicType::Numeric,
            quantity: Some(quantity),
            unit: Some(unit),
        }
    }
}

/// Ordered list of topic descriptors
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct BirthCertificate {
    descriptors: Vec<TopicDescriptor>,
}

impl BirthCertificate {
    pub fn descriptors(&self) -> &[TopicDescriptor] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Set of (topic, mode) pairs, for comparing two certificates
    pub fn topic_modes(&self) -> BTreeSet<(String, TopicMode)> {
        self.descriptors
            .iter()
            .flat_map(|d| d.modes.iter().map(move |m| (d.topic.clone(), *m)))
            .collect()
    }
}

/// Build the certificate for a node and its current sensor readings.
///
/// Fixed entries come first (rebirth, shutdown, scan_rate, scan_rate/set),
/// then one `pub` entry per sensor in reading order.
pub fn build_birth_certificate(topics: &NodeTopics, readings: &[SensorReading]) -> BirthCertificate {
    let mut descriptors = vec![
        TopicDescriptor::command(topics.command_rebirth()),
        TopicDescriptor::command(topics.command_shutdown()),
        TopicDescriptor::numeric(
            topics.scan_rate(),
            TopicMode::Pub,
            Quantity::Duration,
            Unit::Seconds,
        ),
        TopicDescriptor::numeric(
            topics.scan_rate_set(),
            TopicMode::Sub,
            Quantity::Duration,
            Unit::Seconds,
        ),
    ];

    for reading in unique_by_topic(topics, readings) {
        let (quantity, unit) = lookup_unit(&reading.unit);
        descriptors.push(TopicDescriptor::numeric(
            topics.property(&reading.name),
            TopicMode::Pub,
            quantity,
            unit,
        ));
    }

    BirthCertificate { descriptors }
}

/// Drop readings whose property topic collides with a parameter topic or an
/// earlier reading (sensor tools repeat labels such as `temp1` across chips).
pub fn unique_by_topic<'a>(
    topics: &NodeTopics,
    readings: &'a [SensorReading],
) -> Vec<&'a SensorReading> {
    let mut seen = HashSet::from([topics.scan_rate(), topics.scan_rate_set()]);
    readings
        .iter()
        .filter(|r| seen.insert(topics.property(&r.name)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn topics() -> NodeTopics {
        NodeTopics::new("node-1").unwrap()
    }

    #[test]
    fn test_fixed_entries_without_sensors() {
        let certificate = build_birth_certificate(&topics(), &[]);
        let value: Value = serde_json::from_str(&certificate.to_json_pretty().unwrap()).unwrap();

        assert_eq!(
            value,
            json!([
                { "topic": "node-1/command/rebirth", "modes": ["sub"], "type": "null" },
                { "topic": "node-1/command/shutdown", "modes": ["sub"], "type": "null" },
                {
                    "topic": "node-1/property/scan_rate",
                    "modes": ["pub"],
                    "type": "numeric",
                    "quantity": "duration",
                    "unit": "seconds"
                },
                {
                    "topic": "node-1/property/scan_rate/set",
                    "modes": ["sub"],
                    "type": "numeric",
                    "quantity": "duration",
                    "unit": "seconds"
                }
            ])
        );
    }

    #[test]
    fn test_sensor_entries_follow_fixed_entries() {
        let readings = vec![
            SensorReading::new("fan1", 2650.0, "RPM"),
            SensorReading::new("Core 0", 43.5, "°C"),
            SensorReading::new("energy", 12.0, "J"),
        ];
        let certificate = build_birth_certificate(&topics(), &readings);
        assert_eq!(certificate.len(), 7);

        let sensors = &certificate.descriptors()[4..];
        assert_eq!(sensors[0].topic, "node-1/property/fan1");
        assert_eq!(sensors[0].quantity, Some(Quantity::Rate));
        assert_eq!(sensors[0].unit, Some(Unit::RotationsPerMinute));

        assert_eq!(sensors[1].topic, "node-1/property/Core 0");
        assert_eq!(sensors[1].quantity, Some(Quantity::Temperature));

        assert_eq!(sensors[2].quantity, Some(Quantity::Unknown));
        assert_eq!(sensors[2].unit, Some(Unit::Raw("J".to_string())));

        for descriptor in sensors {
            assert_eq!(descriptor.kind, TopicType::Numeric);
            assert_eq!(descriptor.modes, BTreeSet::from([TopicMode::Pub]));
        }
    }

    #[test]
    fn test_duplicate_sensor_names_listed_once() {
        let readings = vec![
            SensorReading::new("temp1", 40.0, "°C"),
            SensorReading::new("temp1", 55.0, "°C"),
            SensorReading::new("temp/1", 30.0, "°C"),
        ];
        let certificate = build_birth_certificate(&topics(), &readings);
        let sensor_topics: Vec<&str> = certificate.descriptors()[4..]
            .iter()
            .map(|d| d.topic.as_str())
            .collect();
        assert_eq!(
            sensor_topics,
            vec!["node-1/property/temp1", "node-1/property/temp_1"]
        );

        let unique = unique_by_topic(&topics(), &readings);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].value, 40.0);
    }

    #[test]
    fn test_sensor_cannot_shadow_scan_rate() {
        let readings = vec![
            SensorReading::new("scan_rate", 3.0, "V"),
            SensorReading::new("scan/rate", 4.0, "V"),
            SensorReading::new("in0", 0.92, "V"),
        ];
        let certificate = build_birth_certificate(&topics(), &readings);

        let scan_rate_entries: Vec<&TopicDescriptor> = certificate
            .descriptors()
            .iter()
            .filter(|d| d.topic == "node-1/property/scan_rate")
            .collect();
        assert_eq!(scan_rate_entries.len(), 1);
        assert_eq!(scan_rate_entries[0].quantity, Some(Quantity::Duration));
        assert_eq!(certificate.len(), 5);

        let unique = unique_by_topic(&topics(), &readings);
        let names: Vec<&str> = unique.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["in0"]);
    }

    #[test]
    fn test_topic_modes_compare_across_builds() {
        let readings = vec![SensorReading::new("fan1", 1200.0, "RPM")];
        let first = build_birth_certificate(&topics(), &readings);
        let changed_values = vec![SensorReading::new("fan1", 900.0, "RPM")];
        let second = build_birth_certificate(&topics(), &changed_values);

        assert_eq!(first.topic_modes(), second.topic_modes());
        assert!(first
            .topic_modes()
            .contains(&("node-1/property/fan1".to_string(), TopicMode::Pub)));
    }
}
