//! MQTT node presence and retained-state tooling
//!
//! A sensor node announces itself on an MQTT broker under its own topic
//! namespace, describes its topics in a retained birth certificate, publishes
//! sensor values on a configurable interval and reacts to remote commands.
//! Its presence is tracked with a retained `STATE` topic that the broker
//! flips to `DEAD` through the last will when the session is lost.
//!
//! A separate sweeper clears stale retained state off a broker.
//!
//! # Quick Start
//!
//! ```rust
//! use mqtt_presence::node::build_birth_certificate;
//! use mqtt_presence::protocol::NodeTopics;
//! use mqtt_presence::sensors::SensorReading;
//!
//! let topics = NodeTopics::new("rack-7").unwrap();
//! let readings = vec![SensorReading::new("fan1", 2650.0, "RPM")];
//!
//! let certificate = build_birth_certificate(&topics, &readings);
//! assert_eq!(certificate.len(), 5);
//! assert_eq!(topics.property("fan1"), "rack-7/property/fan1");
//!
//! let json = certificate.to_json_pretty().unwrap();
//! assert!(json.contains("rotations_per_minute"));
//! ```

pub mod config;
pub mod error;
pub mod node;
pub mod observability;
pub mod protocol;
pub mod sensors;
pub mod sweeper;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, ConfigOverrides, NodeConfig};
pub use error::{NodeError, NodeResult};
pub use node::{ConnectionState, ExitReason, NodeHandle, NodeLifecycle, NodeSettings, ScanRate};
pub use protocol::{NodeTopics, ValidationError};
pub use sensors::{LmSensorsSource, SensorReading, SensorSource};
pub use sweeper::{RetainedSweeper, SweepError, SweepOptions, SweepReport};
pub use transport::mqtt::MqttSession;
pub use transport::{InboundMessage, Transport, TransportEvent};
