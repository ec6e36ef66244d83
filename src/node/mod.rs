//! Sensor node: presence, birth certificate, remote commands and sampling
//!
//! A node owns the topic namespace `{application_id}/...`. While connected it
//! keeps a retained `ALIVE` on `STATE` (the broker replaces it with `DEAD`
//! through the last will if the session is lost), describes its topics in a
//! retained `BIRTH` certificate and publishes sensor values every scan
//! interval.

pub mod birth;
pub mod dispatcher;
pub mod lifecycle;
pub mod state;

pub use birth::{build_birth_certificate, BirthCertificate, TopicDescriptor, TopicMode, TopicType};
pub use dispatcher::{CommandDispatcher, CommandEffect};
pub use lifecycle::{NodeHandle, NodeLifecycle, NodeSettings, DEFAULT_TICK_INTERVAL};
pub use state::{
    AliveFlag, ConnectionEvent, ConnectionState, ExitReason, ParameterReader, ParameterWriter,
    RuntimeParameters, ScanRate, ScanRateError, ShutdownReason, MIN_SCAN_RATE_SECS,
};
