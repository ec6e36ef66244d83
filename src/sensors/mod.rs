//! Sensor data sources
//!
//! The node never touches hardware itself; it asks a [`SensorSource`] for the
//! current readings whenever it samples or rebuilds its birth certificate.

use serde::Serialize;
use thiserror::Error;

pub mod lm_sensors;

pub use lm_sensors::{parse_sensors_output, LmSensorsSource};

/// One reading as reported by the source
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    pub name: String,
    pub value: f64,
    /// Raw unit token, e.g. `RPM` or `°C`
    pub unit: String,
}

impl SensorReading {
    pub fn new(name: impl Into<String>, value: f64, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value,
            unit: unit.into(),
        }
    }
}

/// Sensor read failures
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("Sensor command is empty")]
    EmptyCommand,
    #[error("Failed to run sensor command '{command}'")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Sensor command '{command}' exited with {status}: {stderr}")]
    NonZeroExit {
        command: String,
        status: String,
        stderr: String,
    },
}

/// Source of sensor readings
#[async_trait::async_trait]
pub trait SensorSource: Send + Sync {
    /// Read every sensor once, in a stable order
    async fn read_sensors(&self) -> Result<Vec<SensorReading>, SensorError>;
}
