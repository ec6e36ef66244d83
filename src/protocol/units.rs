//! Unit token table for property descriptors
//!
//! Sensor tools print unit tokens such as `RPM` or `°C`. The birth
//! certificate advertises a quantity and a normalized unit name instead.
//! Tokens missing from the table keep their raw text with
//! [`Quantity::Unknown`].

use serde::{Serialize, Serializer};

/// Physical quantity a property measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantity {
    Duration,
    Rate,
    Temperature,
    Voltage,
    Power,
    Current,
    Unknown,
}

/// Normalized unit name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Unit {
    Seconds,
    RotationsPerMinute,
    DegreeCelsius,
    Volt,
    Millivolt,
    Watt,
    Ampere,
    /// Token not in the table, passed through verbatim
    Raw(String),
}

impl Unit {
    pub fn as_str(&self) -> &str {
        match self {
            Unit::Seconds => "seconds",
            Unit::RotationsPerMinute => "rotations_per_minute",
            Unit::DegreeCelsius => "degree_celsius",
            Unit::Volt => "volt",
            Unit::Millivolt => "millivolt",
            Unit::Watt => "watt",
            Unit::Ampere => "ampere",
            Unit::Raw(token) => token,
        }
    }
}

impl Serialize for Unit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Map a raw unit token to its quantity and normalized unit
pub fn lookup_unit(token: &str) -> (Quantity, Unit) {
    match token.trim() {
        "RPM" => (Quantity::Rate, Unit::RotationsPerMinute),
        // `Â°C` is `°C` decoded as Latin-1
        "°C" | "Â°C" => (Quantity::Temperature, Unit::DegreeCelsius),
        "V" => (Quantity::Voltage, Unit::Volt),
        "mV" => (Quantity::Voltage, Unit::Millivolt),
        "W" => (Quantity::Power, Unit::Watt),
        "A" => (Quantity::Current, Unit::Ampere),
        other => (Quantity::Unknown, Unit::Raw(other.to_string())),
    }
}
