//! lm-sensors text output as a sensor source

use super::{SensorError, SensorReading, SensorSource};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::process::Command;
use tracing::debug;

// `label:   +45.0°C  (high = ...)`; the first number after the colon is the reading
static READING_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([^:]+):([^0-9]+)([0-9.]+)[ ]?([^ ]+)").expect("valid reading pattern")
});

/// Runs the `sensors` tool (or a configured replacement) and parses its output
#[derive(Debug, Clone)]
pub struct LmSensorsSource {
    program: String,
    args: Vec<String>,
}

impl LmSensorsSource {
    /// Build from a command line such as `sensors` or `sensors -A coretemp-isa-0000`
    pub fn new(command: &str) -> Result<Self, SensorError> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or(SensorError::EmptyCommand)?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait::async_trait]
impl SensorSource for LmSensorsSource {
    async fn read_sensors(&self) -> Result<Vec<SensorReading>, SensorError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .await
            .map_err(|source| SensorError::CommandFailed {
                command: self.command_line(),
                source,
            })?;

        if !output.status.success() {
            return Err(SensorError::NonZeroExit {
                command: self.command_line(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let readings = parse_sensors_output(&stdout);
        debug!(count = readings.len(), "Read sensors");
        Ok(readings)
    }
}

/// Parse lm-sensors output into readings, skipping lines that carry none
pub fn parse_sensors_output(output: &str) -> Vec<SensorReading> {
    output
        .lines()
        .filter_map(|line| {
            let captures = READING_LINE.captures(line)?;
            let name = captures.get(1)?.as_str().trim();
            let gap = captures.get(2)?.as_str();
            let magnitude: f64 = captures.get(3)?.as_str().parse().ok()?;
            let unit = captures.get(4)?.as_str();

            let value = if gap.ends_with('-') {
                -magnitude
            } else {
                magnitude
            };

            Some(SensorReading::new(name, value, unit))
        })
        .collect()
}
