//! Node state: connection state machine, runtime parameters and the
//! shutdown flag shared between the dispatcher and the lifecycle loop.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

/// Lowest accepted scan rate in seconds
pub const MIN_SCAN_RATE_SECS: f64 = 1.0;

/// Connection state as seen by the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Offline,
    Connecting,
    Online,
}

/// Inputs to the connection state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    ConnectRequested,
    Connected,
    Disconnected,
    Reconnecting,
}

impl ConnectionState {
    /// Next state for an event. Every pair is listed so a new state or
    /// event cannot be added without deciding its transitions.
    pub fn on_event(self, event: ConnectionEvent) -> ConnectionState {
        use ConnectionEvent as E;
        use ConnectionState as S;

        match (self, event) {
            (S::Offline, E::ConnectRequested) => S::Connecting,
            (S::Offline, E::Connected) => S::Online,
            (S::Offline, E::Disconnected) => S::Offline,
            (S::Offline, E::Reconnecting) => S::Connecting,

            (S::Connecting, E::ConnectRequested) => S::Connecting,
            (S::Connecting, E::Connected) => S::Online,
            (S::Connecting, E::Disconnected) => S::Offline,
            (S::Connecting, E::Reconnecting) => S::Connecting,

            (S::Online, E::ConnectRequested) => S::Online,
            (S::Online, E::Connected) => S::Online,
            (S::Online, E::Disconnected) => S::Offline,
            (S::Online, E::Reconnecting) => S::Connecting,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Offline => "offline",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Online => "online",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ScanRateError {
    #[error("Scan rate '{input}' is not a number")]
    NotANumber { input: String },
    #[error("Scan rate must be finite, got {value}")]
    NotFinite { value: f64 },
    #[error("Scan rate {value} is below the minimum of {min} seconds", min = MIN_SCAN_RATE_SECS)]
    BelowMinimum { value: f64 },
}

/// Sampling interval in seconds, always finite and at least one second
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct ScanRate(f64);

impl ScanRate {
    pub fn new(secs: f64) -> Result<Self, ScanRateError> {
        if !secs.is_finite() {
            return Err(ScanRateError::NotFinite { value: secs });
        }
        if secs < MIN_SCAN_RATE_SECS {
            return Err(ScanRateError::BelowMinimum { value: secs });
        }
        Ok(Self(secs))
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0
    }

    /// Interval as a duration, saturating for values too large to represent
    pub fn as_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.0).unwrap_or(Duration::MAX)
    }
}

impl Default for ScanRate {
    fn default() -> Self {
        Self(MIN_SCAN_RATE_SECS)
    }
}

impl FromStr for ScanRate {
    type Err = ScanRateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        let secs: f64 = input.parse().map_err(|_| ScanRateError::NotANumber {
            input: input.to_string(),
        })?;
        Self::new(secs)
    }
}

impl fmt::Display for ScanRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// Parameters remote commands may change while the node runs
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct RuntimeParameters {
    pub scan_rate: ScanRate,
}

/// Sole writer of the runtime parameters
#[derive(Debug)]
pub struct ParameterWriter {
    tx: watch::Sender<RuntimeParameters>,
}

/// Read side of the runtime parameters; cheap to clone
#[derive(Debug, Clone)]
pub struct ParameterReader {
    rx: watch::Receiver<RuntimeParameters>,
}

impl ParameterWriter {
    pub fn new(initial: RuntimeParameters) -> (ParameterWriter, ParameterReader) {
        let (tx, rx) = watch::channel(initial);
        (ParameterWriter { tx }, ParameterReader { rx })
    }

    /// Replace the scan rate and return the previous one
    pub fn set_scan_rate(&self, scan_rate: ScanRate) -> ScanRate {
        let mut previous = scan_rate;
        self.tx.send_modify(|params| {
            previous = params.scan_rate;
            params.scan_rate = scan_rate;
        });
        previous
    }

}

impl ParameterReader {
    pub fn scan_rate(&self) -> ScanRate {
        self.rx.borrow().scan_rate
    }

    /// Wait until a parameter changes; errors once the writer is gone
    pub async fn changed(&mut self) -> Result<RuntimeParameters, watch::error::RecvError> {
        self.rx.changed().await?;
        Ok(*self.rx.borrow_and_update())
    }
}

/// Why the node was asked to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownReason {
    Remote,
    Local,
}

/// Why [`run`](crate::node::NodeLifecycle::run) returned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    RemoteShutdown,
    LocalShutdown,
    TransportClosed,
}

impl From<ShutdownReason> for ExitReason {
    fn from(reason: ShutdownReason) -> Self {
        match reason {
            ShutdownReason::Remote => ExitReason::RemoteShutdown,
            ShutdownReason::Local => ExitReason::LocalShutdown,
        }
    }
}

const ALIVE: u8 = 0;
const STOP_REMOTE: u8 = 1;
const STOP_LOCAL: u8 = 2;

/// Shared "keep running" flag. The first shutdown request wins.
#[derive(Debug, Clone, Default)]
pub struct AliveFlag {
    inner: Arc<AtomicU8>,
}

impl AliveFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_alive(&self) -> bool {
        self.inner.load(Ordering::Acquire) == ALIVE
    }

    /// Clear the flag. Returns false if a shutdown was already requested.
    pub fn request_shutdown(&self, reason: ShutdownReason) -> bool {
        let code = match reason {
            ShutdownReason::Remote => STOP_REMOTE,
            ShutdownReason::Local => STOP_LOCAL,
        };
        self.inner
            .compare_exchange(ALIVE, code, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn shutdown_reason(&self) -> Option<ShutdownReason> {
        match self.inner.load(Ordering::Acquire) {
            STOP_REMOTE => Some(ShutdownReason::Remote),
            STOP_LOCAL => Some(ShutdownReason::Local),
            _ => None,
        }
    }
}

/// Tracks when the last periodic sample went out
#[derive(Debug, Clone, Copy, Default)]
pub struct Schedule {
    last: Option<Instant>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self, now: Instant) {
        self.last = Some(now);
    }

    /// Never due before the first reset
    pub fn is_due(&self, now: Instant, interval: Duration) -> bool {
        match self.last {
            Some(last) => now.saturating_duration_since(last) >= interval,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_connection_transitions() {
        use ConnectionEvent as E;
        use ConnectionState as S;

        let state = S::Offline.on_event(E::ConnectRequested);
        assert_eq!(state, S::Connecting);
        let state = state.on_event(E::Connected);
        assert_eq!(state, S::Online);
        let state = state.on_event(E::Reconnecting);
        assert_eq!(state, S::Connecting);
        let state = state.on_event(E::Disconnected);
        assert_eq!(state, S::Offline);
    }

    #[test]
    fn test_disconnect_always_goes_offline() {
        for state in [
            ConnectionState::Offline,
            ConnectionState::Connecting,
            ConnectionState::Online,
        ] {
            assert_eq!(
                state.on_event(ConnectionEvent::Disconnected),
                ConnectionState::Offline
            );
            assert_eq!(
                state.on_event(ConnectionEvent::Connected),
                ConnectionState::Online
            );
        }
    }

    #[test]
    fn test_scan_rate_parsing() {
        assert_eq!("5".parse::<ScanRate>().unwrap().as_secs_f64(), 5.0);
        assert_eq!(" 2.5\n".parse::<ScanRate>().unwrap().as_secs_f64(), 2.5);
        assert_eq!("1.0".parse::<ScanRate>().unwrap().as_secs_f64(), 1.0);

        assert_eq!(
            "0.5".parse::<ScanRate>(),
            Err(ScanRateError::BelowMinimum { value: 0.5 })
        );
        assert!(matches!(
            "fast".parse::<ScanRate>(),
            Err(ScanRateError::NotANumber { .. })
        ));
        assert!(matches!(
            "inf".parse::<ScanRate>(),
            Err(ScanRateError::NotFinite { .. })
        ));
        assert!(matches!(
            "NaN".parse::<ScanRate>(),
            Err(ScanRateError::NotFinite { .. })
        ));
        assert!(matches!(
            "-3".parse::<ScanRate>(),
            Err(ScanRateError::BelowMinimum { .. })
        ));
    }

    #[test]
    fn test_scan_rate_duration_saturates() {
        assert_eq!(
            ScanRate::new(2.5).unwrap().as_duration(),
            Duration::from_millis(2500)
        );
        assert_eq!(ScanRate::new(1.0e300).unwrap().as_duration(), Duration::MAX);
        assert_eq!(ScanRate::new(5.0).unwrap().to_string(), "5.0");
    }

    #[tokio::test]
    async fn test_parameter_writer_and_reader() {
        let (writer, mut reader) = ParameterWriter::new(RuntimeParameters::default());
        assert_eq!(reader.scan_rate(), ScanRate::default());

        let previous = writer.set_scan_rate(ScanRate::new(5.0).unwrap());
        assert_eq!(previous.as_secs_f64(), 1.0);

        let params = reader.changed().await.unwrap();
        assert_eq!(params.scan_rate.as_secs_f64(), 5.0);
        assert_eq!(reader.scan_rate().as_secs_f64(), 5.0);

        drop(writer);
        assert!(reader.changed().await.is_err());
    }

    #[test]
    fn test_first_shutdown_reason_wins() {
        let flag = AliveFlag::new();
        let other = flag.clone();
        assert!(flag.is_alive());
        assert_eq!(flag.shutdown_reason(), None);

        assert!(other.request_shutdown(ShutdownReason::Remote));
        assert!(!flag.request_shutdown(ShutdownReason::Local));
        assert!(!flag.is_alive());
        assert_eq!(flag.shutdown_reason(), Some(ShutdownReason::Remote));
        assert_eq!(
            ExitReason::from(ShutdownReason::Remote),
            ExitReason::RemoteShutdown
        );
    }

    #[test]
    fn test_schedule() {
        let mut schedule = Schedule::new();
        let start = Instant::now();
        let interval = Duration::from_secs(2);

        assert!(!schedule.is_due(start + interval, interval));

        schedule.reset(start);
        assert!(!schedule.is_due(start + Duration::from_millis(1999), interval));
        assert!(schedule.is_due(start + interval, interval));

        // An earlier instant never underflows
        schedule.reset(start + interval);
        assert!(!schedule.is_due(start, interval));
    }

    proptest! {
        #[test]
        fn test_accepted_rates_are_at_least_minimum(value in proptest::num::f64::ANY) {
            match ScanRate::new(value) {
                Ok(rate) => {
                    prop_assert!(rate.as_secs_f64() >= MIN_SCAN_RATE_SECS);
                    prop_assert!(rate.as_secs_f64().is_finite());
                }
                Err(_) => prop_assert!(!value.is_finite() || value < MIN_SCAN_RATE_SECS),
            }
        }
    }
}
