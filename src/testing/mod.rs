//! Testing utilities and mock implementations
//!
//! Mocks for the transport and sensor seams so node and sweeper behavior can
//! be exercised without a broker or lm-sensors installed.

pub mod mocks;

pub use mocks::*;
