//! Topic namespace and payload vocabulary shared by nodes and tooling

pub mod topics;
pub mod units;

pub use topics::*;
pub use units::{lookup_unit, Quantity, Unit};
