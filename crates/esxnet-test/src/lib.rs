//! Integration test infrastructure for esxnetcfg
//!
//! Provides:
//! - A simulated ESXi host and a gateway over it
//! - Host layout fixtures for each network profile
//! - Call log verification helpers

pub mod fixtures;
mod simulated;
mod verification;

pub use fixtures::*;
pub use simulated::{FailureMode, GatewayCall, SimulatedGateway, SimulatedHost};
pub use verification::*;
