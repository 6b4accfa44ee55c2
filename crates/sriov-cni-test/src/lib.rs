//! Test infrastructure for the SR-IOV CNI plugin
//!
//! Provides:
//! - An in-memory NIC with VF table, netdevs, namespaces and fault injection
//! - Request fixtures for common configurations
//! - NIC state verification helpers

pub mod fake_nic;
pub mod fixtures;
mod verification;

pub use fake_nic::{vf_address, FakeNic, LinkStep, Netdev};
pub use fixtures::*;
pub use verification::*;
