//! SR-IOV virtual function CNI plugin.
//!
//! This crate implements the `sriov` CNI plugin, which configures an SR-IOV
//! VF and hands it to a container network namespace, then restores the VF
//! exactly on teardown.
//!
//! # Responsibilities
//!
//! - Validate the network configuration before touching any device
//! - Snapshot the VF before the first mutation
//! - Apply MAC, VLAN, rate limits, spoof-check, trust and link state via
//!   `ip link set dev <pf> vf <n> ...`
//! - Move the VF netdev into the container namespace and rename it
//! - Roll back to the snapshot when anything fails after it
//! - Restore the snapshot on DEL from the attach record returned by ADD
//! - Compare live VF state with the configuration on CHECK
//!
//! # Attach phases
//!
//! | Phase | Meaning |
//! |-------|---------|
//! | validated | configuration accepted, device resolved |
//! | snapshotted | original VF state captured |
//! | configuring | VF table attributes being applied |
//! | moved | netdev in the container namespace |
//! | done | attach complete |
//! | rolled-back | failure after the snapshot, original state replayed |
//! | aborted | failure before the snapshot, nothing touched |
//!
//! # Example
//!
//! ```ignore
//! use sriov_cni::{IpLink, Netns, NetConf, SysfsLocator, VfMgr};
//!
//! let mgr = VfMgr::new(IpLink::default(), SysfsLocator::default(), Netns::new("/proc/1/ns/net"));
//! let config = NetConf::from_slice(&stdin)?.resolve()?;
//! let attachment = mgr.attach(config, &Netns::new(netns_path), "net1").await?;
//! ```

pub mod checker;
pub mod cni;
pub mod commands;
pub mod config;
pub mod configurator;
pub mod ip_link;
pub mod link;
pub mod locator;
pub mod logging;
pub mod mover;
pub mod rollback;
pub mod settings;
pub mod snapshot;
pub mod types;
mod vf_mgr;

pub use config::{NetConf, VfConfig};
pub use ip_link::IpLink;
pub use link::{LinkControl, Netns, VfAttr, VfAttrKind, VfInfo};
pub use locator::{DeviceLocator, SysfsLocator, VfDevice};
pub use mover::Placement;
pub use settings::Settings;
pub use types::{LinkState, VfState, VlanProto};
pub use vf_mgr::{AttachError, AttachPhase, AttachRecord, Attachment, VfMgr};
