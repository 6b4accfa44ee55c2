//! Verification helpers for NIC state
//!
//! Compare what a [`FakeNic`] holds with what a scenario expects

use thiserror::Error;

use sriov_cni::{Netns, VfInfo};

use crate::fake_nic::{FakeNic, Netdev};

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("VF {vf} table entry differs: expected {expected:?}, got {actual:?}")]
    VfEntryMismatch {
        vf: u32,
        expected: Box<VfInfo>,
        actual: Box<VfInfo>,
    },

    #[error("VF {vf} has no netdev")]
    NetdevMissing { vf: u32 },

    #[error("VF {vf} netdev differs: expected {expected}, got {actual}")]
    NetdevMismatch {
        vf: u32,
        expected: String,
        actual: String,
    },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Everything observable about one VF
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VfSnapshot {
    pub entry: VfInfo,
    pub netdev: Option<Netdev>,
}

impl VfSnapshot {
    pub fn capture(nic: &FakeNic, vf: u32) -> Self {
        Self {
            entry: nic.vf(vf),
            netdev: nic.netdev(vf),
        }
    }
}

/// NIC state verifier
pub struct NicVerifier<'a> {
    nic: &'a FakeNic,
}

impl<'a> NicVerifier<'a> {
    pub fn new(nic: &'a FakeNic) -> Self {
        Self { nic }
    }

    /// Verify that the VF table entry matches exactly
    pub fn assert_vf_entry(&self, vf: u32, expected: &VfInfo) -> VerifyResult<()> {
        let actual = self.nic.vf(vf);
        if &actual != expected {
            return Err(VerificationError::VfEntryMismatch {
                vf,
                expected: Box::new(expected.clone()),
                actual: Box::new(actual),
            });
        }
        Ok(())
    }

    /// Verify that the VF table entry and netdev match a snapshot
    pub fn assert_unchanged(&self, vf: u32, before: &VfSnapshot) -> VerifyResult<()> {
        self.assert_vf_entry(vf, &before.entry)?;
        let after = self.nic.netdev(vf);
        if after != before.netdev {
            return Err(VerificationError::NetdevMismatch {
                vf,
                expected: format!("{:?}", before.netdev),
                actual: format!("{:?}", after),
            });
        }
        Ok(())
    }

    /// Verify that the VF netdev sits in `netns` (host when `None`) as `name`
    pub fn assert_placement(&self, vf: u32, netns: Option<&Netns>, name: &str) -> VerifyResult<()> {
        let dev = self
            .nic
            .netdev(vf)
            .ok_or(VerificationError::NetdevMissing { vf })?;
        if dev.netns.as_ref() != netns || dev.name != name {
            return Err(VerificationError::NetdevMismatch {
                vf,
                expected: format!("{} in {:?}", name, netns),
                actual: format!("{} in {:?}", dev.name, dev.netns),
            });
        }
        Ok(())
    }
}
