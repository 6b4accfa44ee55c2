//! Resolution of a VF PCI address to its physical function and VF index.
//!
//! The sysfs layout used here:
//!
//! ```text
//! /sys/bus/pci/devices/<vf>/physfn        -> ../<pf>
//! /sys/bus/pci/devices/<pf>/virtfn<N>     -> ../<vf>
//! /sys/bus/pci/devices/<pf>/net/<pf netdev>
//! /sys/bus/pci/devices/<vf>/net/<vf netdev>   (only while in the host netns)
//! /sys/bus/pci/devices/<vf>/driver        -> .../drivers/<name>
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use sriov_cni_common::{VfError, VfResult};

/// Default sysfs mount point.
pub const SYSFS_ROOT: &str = "/sys";

/// Drivers that take the VF away from the kernel network stack.
pub const USERSPACE_DRIVERS: &[&str] = &["vfio-pci", "igb_uio", "uio_pci_generic"];

/// Regular expression to validate PCI address format: 0000:03:02.1
static PCI_ADDRESS_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{4}:[0-9a-fA-F]{2}:[0-9a-fA-F]{2}\.[0-7]$")
        .expect("Invalid PCI address regex")
});

/// Validate PCI address format.
pub fn is_valid_pci_address(address: &str) -> bool {
    PCI_ADDRESS_REGEX.is_match(address)
}

/// A resolved virtual function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VfDevice {
    /// PCI address of the VF.
    pub address: String,
    /// PCI address of the owning PF.
    pub pf_address: String,
    /// Netdev name of the owning PF (the handle for VF table operations).
    pub pf_name: String,
    /// Index of the VF in the PF's VF table.
    pub vf_index: u32,
    /// VF netdev name, if the VF currently has one in the host namespace.
    pub host_if_name: Option<String>,
    /// Driver the VF is bound to.
    pub driver: Option<String>,
}

impl VfDevice {
    /// True when the VF is bound to a userspace poll-mode driver.
    pub fn is_userspace_bound(&self) -> bool {
        self.driver
            .as_deref()
            .is_some_and(|d| USERSPACE_DRIVERS.contains(&d))
    }
}

/// Resolves device addresses to VFs.
pub trait DeviceLocator: Send + Sync {
    /// Resolves a VF PCI address. Fails when the address does not name a VF.
    fn resolve(&self, address: &str) -> VfResult<VfDevice>;
}

/// [`DeviceLocator`] backed by sysfs.
#[derive(Debug, Clone)]
pub struct SysfsLocator {
    root: PathBuf,
}

impl SysfsLocator {
    /// Creates a locator reading from the given sysfs root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn devices_path(&self) -> PathBuf {
        self.root.join("bus/pci/devices")
    }
}

impl Default for SysfsLocator {
    fn default() -> Self {
        Self::new(SYSFS_ROOT)
    }
}

impl DeviceLocator for SysfsLocator {
    fn resolve(&self, address: &str) -> VfResult<VfDevice> {
        if !is_valid_pci_address(address) {
            return Err(VfError::device_resolution(
                address,
                "invalid PCI address format (expected: 0000:03:02.1)",
            ));
        }

        let vf_path = self.devices_path().join(address);
        if !vf_path.exists() {
            return Err(VfError::device_resolution(address, "PCI device not found"));
        }

        let pf_address = link_target_name(&vf_path.join("physfn")).ok_or_else(|| {
            VfError::device_resolution(address, "not a virtual function (no physfn link)")
        })?;
        let pf_path = self.devices_path().join(&pf_address);

        let pf_name = first_netdev(&pf_path).ok_or_else(|| {
            VfError::device_resolution(
                address,
                format!("physical function {} has no network interface", pf_address),
            )
        })?;

        let vf_index = find_vf_index(&pf_path, address)?.ok_or_else(|| {
            VfError::device_resolution(
                address,
                format!("not listed among the VFs of {}", pf_address),
            )
        })?;

        let host_if_name = first_netdev(&vf_path);
        let driver = link_target_name(&vf_path.join("driver"));

        debug!(
            address = %address,
            pf = %pf_name,
            vf = vf_index,
            host_if_name = ?host_if_name,
            driver = ?driver,
            "Resolved virtual function"
        );

        Ok(VfDevice {
            address: address.to_string(),
            pf_address,
            pf_name,
            vf_index,
            host_if_name,
            driver,
        })
    }
}

/// File name of a symlink's target.
fn link_target_name(link: &Path) -> Option<String> {
    fs::read_link(link)
        .ok()
        .and_then(|target| target.file_name().map(|n| n.to_string_lossy().to_string()))
}

/// First netdev registered under a PCI device, in name order.
fn first_netdev(device_path: &Path) -> Option<String> {
    let entries = fs::read_dir(device_path.join("net")).ok()?;
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names.into_iter().next()
}

/// Index `N` of the `virtfn<N>` link of `pf_path` that points at `address`.
fn find_vf_index(pf_path: &Path, address: &str) -> VfResult<Option<u32>> {
    let entries = fs::read_dir(pf_path).map_err(|e| VfError::io(pf_path, e))?;

    for entry in entries.filter_map(|e| e.ok()) {
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(index) = name
            .strip_prefix("virtfn")
            .and_then(|n| n.parse::<u32>().ok())
        else {
            continue;
        };
        if link_target_name(&entry.path()).as_deref() == Some(address) {
            return Ok(Some(index));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    const PF: &str = "0000:03:00.0";
    const VF0: &str = "0000:03:02.0";
    const VF1: &str = "0000:03:02.1";

    /// Lays out a PF with two VFs; VF1 is bound to `vf1_driver`.
    fn fake_sysfs(vf1_driver: &str, vf1_netdev: Option<&str>) -> TempDir {
        let root = TempDir::new().unwrap();
        let devices = root.path().join("bus/pci/devices");

        fs::create_dir_all(devices.join(PF).join("net/enp3s0f0")).unwrap();
        for (idx, vf) in [VF0, VF1].iter().enumerate() {
            fs::create_dir_all(devices.join(vf)).unwrap();
            symlink(format!("../{}", PF), devices.join(vf).join("physfn")).unwrap();
            symlink(
                format!("../{}", vf),
                devices.join(PF).join(format!("virtfn{}", idx)),
            )
            .unwrap();
        }
        if let Some(netdev) = vf1_netdev {
            fs::create_dir_all(devices.join(VF1).join("net").join(netdev)).unwrap();
        }
        symlink(
            format!("../../../bus/pci/drivers/{}", vf1_driver),
            devices.join(VF1).join("driver"),
        )
        .unwrap();

        root
    }

    #[test]
    fn test_pci_address_validation() {
        assert!(is_valid_pci_address("0000:03:02.1"));
        assert!(is_valid_pci_address("ABCD:12:34.5"));
        assert!(!is_valid_pci_address("03:02.1"));
        assert!(!is_valid_pci_address("0000:03:02.8"));
        assert!(!is_valid_pci_address("enp3s0f0"));
    }

    #[test]
    fn test_resolve_vf() {
        let root = fake_sysfs("iavf", Some("enp3s0f0v1"));
        let locator = SysfsLocator::new(root.path());

        let dev = locator.resolve(VF1).unwrap();
        assert_eq!(dev.pf_address, PF);
        assert_eq!(dev.pf_name, "enp3s0f0");
        assert_eq!(dev.vf_index, 1);
        assert_eq!(dev.host_if_name.as_deref(), Some("enp3s0f0v1"));
        assert_eq!(dev.driver.as_deref(), Some("iavf"));
        assert!(!dev.is_userspace_bound());
    }

    #[test]
    fn test_resolve_vf_moved_out_of_host() {
        let root = fake_sysfs("iavf", None);
        let dev = SysfsLocator::new(root.path()).resolve(VF1).unwrap();
        assert_eq!(dev.host_if_name, None);
        assert!(!dev.is_userspace_bound());
    }

    #[test]
    fn test_resolve_userspace_bound_vf() {
        let root = fake_sysfs("vfio-pci", None);
        let dev = SysfsLocator::new(root.path()).resolve(VF1).unwrap();
        assert!(dev.is_userspace_bound());
    }

    #[test]
    fn test_resolve_pf_is_not_a_vf() {
        let root = fake_sysfs("iavf", None);
        let err = SysfsLocator::new(root.path()).resolve(PF).unwrap_err();
        assert!(matches!(err, VfError::DeviceResolution { .. }));
        assert!(err.to_string().contains("no physfn"));
    }

    #[test]
    fn test_resolve_missing_device() {
        let root = fake_sysfs("iavf", None);
        let err = SysfsLocator::new(root.path())
            .resolve("0000:04:00.0")
            .unwrap_err();
        assert!(err.to_string().contains("PCI device not found"));
    }
}
