//! In-memory SR-IOV NIC
//!
//! Models one PF with a VF table, the VF netdevs and the namespaces they
//! live in. Implements both [`LinkControl`] and [`DeviceLocator`] so a
//! [`sriov_cni::VfMgr`] can run against it. Clones share state.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use sriov_cni::commands::vf_attr_args;
use sriov_cni::{
    DeviceLocator, LinkControl, Netns, VfAttr, VfAttrKind, VfDevice, VfInfo, VfMgr,
};
use sriov_cni_common::{VfError, VfResult};

/// PF netdev name of the default topology.
pub const PF_NAME: &str = "enp3s0f0";

/// PF PCI address of the default topology.
pub const PF_ADDRESS: &str = "0000:03:00.0";

/// Namespace the fake treats as the host.
pub const HOST_NETNS: &str = "/proc/1/ns/net";

/// A container namespace that exists from the start.
pub const CONTAINER_NETNS: &str = "/var/run/netns/test-ctr";

/// Number of VFs in the default topology.
pub const NUM_VFS: u32 = 4;

/// Netdev operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkStep {
    Down,
    Up,
    Move,
    Rename,
    SetMac,
}

/// A VF netdev as the fake sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Netdev {
    pub name: String,
    /// `None` for the host namespace.
    pub netns: Option<Netns>,
    pub mac: String,
    pub up: bool,
}

#[derive(Debug)]
struct Vf {
    address: String,
    info: VfInfo,
    driver: Option<String>,
    netdev: Option<Netdev>,
}

#[derive(Debug)]
struct Inner {
    vfs: Vec<Vf>,
    namespaces: HashSet<Netns>,
    vf_writes: usize,
    link_writes: usize,
    fail_attrs: HashMap<VfAttrKind, usize>,
    fail_steps: HashSet<LinkStep>,
    fail_reads: bool,
    log: Vec<String>,
}

/// In-memory NIC with fault injection.
#[derive(Debug, Clone)]
pub struct FakeNic {
    inner: Arc<Mutex<Inner>>,
}

impl Default for FakeNic {
    fn default() -> Self {
        Self::new()
    }
}

fn command_failed(command: String, output: &str) -> VfError {
    VfError::ShellCommandFailed {
        command,
        exit_code: 2,
        output: output.to_string(),
    }
}

impl FakeNic {
    /// PF `enp3s0f0` with VFs `0000:03:02.0` .. `0000:03:02.3`, each with a
    /// host netdev `enp3s0f0v<N>` (down) bound to `iavf`.
    pub fn new() -> Self {
        let vfs = (0..NUM_VFS)
            .map(|i| Vf {
                address: vf_address(i),
                info: VfInfo::new(i),
                driver: Some("iavf".to_string()),
                netdev: Some(Netdev {
                    name: format!("{}v{}", PF_NAME, i),
                    netns: None,
                    mac: format!("52:54:00:00:03:0{}", i),
                    up: false,
                }),
            })
            .collect();

        let mut namespaces = HashSet::new();
        namespaces.insert(Netns::new(CONTAINER_NETNS));

        Self {
            inner: Arc::new(Mutex::new(Inner {
                vfs,
                namespaces,
                vf_writes: 0,
                link_writes: 0,
                fail_attrs: HashMap::new(),
                fail_steps: HashSet::new(),
                fail_reads: false,
                log: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// A VF manager driving this NIC, returning links to [`HOST_NETNS`].
    pub fn manager(&self) -> VfMgr<FakeNic, FakeNic> {
        VfMgr::new(self.clone(), self.clone(), Self::host_netns())
    }

    pub fn host_netns() -> Netns {
        Netns::new(HOST_NETNS)
    }

    pub fn container_netns() -> Netns {
        Netns::new(CONTAINER_NETNS)
    }

    /// Current VF table entry.
    pub fn vf(&self, index: u32) -> VfInfo {
        self.lock().vfs[index as usize].info.clone()
    }

    /// Overwrites a VF table entry without counting a mutation.
    pub fn set_vf_entry(&self, index: u32, info: VfInfo) {
        self.lock().vfs[index as usize].info = info;
    }

    /// Current netdev of a VF, if it has one.
    pub fn netdev(&self, index: u32) -> Option<Netdev> {
        self.lock().vfs[index as usize].netdev.clone()
    }

    /// Successful VF table writes so far.
    pub fn vf_mutations(&self) -> usize {
        self.lock().vf_writes
    }

    /// Successful netdev writes (state, name, address, namespace) so far.
    pub fn link_mutations(&self) -> usize {
        self.lock().link_writes
    }

    /// All successful writes so far.
    pub fn mutations(&self) -> usize {
        let inner = self.lock();
        inner.vf_writes + inner.link_writes
    }

    /// Every call made so far, in order.
    pub fn log(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    pub fn add_netns(&self, netns: &Netns) {
        self.lock().namespaces.insert(netns.clone());
    }

    /// Deletes a namespace. Its VF netdevs fall back to the host, as the
    /// kernel does with physical devices.
    pub fn remove_netns(&self, netns: &Netns) {
        let mut inner = self.lock();
        inner.namespaces.remove(netns);
        for vf in inner.vfs.iter_mut() {
            if let Some(dev) = vf.netdev.as_mut() {
                if dev.netns.as_ref() == Some(netns) {
                    dev.netns = None;
                    dev.up = false;
                }
            }
        }
    }

    /// Rebinds a VF to another driver. Userspace drivers take the netdev
    /// away.
    pub fn bind_driver(&self, index: u32, driver: &str) {
        let mut inner = self.lock();
        let vf = &mut inner.vfs[index as usize];
        vf.driver = Some(driver.to_string());
        if sriov_cni::locator::USERSPACE_DRIVERS.contains(&driver) {
            vf.netdev = None;
        }
    }

    /// The next `set_vf` of this kind fails.
    pub fn fail_attr_once(&self, kind: VfAttrKind) {
        self.fail_attr(kind, 1);
    }

    /// The next `times` calls to `set_vf` of this kind fail.
    pub fn fail_attr(&self, kind: VfAttrKind, times: usize) {
        self.lock().fail_attrs.insert(kind, times);
    }

    /// The next netdev operation of this kind fails.
    pub fn fail_step_once(&self, step: LinkStep) {
        self.lock().fail_steps.insert(step);
    }

    /// Every VF table read fails from now on.
    pub fn fail_reads(&self) {
        self.lock().fail_reads = true;
    }

    fn is_host(netns: Option<&Netns>) -> bool {
        match netns {
            None => true,
            Some(ns) => ns.path().as_os_str() == HOST_NETNS,
        }
    }
}

/// PCI address of VF `index` in the default topology.
pub fn vf_address(index: u32) -> String {
    format!("0000:03:02.{}", index)
}

impl Inner {
    fn check_pf(&self, pf: &str) -> VfResult<()> {
        if pf == PF_NAME {
            Ok(())
        } else {
            Err(command_failed(
                format!("ip link show dev {}", pf),
                "Cannot find device",
            ))
        }
    }

    fn vf_mut(&mut self, pf: &str, vf: u32) -> VfResult<&mut Vf> {
        self.check_pf(pf)?;
        self.vfs
            .get_mut(vf as usize)
            .ok_or_else(|| command_failed(format!("ip link set dev {} vf {}", pf, vf), "Invalid argument"))
    }

    fn netdev_mut(&mut self, ifname: &str, netns: Option<&Netns>) -> VfResult<&mut Netdev> {
        let host = FakeNic::is_host(netns);
        self.vfs
            .iter_mut()
            .filter_map(|vf| vf.netdev.as_mut())
            .find(|dev| {
                dev.name == ifname
                    && match (&dev.netns, host) {
                        (None, true) => true,
                        (Some(ns), false) => Some(ns) == netns,
                        _ => false,
                    }
            })
            .ok_or_else(|| {
                command_failed(
                    format!("ip link show dev {}", ifname),
                    &format!("Device \"{}\" does not exist.", ifname),
                )
            })
    }

    fn take_step_fault(&mut self, step: LinkStep, ifname: &str) -> VfResult<()> {
        if self.fail_steps.remove(&step) {
            return Err(command_failed(
                format!("ip link {:?} {}", step, ifname),
                "RTNETLINK answers: Device or resource busy",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl LinkControl for FakeNic {
    async fn vf_info(&self, pf: &str, vf: u32) -> VfResult<VfInfo> {
        let mut inner = self.lock();
        inner.log.push(format!("vf_info {} {}", pf, vf));
        if inner.fail_reads {
            return Err(command_failed(
                format!("ip -j link show dev {}", pf),
                "Operation not permitted",
            ));
        }
        Ok(inner.vf_mut(pf, vf)?.info.clone())
    }

    async fn set_vf(&self, pf: &str, vf: u32, attr: &VfAttr) -> VfResult<()> {
        let mut inner = self.lock();
        let command = format!("ip link set dev {} vf {} {}", pf, vf, vf_attr_args(attr));
        inner.log.push(command.clone());
        if let Some(left) = inner.fail_attrs.get_mut(&attr.kind()) {
            if *left > 0 {
                *left -= 1;
                return Err(command_failed(command, "RTNETLINK answers: Operation not supported"));
            }
        }
        inner.vf_mut(pf, vf)?.info.apply(attr);
        inner.vf_writes += 1;
        Ok(())
    }

    async fn link_mac(&self, ifname: &str, netns: Option<&Netns>) -> VfResult<String> {
        let mut inner = self.lock();
        Ok(inner.netdev_mut(ifname, netns)?.mac.clone())
    }

    async fn link_exists(&self, ifname: &str, netns: Option<&Netns>) -> VfResult<bool> {
        Ok(self.lock().netdev_mut(ifname, netns).is_ok())
    }

    async fn set_link_mac(&self, ifname: &str, netns: Option<&Netns>, mac: &str) -> VfResult<()> {
        let mut inner = self.lock();
        inner.log.push(format!("set_link_mac {} {}", ifname, mac));
        inner.take_step_fault(LinkStep::SetMac, ifname)?;
        inner.netdev_mut(ifname, netns)?.mac = mac.to_string();
        inner.link_writes += 1;
        Ok(())
    }

    async fn set_link_up(&self, ifname: &str, netns: Option<&Netns>, up: bool) -> VfResult<()> {
        let mut inner = self.lock();
        inner.log.push(format!("set_link_{} {}", if up { "up" } else { "down" }, ifname));
        inner.take_step_fault(if up { LinkStep::Up } else { LinkStep::Down }, ifname)?;
        inner.netdev_mut(ifname, netns)?.up = up;
        inner.link_writes += 1;
        Ok(())
    }

    async fn rename_link(
        &self,
        ifname: &str,
        netns: Option<&Netns>,
        new_name: &str,
    ) -> VfResult<()> {
        let mut inner = self.lock();
        inner.log.push(format!("rename_link {} {}", ifname, new_name));
        inner.take_step_fault(LinkStep::Rename, ifname)?;
        if inner.netdev_mut(new_name, netns).is_ok() {
            return Err(command_failed(
                format!("ip link set dev {} name {}", ifname, new_name),
                "RTNETLINK answers: File exists",
            ));
        }
        inner.netdev_mut(ifname, netns)?.name = new_name.to_string();
        inner.link_writes += 1;
        Ok(())
    }

    async fn move_link(&self, ifname: &str, from: Option<&Netns>, to: &Netns) -> VfResult<()> {
        let mut inner = self.lock();
        inner.log.push(format!("move_link {} {}", ifname, to));
        inner.take_step_fault(LinkStep::Move, ifname)?;
        let target = if Self::is_host(Some(to)) {
            None
        } else if inner.namespaces.contains(to) {
            Some(to.clone())
        } else {
            return Err(command_failed(
                format!("ip link set dev {} netns {}", ifname, to),
                "Invalid netns value",
            ));
        };
        inner.netdev_mut(ifname, from)?.netns = target;
        inner.link_writes += 1;
        Ok(())
    }

    fn netns_exists(&self, netns: &Netns) -> bool {
        Self::is_host(Some(netns)) || self.lock().namespaces.contains(netns)
    }
}

impl DeviceLocator for FakeNic {
    fn resolve(&self, address: &str) -> VfResult<VfDevice> {
        let inner = self.lock();
        let (index, vf) = inner
            .vfs
            .iter()
            .enumerate()
            .find(|(_, vf)| vf.address == address)
            .ok_or_else(|| VfError::device_resolution(address, "PCI device not found"))?;

        Ok(VfDevice {
            address: vf.address.clone(),
            pf_address: PF_ADDRESS.to_string(),
            pf_name: PF_NAME.to_string(),
            vf_index: index as u32,
            host_if_name: vf
                .netdev
                .as_ref()
                .filter(|dev| dev.netns.is_none())
                .map(|dev| dev.name.clone()),
            driver: vf.driver.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_vf_counts_mutations() {
        let nic = FakeNic::new();
        nic.set_vf(PF_NAME, 1, &VfAttr::Trust(true)).await.unwrap();
        nic.set_link_up("enp3s0f0v1", None, true).await.unwrap();
        assert!(nic.vf(1).trust);
        assert_eq!(nic.vf_mutations(), 1);
        assert_eq!(nic.link_mutations(), 1);
        assert_eq!(nic.mutations(), 2);
    }

    #[tokio::test]
    async fn test_fault_fires_once() {
        let nic = FakeNic::new();
        nic.fail_attr_once(VfAttrKind::Trust);
        assert!(nic.set_vf(PF_NAME, 1, &VfAttr::Trust(true)).await.is_err());
        assert!(nic.set_vf(PF_NAME, 1, &VfAttr::Trust(true)).await.is_ok());
    }

    #[tokio::test]
    async fn test_move_and_remove_netns() {
        let nic = FakeNic::new();
        let ctr = FakeNic::container_netns();
        nic.move_link("enp3s0f0v2", None, &ctr).await.unwrap();
        assert!(nic.link_exists("enp3s0f0v2", Some(&ctr)).await.unwrap());
        assert!(!nic.link_exists("enp3s0f0v2", None).await.unwrap());
        assert_eq!(nic.resolve("0000:03:02.2").unwrap().host_if_name, None);

        nic.remove_netns(&ctr);
        assert!(!nic.netns_exists(&ctr));
        assert!(nic.link_exists("enp3s0f0v2", None).await.unwrap());
    }

    #[test]
    fn test_resolve_unknown_device() {
        let err = FakeNic::new().resolve("0000:04:00.1").unwrap_err();
        assert_eq!(err.cni_code(), 100);
    }

    #[test]
    fn test_userspace_driver_drops_netdev() {
        let nic = FakeNic::new();
        nic.bind_driver(3, "vfio-pci");
        assert!(nic.netdev(3).is_none());
        assert!(nic.resolve("0000:03:02.3").unwrap().is_userspace_bound());
    }
}
