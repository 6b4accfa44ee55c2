//! Shell command builders for VF and netdev operations.

use sriov_cni_common::shell::{self, shellquote};

use crate::link::{Netns, VfAttr};
use crate::types::toggle_str;

/// Builds `ip` command lines, optionally wrapped in `nsenter` to run them
/// inside another network namespace.
#[derive(Debug, Clone)]
pub struct IpCommands {
    ip: String,
    nsenter: String,
}

impl IpCommands {
    pub fn new(ip: impl Into<String>, nsenter: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            nsenter: nsenter.into(),
        }
    }

    /// `ip`, entering `netns` first when one is given.
    fn ip_in(&self, netns: Option<&Netns>) -> String {
        match netns {
            None => self.ip.clone(),
            Some(ns) => format!(
                "{} --net={} {}",
                self.nsenter,
                shellquote(&ns.path().to_string_lossy()),
                self.ip
            ),
        }
    }

    /// Build the command listing a PF together with its VF table
    pub fn show_vfs(&self, pf: &str) -> String {
        format!("{} -j link show dev {}", self.ip, shellquote(pf))
    }

    /// Build the command showing a single link
    pub fn show_link(&self, ifname: &str, netns: Option<&Netns>) -> String {
        format!("{} -j link show dev {}", self.ip_in(netns), shellquote(ifname))
    }

    /// Build the command applying one VF attribute
    pub fn set_vf(&self, pf: &str, vf: u32, attr: &VfAttr) -> String {
        format!(
            "{} link set dev {} vf {} {}",
            self.ip,
            shellquote(pf),
            vf,
            vf_attr_args(attr)
        )
    }

    /// Build set link MAC address command
    pub fn set_link_mac(&self, ifname: &str, netns: Option<&Netns>, mac: &str) -> String {
        format!(
            "{} link set dev {} address {}",
            self.ip_in(netns),
            shellquote(ifname),
            shellquote(mac)
        )
    }

    /// Build set link admin state command
    pub fn set_link_state(&self, ifname: &str, netns: Option<&Netns>, up: bool) -> String {
        format!(
            "{} link set dev {} {}",
            self.ip_in(netns),
            shellquote(ifname),
            if up { "up" } else { "down" }
        )
    }

    /// Build rename link command
    pub fn rename_link(&self, ifname: &str, netns: Option<&Netns>, new_name: &str) -> String {
        format!(
            "{} link set dev {} name {}",
            self.ip_in(netns),
            shellquote(ifname),
            shellquote(new_name)
        )
    }

    /// Build the command moving a link from `from` into `to`
    pub fn move_link(&self, ifname: &str, from: Option<&Netns>, to: &Netns) -> String {
        format!(
            "{} link set dev {} netns {}",
            self.ip_in(from),
            shellquote(ifname),
            shellquote(&to.path().to_string_lossy())
        )
    }
}

impl Default for IpCommands {
    fn default() -> Self {
        Self::new(shell::IP_CMD, shell::NSENTER_CMD)
    }
}

/// `ip link set ... vf N` arguments for one attribute.
pub fn vf_attr_args(attr: &VfAttr) -> String {
    match attr {
        VfAttr::Mac(mac) => format!("mac {}", shellquote(mac)),
        VfAttr::Vlan { vlan, qos, proto } => {
            format!("vlan {} qos {} proto {}", vlan, qos, proto.as_str())
        }
        VfAttr::Rate { min, max } => format!("min_tx_rate {} max_tx_rate {}", min, max),
        VfAttr::SpoofChk(on) => format!("spoofchk {}", toggle_str(*on)),
        VfAttr::Trust(on) => format!("trust {}", toggle_str(*on)),
        VfAttr::LinkState(state) => format!("state {}", state.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LinkState, VlanProto};

    fn cmds() -> IpCommands {
        IpCommands::new("ip", "nsenter")
    }

    #[test]
    fn test_vf_attr_args() {
        assert_eq!(
            vf_attr_args(&VfAttr::Mac("02:00:00:00:00:01".to_string())),
            "mac \"02:00:00:00:00:01\""
        );
        assert_eq!(
            vf_attr_args(&VfAttr::Vlan {
                vlan: 10,
                qos: 0,
                proto: VlanProto::Dot1AD
            }),
            "vlan 10 qos 0 proto 802.1ad"
        );
        assert_eq!(
            vf_attr_args(&VfAttr::Rate { min: 0, max: 100 }),
            "min_tx_rate 0 max_tx_rate 100"
        );
        assert_eq!(vf_attr_args(&VfAttr::SpoofChk(false)), "spoofchk off");
        assert_eq!(vf_attr_args(&VfAttr::Trust(true)), "trust on");
        assert_eq!(
            vf_attr_args(&VfAttr::LinkState(LinkState::Disable)),
            "state disable"
        );
    }

    #[test]
    fn test_set_vf_cmd() {
        let cmd = cmds().set_vf("enp3s0f0", 1, &VfAttr::Trust(false));
        assert_eq!(cmd, "ip link set dev \"enp3s0f0\" vf 1 trust off");
    }

    #[test]
    fn test_host_and_netns_commands() {
        let ns = Netns::new("/var/run/netns/cni-42");

        assert_eq!(
            cmds().set_link_state("eth0", None, false),
            "ip link set dev \"eth0\" down"
        );
        assert_eq!(
            cmds().rename_link("enp3s0f0v1", Some(&ns), "net1"),
            "nsenter --net=\"/var/run/netns/cni-42\" ip link set dev \"enp3s0f0v1\" name \"net1\""
        );
        assert_eq!(
            cmds().show_link("net1", Some(&ns)),
            "nsenter --net=\"/var/run/netns/cni-42\" ip -j link show dev \"net1\""
        );
    }

    #[test]
    fn test_move_link_cmd() {
        let host = Netns::new("/proc/1/ns/net");
        let ns = Netns::new("/var/run/netns/cni-42");

        assert_eq!(
            cmds().move_link("enp3s0f0v1", None, &ns),
            "ip link set dev \"enp3s0f0v1\" netns \"/var/run/netns/cni-42\""
        );
        assert_eq!(
            cmds().move_link("enp3s0f0v1", Some(&ns), &host),
            "nsenter --net=\"/var/run/netns/cni-42\" ip link set dev \"enp3s0f0v1\" netns \"/proc/1/ns/net\""
        );
    }

    #[test]
    fn test_shellquote_safety() {
        let cmd = cmds().rename_link("eth0", None, "net1; reboot");
        assert!(cmd.ends_with("name \"net1; reboot\""));
    }
}
