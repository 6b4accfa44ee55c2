//! [`LinkControl`] implementation driving the `ip` tool.
//!
//! Reads use `ip -j` and are decoded from its JSON output; writes are plain
//! `ip link set` invocations. Commands aimed at another namespace are run
//! through `nsenter --net=<path>`.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, instrument};

use sriov_cni_common::{shell, VfError, VfResult};

use crate::commands::IpCommands;
use crate::link::{LinkControl, Netns, VfAttr, VfInfo};
use crate::types::{LinkState, VlanProto, ZERO_MAC};

/// One element of `ip -j link show` output.
#[derive(Debug, Deserialize)]
struct IpLinkEntry {
    ifname: String,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    vfinfo_list: Vec<IpVfEntry>,
}

/// One element of `vfinfo_list`.
#[derive(Debug, Deserialize)]
struct IpVfEntry {
    vf: u32,
    #[serde(default, alias = "mac")]
    address: Option<String>,
    /// Newer iproute2 reports the VLAN as a list carrying the protocol.
    #[serde(default)]
    vlan_list: Vec<IpVlanEntry>,
    #[serde(default)]
    vlan: Option<u16>,
    #[serde(default)]
    qos: Option<u8>,
    #[serde(default)]
    rate: Option<IpVfRate>,
    /// Legacy single max rate.
    #[serde(default)]
    tx_rate: Option<u32>,
    #[serde(default)]
    spoofchk: Option<bool>,
    #[serde(default)]
    trust: Option<bool>,
    #[serde(default)]
    link_state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IpVlanEntry {
    #[serde(default)]
    vlan: u16,
    #[serde(default)]
    qos: u8,
    #[serde(default)]
    protocol: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IpVfRate {
    #[serde(default)]
    max_tx: u32,
    #[serde(default)]
    min_tx: u32,
}

impl IpVfEntry {
    fn into_vf_info(self) -> VfResult<VfInfo> {
        let (vlan, qos, proto) = match self.vlan_list.first() {
            Some(entry) => {
                let proto = match entry.protocol.as_deref() {
                    Some(p) => p
                        .parse::<VlanProto>()
                        .map_err(|_| VfError::parse("ip vfinfo", format!("VLAN protocol '{}'", p)))?,
                    None => VlanProto::Dot1Q,
                };
                (entry.vlan, entry.qos, proto)
            }
            None => (
                self.vlan.unwrap_or(0),
                self.qos.unwrap_or(0),
                VlanProto::Dot1Q,
            ),
        };

        let (min_tx_rate, max_tx_rate) = match (&self.rate, self.tx_rate) {
            (Some(rate), _) => (rate.min_tx, rate.max_tx),
            (None, Some(tx)) => (0, tx),
            (None, None) => (0, 0),
        };

        let link_state = match self.link_state.as_deref() {
            Some(s) => s
                .parse::<LinkState>()
                .map_err(|_| VfError::parse("ip vfinfo", format!("link state '{}'", s)))?,
            None => LinkState::Auto,
        };

        Ok(VfInfo {
            vf: self.vf,
            mac: self
                .address
                .map(|m| m.to_ascii_lowercase())
                .unwrap_or_else(|| ZERO_MAC.to_string()),
            vlan,
            qos,
            vlan_proto: proto.id(),
            min_tx_rate,
            max_tx_rate,
            spoofchk: self.spoofchk.unwrap_or(false),
            trust: self.trust.unwrap_or(false),
            link_state: link_state.into(),
        })
    }
}

fn parse_links(json: &str) -> VfResult<Vec<IpLinkEntry>> {
    serde_json::from_str(json).map_err(|e| VfError::parse("ip link output", e.to_string()))
}

/// Extracts VF `vf` of `pf` from `ip -j link show dev <pf>` output.
pub fn parse_vf_info(json: &str, pf: &str, vf: u32) -> VfResult<VfInfo> {
    let links = parse_links(json)?;
    let link = links
        .into_iter()
        .find(|l| l.ifname == pf)
        .ok_or_else(|| VfError::parse("ip link output", format!("no entry for {}", pf)))?;

    link.vfinfo_list
        .into_iter()
        .find(|entry| entry.vf == vf)
        .ok_or_else(|| VfError::parse("ip link output", format!("{} has no vf {}", pf, vf)))?
        .into_vf_info()
}

/// Extracts the hardware address from `ip -j link show dev <ifname>` output.
pub fn parse_link_address(json: &str, ifname: &str) -> VfResult<String> {
    parse_links(json)?
        .into_iter()
        .find(|l| l.ifname == ifname)
        .and_then(|l| l.address)
        .map(|a| a.to_ascii_lowercase())
        .ok_or_else(|| VfError::parse("ip link output", format!("no address for {}", ifname)))
}

/// Link control through the `ip` and `nsenter` tools.
#[derive(Debug, Clone, Default)]
pub struct IpLink {
    cmds: IpCommands,
}

impl IpLink {
    pub fn new(cmds: IpCommands) -> Self {
        Self { cmds }
    }
}

#[async_trait]
impl LinkControl for IpLink {
    async fn vf_info(&self, pf: &str, vf: u32) -> VfResult<VfInfo> {
        let out = shell::exec_checked(&self.cmds.show_vfs(pf)).await?;
        parse_vf_info(&out, pf, vf)
    }

    #[instrument(skip(self), fields(pf = %pf, vf = vf))]
    async fn set_vf(&self, pf: &str, vf: u32, attr: &VfAttr) -> VfResult<()> {
        shell::exec_checked(&self.cmds.set_vf(pf, vf, attr)).await?;
        info!("Set VF {} on {} vf {}", attr.kind(), pf, vf);
        Ok(())
    }

    async fn link_mac(&self, ifname: &str, netns: Option<&Netns>) -> VfResult<String> {
        let out = shell::exec_checked(&self.cmds.show_link(ifname, netns)).await?;
        parse_link_address(&out, ifname)
    }

    async fn link_exists(&self, ifname: &str, netns: Option<&Netns>) -> VfResult<bool> {
        Ok(shell::exec(&self.cmds.show_link(ifname, netns))
            .await?
            .success())
    }

    async fn set_link_mac(
        &self,
        ifname: &str,
        netns: Option<&Netns>,
        mac: &str,
    ) -> VfResult<()> {
        shell::exec_checked(&self.cmds.set_link_mac(ifname, netns, mac)).await?;
        Ok(())
    }

    async fn set_link_up(&self, ifname: &str, netns: Option<&Netns>, up: bool) -> VfResult<()> {
        shell::exec_checked(&self.cmds.set_link_state(ifname, netns, up)).await?;
        Ok(())
    }

    async fn rename_link(
        &self,
        ifname: &str,
        netns: Option<&Netns>,
        new_name: &str,
    ) -> VfResult<()> {
        shell::exec_checked(&self.cmds.rename_link(ifname, netns, new_name)).await?;
        Ok(())
    }

    async fn move_link(&self, ifname: &str, from: Option<&Netns>, to: &Netns) -> VfResult<()> {
        shell::exec_checked(&self.cmds.move_link(ifname, from, to)).await?;
        Ok(())
    }

    fn netns_exists(&self, netns: &Netns) -> bool {
        netns.path().exists()
    }
}
