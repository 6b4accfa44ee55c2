//! Link control interface.
//!
//! [`LinkControl`] is the capability the core uses for every read and write
//! of link state: VF table entries on the PF, and the VF netdev itself
//! (address, admin state, name, namespace). [`VfInfo`] is the flat form of a
//! VF table entry as the link layer reports it; [`VfInfo::to_state`] and
//! [`VfInfo::from_state`] map it to and from [`VfState`].

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};

use sriov_cni_common::{VfError, VfResult};

use crate::types::{LinkState, VlanProto, VfState, ZERO_MAC};

/// A network namespace, identified by a bind-mount or `/proc` path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Netns(PathBuf);

impl Netns {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for Netns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// VF attributes, in the order they are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VfAttrKind {
    Mac,
    Vlan,
    Rate,
    SpoofChk,
    Trust,
    LinkState,
}

impl VfAttrKind {
    /// Application order. Link state goes last since it can cut connectivity.
    pub const ORDER: [VfAttrKind; 6] = [
        VfAttrKind::Mac,
        VfAttrKind::Vlan,
        VfAttrKind::Rate,
        VfAttrKind::SpoofChk,
        VfAttrKind::Trust,
        VfAttrKind::LinkState,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VfAttrKind::Mac => "mac",
            VfAttrKind::Vlan => "vlan",
            VfAttrKind::Rate => "rate",
            VfAttrKind::SpoofChk => "spoofchk",
            VfAttrKind::Trust => "trust",
            VfAttrKind::LinkState => "link_state",
        }
    }
}

impl fmt::Display for VfAttrKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One set-operation on a VF table entry.
///
/// VLAN id, QoS and protocol travel together, as do both rate limits:
/// devices reject them when set piecemeal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VfAttr {
    Mac(String),
    Vlan { vlan: u16, qos: u8, proto: VlanProto },
    Rate { min: u32, max: u32 },
    SpoofChk(bool),
    Trust(bool),
    LinkState(LinkState),
}

impl VfAttr {
    pub fn kind(&self) -> VfAttrKind {
        match self {
            VfAttr::Mac(_) => VfAttrKind::Mac,
            VfAttr::Vlan { .. } => VfAttrKind::Vlan,
            VfAttr::Rate { .. } => VfAttrKind::Rate,
            VfAttr::SpoofChk(_) => VfAttrKind::SpoofChk,
            VfAttr::Trust(_) => VfAttrKind::Trust,
            VfAttr::LinkState(_) => VfAttrKind::LinkState,
        }
    }
}

/// A VF table entry as reported by the link layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VfInfo {
    pub vf: u32,
    pub mac: String,
    pub vlan: u16,
    pub qos: u8,
    /// Tag ethertype.
    pub vlan_proto: u16,
    pub min_tx_rate: u32,
    pub max_tx_rate: u32,
    pub spoofchk: bool,
    pub trust: bool,
    /// `IFLA_VF_LINK_STATE_*` value.
    pub link_state: u32,
}

impl VfInfo {
    /// A freshly created VF: no MAC, no VLAN, no limits, spoof-check on.
    pub fn new(vf: u32) -> Self {
        Self {
            vf,
            mac: ZERO_MAC.to_string(),
            vlan: 0,
            qos: 0,
            vlan_proto: VlanProto::Dot1Q.id(),
            min_tx_rate: 0,
            max_tx_rate: 0,
            spoofchk: true,
            trust: false,
            link_state: LinkState::Auto.into(),
        }
    }

    /// Maps the entry to a [`VfState`], adding what only the netdev knows.
    pub fn to_state(&self, host_if_name: &str, effective_mac: &str) -> VfResult<VfState> {
        let vlan_proto = VlanProto::from_id(self.vlan_proto).ok_or_else(|| {
            VfError::parse(
                "VF info",
                format!("unknown VLAN protocol 0x{:04x}", self.vlan_proto),
            )
        })?;
        let link_state = LinkState::try_from(self.link_state)
            .map_err(|reason| VfError::parse("VF info", reason))?;

        Ok(VfState {
            host_if_name: host_if_name.to_string(),
            spoof_chk: self.spoofchk,
            trust: self.trust,
            admin_mac: self.mac.clone(),
            effective_mac: effective_mac.to_string(),
            vlan: self.vlan,
            vlan_qos: self.qos,
            vlan_proto,
            min_tx_rate: self.min_tx_rate,
            max_tx_rate: self.max_tx_rate,
            link_state,
        })
    }

    /// Maps a [`VfState`] back to the VF table entry it describes.
    pub fn from_state(vf: u32, state: &VfState) -> Self {
        Self {
            vf,
            mac: state.admin_mac.clone(),
            vlan: state.vlan,
            qos: state.vlan_qos,
            vlan_proto: state.vlan_proto.id(),
            min_tx_rate: state.min_tx_rate,
            max_tx_rate: state.max_tx_rate,
            spoofchk: state.spoof_chk,
            trust: state.trust,
            link_state: state.link_state.into(),
        }
    }

    /// Applies a set-operation the way the kernel records it.
    pub fn apply(&mut self, attr: &VfAttr) {
        match attr {
            VfAttr::Mac(mac) => self.mac = mac.clone(),
            VfAttr::Vlan { vlan, qos, proto } => {
                self.vlan = *vlan;
                self.qos = *qos;
                self.vlan_proto = proto.id();
            }
            VfAttr::Rate { min, max } => {
                self.min_tx_rate = *min;
                self.max_tx_rate = *max;
            }
            VfAttr::SpoofChk(on) => self.spoofchk = *on,
            VfAttr::Trust(on) => self.trust = *on,
            VfAttr::LinkState(state) => self.link_state = (*state).into(),
        }
    }

    /// True if the entry already carries the value `attr` would set.
    pub fn holds(&self, attr: &VfAttr) -> bool {
        match attr {
            VfAttr::Mac(mac) => self.mac.eq_ignore_ascii_case(mac),
            VfAttr::Vlan { vlan, qos, proto } => {
                self.vlan == *vlan && self.qos == *qos && self.vlan_proto == proto.id()
            }
            VfAttr::Rate { min, max } => self.min_tx_rate == *min && self.max_tx_rate == *max,
            VfAttr::SpoofChk(on) => self.spoofchk == *on,
            VfAttr::Trust(on) => self.trust == *on,
            VfAttr::LinkState(state) => self.link_state == u32::from(*state),
        }
    }
}

/// Link-layer operations used by the plugin.
///
/// A `netns` of `None` means the namespace the plugin runs in (the host).
#[async_trait]
pub trait LinkControl: Send + Sync {
    /// Reads entry `vf` of the VF table of `pf`.
    async fn vf_info(&self, pf: &str, vf: u32) -> VfResult<VfInfo>;

    /// Applies one attribute to entry `vf` of the VF table of `pf`.
    async fn set_vf(&self, pf: &str, vf: u32, attr: &VfAttr) -> VfResult<()>;

    /// Hardware address of a netdev.
    async fn link_mac(&self, ifname: &str, netns: Option<&Netns>) -> VfResult<String>;

    /// Whether a netdev with this name exists.
    async fn link_exists(&self, ifname: &str, netns: Option<&Netns>) -> VfResult<bool>;

    async fn set_link_mac(&self, ifname: &str, netns: Option<&Netns>, mac: &str)
        -> VfResult<()>;

    async fn set_link_up(&self, ifname: &str, netns: Option<&Netns>, up: bool) -> VfResult<()>;

    async fn rename_link(
        &self,
        ifname: &str,
        netns: Option<&Netns>,
        new_name: &str,
    ) -> VfResult<()>;

    /// Moves a netdev from `from` into `to`.
    async fn move_link(&self, ifname: &str, from: Option<&Netns>, to: &Netns) -> VfResult<()>;

    /// Whether a namespace handle is still usable.
    fn netns_exists(&self, netns: &Netns) -> bool;
}
