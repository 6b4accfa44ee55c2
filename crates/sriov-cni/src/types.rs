//! Type definitions for VF state and attribute enumerations.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use sriov_cni_common::VfError;

/// Ethertype of 802.1Q VLAN tags.
pub const ETH_P_8021Q: u16 = 0x8100;

/// Ethertype of 802.1ad (QinQ) VLAN tags.
pub const ETH_P_8021AD: u16 = 0x88a8;

/// All-zero MAC reported for VFs without an administrative address.
pub const ZERO_MAC: &str = "00:00:00:00:00:00";

static MAC_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{2}(:[0-9a-fA-F]{2}){5}$").expect("Invalid MAC address regex")
});

/// Parses a 48-bit MAC address, returning its lowercase canonical form.
pub fn parse_mac(s: &str) -> Option<String> {
    let s = s.trim();
    MAC_REGEX.is_match(s).then(|| s.to_ascii_lowercase())
}

/// VLAN tag protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VlanProto {
    /// 802.1Q customer tag.
    #[default]
    #[serde(rename = "802.1q", alias = "802.1Q")]
    Dot1Q,
    /// 802.1ad service tag.
    #[serde(rename = "802.1ad")]
    Dot1AD,
}

impl VlanProto {
    /// Numeric protocol identifier (the tag ethertype).
    pub const fn id(self) -> u16 {
        match self {
            VlanProto::Dot1Q => ETH_P_8021Q,
            VlanProto::Dot1AD => ETH_P_8021AD,
        }
    }

    /// Looks up a protocol by its numeric identifier.
    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            ETH_P_8021Q => Some(VlanProto::Dot1Q),
            ETH_P_8021AD => Some(VlanProto::Dot1AD),
            _ => None,
        }
    }

    /// Configuration literal.
    pub fn as_str(&self) -> &'static str {
        match self {
            VlanProto::Dot1Q => "802.1q",
            VlanProto::Dot1AD => "802.1ad",
        }
    }
}

impl From<VlanProto> for u16 {
    fn from(proto: VlanProto) -> Self {
        proto.id()
    }
}

impl TryFrom<u16> for VlanProto {
    type Error = String;

    fn try_from(id: u16) -> Result<Self, Self::Error> {
        VlanProto::from_id(id).ok_or_else(|| format!("unknown VLAN protocol id {}", id))
    }
}

impl FromStr for VlanProto {
    type Err = VfError;

    /// Accepts `802.1q` and `802.1ad` in any ASCII case (`ip` prints `802.1Q`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("802.1q") {
            Ok(VlanProto::Dot1Q)
        } else if s.eq_ignore_ascii_case("802.1ad") {
            Ok(VlanProto::Dot1AD)
        } else {
            Err(VfError::config(
                "vlanProto",
                format!("unsupported VLAN protocol '{}' (expected 802.1q or 802.1ad)", s),
            ))
        }
    }
}

impl fmt::Display for VlanProto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// VF link state, encoded with the kernel `IFLA_VF_LINK_STATE_*` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    /// Follow the PF link.
    #[default]
    Auto = 0,
    /// Force link up.
    Enable = 1,
    /// Force link down.
    Disable = 2,
}

impl LinkState {
    /// Configuration literal, also understood by `ip link set ... vf N state`.
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::Auto => "auto",
            LinkState::Enable => "enable",
            LinkState::Disable => "disable",
        }
    }
}

impl From<LinkState> for u32 {
    fn from(state: LinkState) -> Self {
        state as u32
    }
}

impl TryFrom<u32> for LinkState {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(LinkState::Auto),
            1 => Ok(LinkState::Enable),
            2 => Ok(LinkState::Disable),
            other => Err(format!("unknown link state {}", other)),
        }
    }
}

impl FromStr for LinkState {
    type Err = VfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(LinkState::Auto),
            "enable" => Ok(LinkState::Enable),
            "disable" => Ok(LinkState::Disable),
            other => Err(VfError::config(
                "link_state",
                format!(
                    "unsupported link state '{}' (expected auto, enable or disable)",
                    other
                ),
            )),
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses an on/off toggle field.
pub fn parse_toggle(field: &str, value: &str) -> Result<bool, VfError> {
    match value {
        "on" => Ok(true),
        "off" => Ok(false),
        other => Err(VfError::config(
            field,
            format!("expected 'on' or 'off', got '{}'", other),
        )),
    }
}

/// Renders a boolean as an on/off toggle.
pub fn toggle_str(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

/// Configurable hardware attributes of one virtual function.
///
/// A `VfState` is a snapshot: it is captured whole and never patched in
/// place. The serialized key names are kept compatible with the attach
/// records written by earlier plugin releases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VfState {
    /// Name of the VF netdev in the host namespace (empty without a netdev).
    #[serde(rename = "HostIFName", default)]
    pub host_if_name: String,
    #[serde(rename = "SpoofChk")]
    pub spoof_chk: bool,
    #[serde(rename = "Trust")]
    pub trust: bool,
    /// MAC programmed in the PF's VF table.
    #[serde(rename = "AdminMAC")]
    pub admin_mac: String,
    /// MAC currently carried by the VF netdev.
    #[serde(rename = "EffectiveMAC", default)]
    pub effective_mac: String,
    #[serde(rename = "Vlan")]
    pub vlan: u16,
    #[serde(rename = "VlanQoS")]
    pub vlan_qos: u8,
    #[serde(rename = "VlanProto", with = "numeric_proto", default)]
    pub vlan_proto: VlanProto,
    /// Mbps, 0 = no limit.
    #[serde(rename = "MinTxRate")]
    pub min_tx_rate: u32,
    /// Mbps, 0 = no limit.
    #[serde(rename = "MaxTxRate")]
    pub max_tx_rate: u32,
    #[serde(rename = "LinkState", with = "numeric_link_state", default)]
    pub link_state: LinkState,
}

/// `VlanProto` as its numeric protocol id.
mod numeric_proto {
    use super::VlanProto;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(proto: &VlanProto, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u16(proto.id())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<VlanProto, D::Error> {
        let id = u16::deserialize(d)?;
        VlanProto::try_from(id).map_err(de::Error::custom)
    }
}

/// `LinkState` as its kernel value.
mod numeric_link_state {
    use super::LinkState;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(state: &LinkState, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u32(u32::from(*state))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<LinkState, D::Error> {
        let value = u32::deserialize(d)?;
        LinkState::try_from(value).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vlan_proto_mapping() {
        assert_eq!("802.1q".parse::<VlanProto>().unwrap().id(), 33024);
        assert_eq!("802.1ad".parse::<VlanProto>().unwrap().id(), 34984);
        assert_eq!("802.1Q".parse::<VlanProto>().unwrap(), VlanProto::Dot1Q);
        assert_eq!(VlanProto::from_id(34984), Some(VlanProto::Dot1AD));
        assert_eq!(VlanProto::from_id(0x0800), None);
    }

    #[test]
    fn test_vlan_proto_rejects_unknown() {
        let err = "802.1x".parse::<VlanProto>().unwrap_err();
        assert!(matches!(err, VfError::Config { ref field, .. } if field == "vlanProto"));
    }

    #[test]
    fn test_enum_literals_serde() {
        assert_eq!(
            serde_json::to_string(&VlanProto::Dot1AD).unwrap(),
            "\"802.1ad\""
        );
        assert_eq!(
            serde_json::from_str::<VlanProto>("\"802.1Q\"").unwrap(),
            VlanProto::Dot1Q
        );
        assert_eq!(
            serde_json::to_string(&LinkState::Disable).unwrap(),
            "\"disable\""
        );
    }

    #[test]
    fn test_link_state_from_str() {
        assert_eq!("auto".parse::<LinkState>().unwrap(), LinkState::Auto);
        assert_eq!("enable".parse::<LinkState>().unwrap(), LinkState::Enable);
        assert_eq!("disable".parse::<LinkState>().unwrap(), LinkState::Disable);
        assert!("enabled".parse::<LinkState>().is_err());
        assert_eq!(u32::from(LinkState::Disable), 2);
    }

    #[test]
    fn test_toggle() {
        assert!(parse_toggle("trust", "on").unwrap());
        assert!(!parse_toggle("trust", "off").unwrap());
        assert!(parse_toggle("trust", "yes").is_err());
        assert_eq!(toggle_str(false), "off");
    }

    #[test]
    fn test_parse_mac() {
        assert_eq!(
            parse_mac("AA:BB:cc:00:11:22").as_deref(),
            Some("aa:bb:cc:00:11:22")
        );
        assert_eq!(parse_mac("aa:bb:cc:00:11"), None);
        assert_eq!(parse_mac("aa-bb-cc-00-11-22"), None);
    }

    #[test]
    fn test_vf_state_wire_names() {
        let state = VfState {
            host_if_name: "enp3s0f0v1".to_string(),
            spoof_chk: true,
            trust: false,
            admin_mac: ZERO_MAC.to_string(),
            effective_mac: "52:54:00:12:34:56".to_string(),
            vlan: 10,
            vlan_qos: 0,
            vlan_proto: VlanProto::Dot1AD,
            min_tx_rate: 0,
            max_tx_rate: 100,
            link_state: LinkState::Enable,
        };

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["HostIFName"], "enp3s0f0v1");
        assert_eq!(json["VlanProto"], 34984);
        assert_eq!(json["LinkState"], 1);

        let back: VfState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }
}
