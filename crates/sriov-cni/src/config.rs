//! Configuration request parsing and validation.
//!
//! [`NetConf`] is the request exactly as the runtime hands it over on stdin.
//! [`NetConf::resolve`] validates it and produces a [`VfConfig`], in which
//! every VF attribute is an `Option`: `None` leaves the device value alone,
//! `Some(0)` / `Some(false)` explicitly sets it. Nothing here touches the
//! device.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use sriov_cni_common::{VfError, VfResult};

use crate::locator::is_valid_pci_address;
use crate::types::{parse_mac, parse_toggle, LinkState, VlanProto};

/// Highest usable VLAN id.
pub const MAX_VLAN_ID: i64 = 4094;

/// Highest 802.1p priority.
pub const MAX_VLAN_QOS: i64 = 7;

/// Request fields overridden by the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
}

/// Raw configuration request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetConf {
    #[serde(rename = "cniVersion", default)]
    pub cni_version: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub plugin_type: String,

    /// PCI address of the VF.
    #[serde(rename = "deviceID", default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub vlan: Option<i64>,
    #[serde(rename = "vlanQoS", default)]
    pub vlan_qos: Option<i64>,
    /// `802.1q` or `802.1ad`.
    #[serde(rename = "vlanProto", default)]
    pub vlan_proto: Option<String>,
    /// Mbps, 0 disables the limit.
    #[serde(default)]
    pub min_tx_rate: Option<i64>,
    /// Mbps, 0 disables the limit.
    #[serde(default)]
    pub max_tx_rate: Option<i64>,
    /// `on` / `off`.
    #[serde(default)]
    pub spoofchk: Option<String>,
    /// `on` / `off`.
    #[serde(default)]
    pub trust: Option<String>,
    /// `auto` / `enable` / `disable`.
    #[serde(default)]
    pub link_state: Option<String>,
    #[serde(default, alias = "MAC")]
    pub mac: Option<String>,
    #[serde(rename = "runtimeConfig", default)]
    pub runtime_config: RuntimeConfig,
    /// Userspace-driver mode. Also forced when the VF is bound to one.
    #[serde(rename = "dpdkMode", default)]
    pub dpdk_mode: bool,

    #[serde(rename = "logLevel", default)]
    pub log_level: Option<String>,
    #[serde(rename = "logFile", default)]
    pub log_file: Option<String>,

    #[serde(rename = "attachRecord", default, skip_serializing_if = "Option::is_none")]
    pub attach_record: Option<Value>,
    #[serde(rename = "prevResult", default, skip_serializing_if = "Option::is_none")]
    pub prev_result: Option<Value>,
}

/// Validated VF configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VfConfig {
    /// PCI address of the VF.
    pub device_id: String,
    /// Filled in once the device has been resolved.
    #[serde(default)]
    pub vf_index: Option<u32>,
    /// Administrative MAC (runtime override already applied).
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub vlan: Option<u16>,
    #[serde(default)]
    pub vlan_qos: Option<u8>,
    #[serde(default)]
    pub vlan_proto: Option<VlanProto>,
    #[serde(default)]
    pub min_tx_rate: Option<u32>,
    #[serde(default)]
    pub max_tx_rate: Option<u32>,
    #[serde(default)]
    pub spoof_chk: Option<bool>,
    #[serde(default)]
    pub trust: Option<bool>,
    #[serde(default)]
    pub link_state: Option<LinkState>,
    #[serde(default)]
    pub dpdk_mode: bool,
}

impl VfConfig {
    /// True when no VF attribute is requested.
    pub fn is_empty(&self) -> bool {
        self.mac.is_none()
            && self.vlan.is_none()
            && self.vlan_qos.is_none()
            && self.vlan_proto.is_none()
            && self.min_tx_rate.is_none()
            && self.max_tx_rate.is_none()
            && self.spoof_chk.is_none()
            && self.trust.is_none()
            && self.link_state.is_none()
    }
}

impl NetConf {
    /// Decodes a request from its JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> VfResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| VfError::decode("network configuration", e))
    }

    /// The attach record handed back by the caller, either at the top level
    /// or inside `prevResult`.
    pub fn attach_record_value(&self) -> Option<&Value> {
        self.attach_record.as_ref().or_else(|| {
            self.prev_result
                .as_ref()
                .and_then(|prev| prev.get("attachRecord"))
        })
    }

    /// Validates the request and normalizes it into a [`VfConfig`].
    pub fn resolve(&self) -> VfResult<VfConfig> {
        let device_id = non_empty(&self.device_id)
            .ok_or_else(|| VfError::config("deviceID", "VF PCI address is required"))?;
        if !is_valid_pci_address(device_id) {
            return Err(VfError::config(
                "deviceID",
                format!("'{}' is not a PCI address (expected: 0000:03:02.1)", device_id),
            ));
        }

        let vlan = self
            .vlan
            .map(|v| bounded("vlan", v, 0, MAX_VLAN_ID))
            .transpose()?
            .map(|v| v as u16);
        let vlan_qos = self
            .vlan_qos
            .map(|q| bounded("vlanQoS", q, 0, MAX_VLAN_QOS))
            .transpose()?
            .map(|q| q as u8);
        let mut vlan_proto = non_empty(&self.vlan_proto)
            .map(str::parse::<VlanProto>)
            .transpose()?;

        match vlan {
            None => {
                if vlan_qos.is_some() {
                    return Err(VfError::config("vlanQoS", "requires vlan to be set"));
                }
                if vlan_proto.is_some() {
                    return Err(VfError::config("vlanProto", "requires vlan to be set"));
                }
            }
            Some(0) => {
                if vlan_qos.is_some_and(|q| q != 0) {
                    return Err(VfError::config("vlanQoS", "non-zero QoS requires a non-zero vlan"));
                }
                if vlan_proto.is_some_and(|p| p != VlanProto::Dot1Q) {
                    return Err(VfError::config(
                        "vlanProto",
                        "802.1ad requires a non-zero vlan",
                    ));
                }
                vlan_proto.get_or_insert(VlanProto::Dot1Q);
            }
            Some(_) => {
                vlan_proto.get_or_insert(VlanProto::Dot1Q);
            }
        }

        let min_tx_rate = self
            .min_tx_rate
            .map(|r| bounded("min_tx_rate", r, 0, u32::MAX as i64))
            .transpose()?
            .map(|r| r as u32);
        let max_tx_rate = self
            .max_tx_rate
            .map(|r| bounded("max_tx_rate", r, 0, u32::MAX as i64))
            .transpose()?
            .map(|r| r as u32);
        if let (Some(min), Some(max)) = (min_tx_rate, max_tx_rate) {
            if min != 0 && max != 0 && min > max {
                return Err(VfError::config(
                    "min_tx_rate",
                    format!("min_tx_rate {} exceeds max_tx_rate {}", min, max),
                ));
            }
        }

        let spoof_chk = non_empty(&self.spoofchk)
            .map(|v| parse_toggle("spoofchk", v))
            .transpose()?;
        let trust = non_empty(&self.trust)
            .map(|v| parse_toggle("trust", v))
            .transpose()?;
        let link_state = non_empty(&self.link_state)
            .map(str::parse::<LinkState>)
            .transpose()?;

        let mac = match (non_empty(&self.runtime_config.mac), non_empty(&self.mac)) {
            (Some(runtime), _) => Some(("runtimeConfig.mac", runtime)),
            (None, Some(mac)) => Some(("mac", mac)),
            (None, None) => None,
        }
        .map(|(field, value)| {
            parse_mac(value).ok_or_else(|| {
                VfError::config(field, format!("'{}' is not a valid MAC address", value))
            })
        })
        .transpose()?;

        let config = VfConfig {
            device_id: device_id.to_string(),
            vf_index: None,
            mac,
            vlan,
            vlan_qos,
            vlan_proto,
            min_tx_rate,
            max_tx_rate,
            spoof_chk,
            trust,
            link_state,
            dpdk_mode: self.dpdk_mode,
        };
        debug!(?config, "Resolved VF configuration");
        Ok(config)
    }
}

/// Empty strings count as unset, like omitted keys.
fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn bounded(field: &str, value: i64, min: i64, max: i64) -> VfResult<i64> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(VfError::config(
            field,
            format!("{} is out of range [{}, {}]", value, min, max),
        ))
    }
}
