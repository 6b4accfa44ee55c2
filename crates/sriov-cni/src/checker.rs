//! Comparing a requested configuration with the live VF state.

use sriov_cni_common::{Mismatch, VfError, VfResult};

use crate::config::VfConfig;
use crate::types::{toggle_str, VfState};

/// Every explicitly requested field whose live value differs, in
/// configuration order. Unset fields are not compared.
pub fn compare(desired: &VfConfig, live: &VfState) -> Vec<Mismatch> {
    let mut mismatches = Vec::new();

    let mut field = |name: &str, expected: Option<String>, observed: String| {
        if let Some(expected) = expected {
            if expected != observed {
                mismatches.push(Mismatch::new(name, expected, observed));
            }
        }
    };

    field("mac", desired.mac.clone(), live.admin_mac.clone());
    field(
        "vlan",
        desired.vlan.map(|v| v.to_string()),
        live.vlan.to_string(),
    );
    field(
        "vlanQoS",
        desired.vlan_qos.map(|q| q.to_string()),
        live.vlan_qos.to_string(),
    );
    field(
        "vlanProto",
        desired.vlan_proto.map(|p| p.to_string()),
        live.vlan_proto.to_string(),
    );
    field(
        "min_tx_rate",
        desired.min_tx_rate.map(|r| r.to_string()),
        live.min_tx_rate.to_string(),
    );
    field(
        "max_tx_rate",
        desired.max_tx_rate.map(|r| r.to_string()),
        live.max_tx_rate.to_string(),
    );
    field(
        "spoofchk",
        desired.spoof_chk.map(|on| toggle_str(on).to_string()),
        toggle_str(live.spoof_chk).to_string(),
    );
    field(
        "trust",
        desired.trust.map(|on| toggle_str(on).to_string()),
        toggle_str(live.trust).to_string(),
    );
    field(
        "link_state",
        desired.link_state.map(|s| s.to_string()),
        live.link_state.to_string(),
    );

    mismatches
}

/// Fails with [`VfError::CheckMismatch`] when any requested field differs.
pub fn check(desired: &VfConfig, live: &VfState) -> VfResult<()> {
    let mismatches = compare(desired, live);
    if mismatches.is_empty() {
        Ok(())
    } else {
        Err(VfError::CheckMismatch { mismatches })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LinkState, VlanProto};
    use pretty_assertions::assert_eq;

    fn live() -> VfState {
        VfState {
            host_if_name: "enp3s0f0v1".to_string(),
            admin_mac: "02:00:00:00:00:01".to_string(),
            vlan: 200,
            spoof_chk: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_vlan_mismatch() {
        let desired = VfConfig {
            vlan: Some(100),
            ..Default::default()
        };
        assert_eq!(
            compare(&desired, &live()),
            vec![Mismatch::new("vlan", 100, 200)]
        );
        let err = check(&desired, &live()).unwrap_err();
        assert_eq!(err.to_string(), "VF state does not match configuration: vlan: expected 100, observed 200");
    }

    #[test]
    fn test_unset_fields_not_compared() {
        assert!(check(&VfConfig::default(), &live()).is_ok());
    }

    #[test]
    fn test_all_mismatches_collected() {
        let desired = VfConfig {
            vlan: Some(200),
            vlan_proto: Some(VlanProto::Dot1AD),
            spoof_chk: Some(false),
            link_state: Some(LinkState::Disable),
            ..Default::default()
        };
        let fields: Vec<String> = compare(&desired, &live())
            .into_iter()
            .map(|m| m.field)
            .collect();
        assert_eq!(fields, vec!["vlanProto", "spoofchk", "link_state"]);
    }

    #[test]
    fn test_matching_config() {
        let desired = VfConfig {
            mac: Some("02:00:00:00:00:01".to_string()),
            vlan: Some(200),
            spoof_chk: Some(true),
            ..Default::default()
        };
        assert!(check(&desired, &live()).is_ok());
    }
}
