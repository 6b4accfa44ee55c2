//! Applying VF table attributes in a fixed order.
//!
//! Order: admin MAC, VLAN (id, QoS and protocol together), rate (min and
//! max together), spoof-check, trust, link state. The same order is used to
//! replay a snapshot.

use thiserror::Error;
use tracing::{debug, error, info, warn};

use sriov_cni_common::{VfError, VfResult};

use crate::config::VfConfig;
use crate::link::{LinkControl, VfAttr, VfAttrKind};
use crate::types::{VfState, VlanProto};

/// An attribute failed; everything in `applied` had already gone through.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct ApplyFailure {
    pub applied: Vec<VfAttrKind>,
    #[source]
    pub error: VfError,
}

/// Set-operations needed to reach `desired` from `current`.
///
/// Unset fields produce nothing. A rate with only one side set takes the
/// other side from `current`.
pub fn plan(desired: &VfConfig, current: &VfState) -> Vec<VfAttr> {
    let mut attrs = Vec::new();

    if let Some(mac) = &desired.mac {
        attrs.push(VfAttr::Mac(mac.clone()));
    }
    if let Some(vlan) = desired.vlan {
        attrs.push(VfAttr::Vlan {
            vlan,
            qos: desired.vlan_qos.unwrap_or(0),
            proto: desired.vlan_proto.unwrap_or(VlanProto::Dot1Q),
        });
    }
    if desired.min_tx_rate.is_some() || desired.max_tx_rate.is_some() {
        attrs.push(VfAttr::Rate {
            min: desired.min_tx_rate.unwrap_or(current.min_tx_rate),
            max: desired.max_tx_rate.unwrap_or(current.max_tx_rate),
        });
    }
    if let Some(on) = desired.spoof_chk {
        attrs.push(VfAttr::SpoofChk(on));
    }
    if let Some(on) = desired.trust {
        attrs.push(VfAttr::Trust(on));
    }
    if let Some(state) = desired.link_state {
        attrs.push(VfAttr::LinkState(state));
    }

    attrs
}

/// Every attribute of `state`, for replaying a snapshot.
pub fn restore_plan(state: &VfState) -> Vec<VfAttr> {
    vec![
        VfAttr::Mac(state.admin_mac.clone()),
        VfAttr::Vlan {
            vlan: state.vlan,
            qos: state.vlan_qos,
            proto: state.vlan_proto,
        },
        VfAttr::Rate {
            min: state.min_tx_rate,
            max: state.max_tx_rate,
        },
        VfAttr::SpoofChk(state.spoof_chk),
        VfAttr::Trust(state.trust),
        VfAttr::LinkState(state.link_state),
    ]
}

/// Applies `attrs` in order, stopping at the first failure.
pub async fn apply<L: LinkControl + ?Sized>(
    link: &L,
    pf: &str,
    vf: u32,
    attrs: &[VfAttr],
) -> Result<Vec<VfAttrKind>, ApplyFailure> {
    let mut applied = Vec::with_capacity(attrs.len());

    for attr in attrs {
        if let Err(e) = link.set_vf(pf, vf, attr).await {
            let error = VfError::link_config(attr.kind().as_str(), pf, vf, e);
            error!(attribute = %attr.kind(), pf = %pf, vf = vf, "VF configuration failed: {}", error);
            return Err(ApplyFailure { applied, error });
        }
        debug!(attribute = %attr.kind(), pf = %pf, vf = vf, "Applied VF attribute");
        applied.push(attr.kind());
    }

    Ok(applied)
}

/// Replays `state` onto the VF in snapshot order, skipping attributes the
/// live entry already holds. Every remaining attribute is attempted;
/// failures are collected into one restore error.
pub async fn restore<L: LinkControl + ?Sized>(
    link: &L,
    pf: &str,
    vf: u32,
    state: &VfState,
) -> VfResult<()> {
    let live = match link.vf_info(pf, vf).await {
        Ok(info) => Some(info),
        Err(e) => {
            warn!(pf = %pf, vf = vf, "Cannot read VF before restore, replaying everything: {}", e);
            None
        }
    };

    let mut failures = Vec::new();

    for attr in restore_plan(state) {
        if live.as_ref().is_some_and(|info| info.holds(&attr)) {
            debug!(attribute = %attr.kind(), pf = %pf, vf = vf, "VF attribute already restored");
            continue;
        }
        if let Err(e) = link.set_vf(pf, vf, &attr).await {
            let e = VfError::link_config(attr.kind().as_str(), pf, vf, e);
            error!(attribute = %attr.kind(), pf = %pf, vf = vf, "VF restore step failed: {}", e);
            failures.push(e.to_string());
        }
    }

    if failures.is_empty() {
        info!(pf = %pf, vf = vf, "Restored VF state");
        Ok(())
    } else {
        Err(VfError::restore(failures.join("; ")))
    }
}
