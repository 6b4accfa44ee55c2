//! Capturing the current state of a VF.

use tracing::debug;

use sriov_cni_common::{VfError, VfResult};

use crate::link::LinkControl;
use crate::locator::VfDevice;
use crate::mover::Placement;
use crate::types::VfState;

/// Reads the VF table entry of `device` and, unless `device_plane` is set,
/// the effective MAC of its netdev at `placement`.
///
/// Pure read. The returned state names the netdev by `host_name`, the name
/// it has (or had) in the host namespace.
pub async fn capture<L: LinkControl + ?Sized>(
    link: &L,
    device: &VfDevice,
    placement: &Placement,
    host_name: &str,
    device_plane: bool,
) -> VfResult<VfState> {
    let wrap = |e: VfError| VfError::snapshot(device.pf_name.clone(), device.vf_index, e);

    let info = link
        .vf_info(&device.pf_name, device.vf_index)
        .await
        .map_err(wrap)?;

    let effective_mac = if device_plane {
        String::new()
    } else {
        link.link_mac(&placement.name, placement.netns.as_ref())
            .await
            .map_err(wrap)?
    };

    let state = info.to_state(host_name, &effective_mac).map_err(wrap)?;
    debug!(pf = %device.pf_name, vf = device.vf_index, ?state, "Captured VF state");
    Ok(state)
}
