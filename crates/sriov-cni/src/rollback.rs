//! Returning a VF to a captured snapshot after a failed attach or on detach.

use tracing::{error, info, warn};

use sriov_cni_common::{VfError, VfResult};

use crate::configurator;
use crate::link::{LinkControl, Netns};
use crate::locator::VfDevice;
use crate::mover::{self, Placement};
use crate::types::VfState;

/// Brings the link back to the host namespace under its original name (if
/// it left or was renamed), then replays every attribute of `snapshot`.
///
/// Both steps run even if the first fails; all failures are folded into one
/// [`VfError::Restore`]. Calling it again on a restored VF changes nothing.
pub async fn rollback<L: LinkControl + ?Sized>(
    link: &L,
    device: &VfDevice,
    snapshot: &VfState,
    placement: &mut Placement,
    host_netns: &Netns,
    device_plane: bool,
) -> VfResult<()> {
    let mut failures = Vec::new();

    let displaced = placement.is_moved() || placement.name != snapshot.host_if_name;
    if !device_plane && displaced {
        let restore_mac = Some(snapshot.effective_mac.as_str()).filter(|m| !m.is_empty());
        if let Err(e) = mover::move_out(
            link,
            placement,
            host_netns,
            &snapshot.host_if_name,
            restore_mac,
        )
        .await
        {
            error!(ifname = %placement.name, "Failed to return link to host namespace: {}", e);
            failures.push(e.to_string());
        }
    }

    match configurator::restore(link, &device.pf_name, device.vf_index, snapshot).await {
        Ok(()) => {}
        Err(VfError::Restore { reason }) => failures.push(reason),
        Err(e) => failures.push(e.to_string()),
    }

    if failures.is_empty() {
        info!(pf = %device.pf_name, vf = device.vf_index, "Rolled back VF to its original state");
        Ok(())
    } else {
        warn!(
            pf = %device.pf_name,
            vf = device.vf_index,
            failures = failures.len(),
            "Rollback incomplete"
        );
        Err(VfError::restore(failures.join("; ")))
    }
}
