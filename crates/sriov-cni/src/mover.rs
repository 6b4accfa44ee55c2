//! Moving the VF netdev between the host and a container namespace.
//!
//! Every step updates the caller's [`Placement`], so after a failure it
//! describes exactly where the link is and what it is called. Rollback
//! relies on that to bring a half-moved link back.

use tracing::{debug, info};

use sriov_cni_common::{VfError, VfResult};

use crate::link::{LinkControl, Netns};

/// Where the VF netdev currently lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    /// `None` while the link is in the host namespace.
    pub netns: Option<Netns>,
    /// Current interface name.
    pub name: String,
}

impl Placement {
    pub fn host(name: impl Into<String>) -> Self {
        Self {
            netns: None,
            name: name.into(),
        }
    }

    pub fn in_netns(netns: Netns, name: impl Into<String>) -> Self {
        Self {
            netns: Some(netns),
            name: name.into(),
        }
    }

    /// True once the link has left the host namespace.
    pub fn is_moved(&self) -> bool {
        self.netns.is_some()
    }
}

/// Moves the link into `target`, renames it to `new_name`, optionally sets
/// its effective MAC and brings it up.
pub async fn move_into<L: LinkControl + ?Sized>(
    link: &L,
    placement: &mut Placement,
    target: &Netns,
    new_name: &str,
    mac: Option<&str>,
) -> VfResult<()> {
    let err = |placement: &Placement, e: VfError| {
        VfError::namespace_move(placement.name.clone(), e)
    };

    link.set_link_up(&placement.name, placement.netns.as_ref(), false)
        .await
        .map_err(|e| err(placement, e))?;

    link.move_link(&placement.name, placement.netns.as_ref(), target)
        .await
        .map_err(|e| err(placement, e))?;
    placement.netns = Some(target.clone());
    debug!(ifname = %placement.name, netns = %target, "Moved link");

    if placement.name != new_name {
        link.rename_link(&placement.name, placement.netns.as_ref(), new_name)
            .await
            .map_err(|e| err(placement, e))?;
        placement.name = new_name.to_string();
    }

    if let Some(mac) = mac {
        link.set_link_mac(&placement.name, placement.netns.as_ref(), mac)
            .await
            .map_err(|e| err(placement, e))?;
    }

    link.set_link_up(&placement.name, placement.netns.as_ref(), true)
        .await
        .map_err(|e| err(placement, e))?;

    info!(ifname = %placement.name, netns = %target, "Link attached to namespace");
    Ok(())
}

/// Brings the link back to the host namespace as `restored_name`,
/// optionally restoring its effective MAC first.
pub async fn move_out<L: LinkControl + ?Sized>(
    link: &L,
    placement: &mut Placement,
    host: &Netns,
    restored_name: &str,
    restore_mac: Option<&str>,
) -> VfResult<()> {
    let err = |placement: &Placement, e: VfError| {
        VfError::namespace_move(placement.name.clone(), e)
    };

    link.set_link_up(&placement.name, placement.netns.as_ref(), false)
        .await
        .map_err(|e| err(placement, e))?;

    if placement.name != restored_name {
        link.rename_link(&placement.name, placement.netns.as_ref(), restored_name)
            .await
            .map_err(|e| err(placement, e))?;
        placement.name = restored_name.to_string();
    }

    if let Some(mac) = restore_mac {
        link.set_link_mac(&placement.name, placement.netns.as_ref(), mac)
            .await
            .map_err(|e| err(placement, e))?;
    }

    if placement.is_moved() {
        link.move_link(&placement.name, placement.netns.as_ref(), host)
            .await
            .map_err(|e| err(placement, e))?;
        placement.netns = None;
    }

    info!(ifname = %placement.name, "Link returned to host namespace");
    Ok(())
}
