//! VfMgr implementation - the attach / detach / check orchestrator.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use sriov_cni_common::{Mismatch, VfError, VfResult};

use crate::checker;
use crate::config::VfConfig;
use crate::configurator;
use crate::link::{LinkControl, Netns};
use crate::locator::{DeviceLocator, VfDevice};
use crate::mover::{self, Placement};
use crate::rollback;
use crate::snapshot;
use crate::types::VfState;

/// Phases of an attach.
///
/// `Start → Validated → Snapshotted → Configuring → Moved → Done` on
/// success. A failure after the snapshot goes through `Failing` to
/// `RolledBack`; a failure before it ends in `Aborted` with nothing touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachPhase {
    Start,
    Validated,
    Snapshotted,
    Configuring,
    Moved,
    Done,
    Failing,
    RolledBack,
    Aborted,
}

impl AttachPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttachPhase::Start => "start",
            AttachPhase::Validated => "validated",
            AttachPhase::Snapshotted => "snapshotted",
            AttachPhase::Configuring => "configuring",
            AttachPhase::Moved => "moved",
            AttachPhase::Done => "done",
            AttachPhase::Failing => "failing",
            AttachPhase::RolledBack => "rolled-back",
            AttachPhase::Aborted => "aborted",
        }
    }
}

impl fmt::Display for AttachPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an attach hands back to the caller, and what detach needs to undo
/// it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachRecord {
    /// The resolved configuration, with the VF index filled in.
    pub config: VfConfig,
    /// VF state captured before the first mutation.
    pub orig_vf_state: VfState,
}

impl AttachRecord {
    /// Decodes a record handed back by the caller.
    pub fn from_value(value: &serde_json::Value) -> VfResult<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| VfError::restore(format!("invalid attach record: {}", e)))
    }
}

/// A completed attach.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub record: AttachRecord,
    /// Interface name reported to the runtime.
    pub ifname: String,
    /// MAC address of the interface.
    pub mac: String,
    /// Whether the netdev was left alone.
    pub device_plane: bool,
}

/// A failed attach.
#[derive(Debug, Error)]
#[error("attach {phase}: {cause}")]
pub struct AttachError {
    /// `RolledBack` or `Aborted`.
    pub phase: AttachPhase,
    #[source]
    pub cause: VfError,
    /// Rollback failure, if the rollback itself did not complete.
    pub secondary: Option<VfError>,
}

impl AttachError {
    fn aborted(cause: VfError) -> Self {
        Self {
            phase: AttachPhase::Aborted,
            cause,
            secondary: None,
        }
    }
}

/// SR-IOV VF manager.
///
/// Drives one VF through attach, detach or check using the link and device
/// capabilities it is given.
pub struct VfMgr<L, D> {
    link: L,
    locator: D,
    /// Namespace the plugin returns links to.
    host_netns: Netns,
}

impl<L: LinkControl, D: DeviceLocator> VfMgr<L, D> {
    pub fn new(link: L, locator: D, host_netns: Netns) -> Self {
        Self {
            link,
            locator,
            host_netns,
        }
    }

    fn resolve(&self, config: &VfConfig) -> VfResult<(VfDevice, bool)> {
        let device = self.locator.resolve(&config.device_id)?;
        if let Some(index) = config.vf_index {
            if index != device.vf_index {
                return Err(VfError::device_resolution(
                    &config.device_id,
                    format!(
                        "VF index changed since attach (recorded {}, found {})",
                        index, device.vf_index
                    ),
                ));
            }
        }
        let device_plane = config.dpdk_mode || device.is_userspace_bound();
        if device_plane {
            debug!(driver = ?device.driver, "VF in device-plane mode");
        }
        Ok((device, device_plane))
    }

    /// Configures the VF and moves it into `netns` as `ifname`.
    ///
    /// On any failure after the snapshot the VF is rolled back before the
    /// error is returned.
    #[instrument(skip(self, config), fields(device = %config.device_id, netns = %netns, ifname = %ifname))]
    pub async fn attach(
        &self,
        mut config: VfConfig,
        netns: &Netns,
        ifname: &str,
    ) -> Result<Attachment, AttachError> {
        let mut phase = AttachPhase::Start;
        debug!(phase = %phase, "Attach starting");

        let (device, device_plane) = self.resolve(&config).map_err(AttachError::aborted)?;
        let host_name = match (&device.host_if_name, device_plane) {
            (Some(name), _) => name.clone(),
            (None, true) => String::new(),
            (None, false) => {
                return Err(AttachError::aborted(VfError::device_resolution(
                    &config.device_id,
                    "VF has no network interface in the host namespace",
                )))
            }
        };
        config.vf_index = Some(device.vf_index);
        transition(&mut phase, AttachPhase::Validated);

        let mut placement = Placement::host(host_name.clone());
        let orig = snapshot::capture(&self.link, &device, &placement, &host_name, device_plane)
            .await
            .map_err(|e| {
                transition(&mut phase, AttachPhase::Aborted);
                AttachError::aborted(e)
            })?;
        transition(&mut phase, AttachPhase::Snapshotted);

        transition(&mut phase, AttachPhase::Configuring);
        let attrs = configurator::plan(&config, &orig);
        if let Err(failure) =
            configurator::apply(&self.link, &device.pf_name, device.vf_index, &attrs).await
        {
            debug!(applied = ?failure.applied, "Configuration interrupted");
            return Err(self
                .fail(&mut phase, failure.error, &device, &orig, &mut placement, device_plane)
                .await);
        }

        if !device_plane {
            if let Err(e) = mover::move_into(
                &self.link,
                &mut placement,
                netns,
                ifname,
                config.mac.as_deref(),
            )
            .await
            {
                return Err(self
                    .fail(&mut phase, e, &device, &orig, &mut placement, device_plane)
                    .await);
            }
        }
        transition(&mut phase, AttachPhase::Moved);

        let mac = config
            .mac
            .clone()
            .or_else(|| Some(orig.effective_mac.clone()).filter(|m| !m.is_empty()))
            .unwrap_or_else(|| orig.admin_mac.clone());
        transition(&mut phase, AttachPhase::Done);
        info!(pf = %device.pf_name, vf = device.vf_index, "VF attached");

        Ok(Attachment {
            record: AttachRecord {
                config,
                orig_vf_state: orig,
            },
            ifname: ifname.to_string(),
            mac,
            device_plane,
        })
    }

    async fn fail(
        &self,
        phase: &mut AttachPhase,
        cause: VfError,
        device: &VfDevice,
        orig: &VfState,
        placement: &mut Placement,
        device_plane: bool,
    ) -> AttachError {
        error!(phase = %phase, "Attach failed: {}", cause);
        transition(phase, AttachPhase::Failing);

        let secondary = rollback::rollback(
            &self.link,
            device,
            orig,
            placement,
            &self.host_netns,
            device_plane,
        )
        .await
        .err();
        if let Some(e) = &secondary {
            error!("Rollback failed: {}", e);
        }
        transition(phase, AttachPhase::RolledBack);

        AttachError {
            phase: *phase,
            cause,
            secondary,
        }
    }

    /// Returns the VF to the host namespace and replays the snapshot in
    /// `record`.
    ///
    /// A container namespace that no longer exists is tolerated: the kernel
    /// has already moved the link back, so only the replay runs.
    #[instrument(skip(self, record), fields(device = %record.config.device_id, ifname = %ifname))]
    pub async fn detach(
        &self,
        record: &AttachRecord,
        netns: Option<&Netns>,
        ifname: &str,
    ) -> VfResult<()> {
        let (device, device_plane) = self.resolve(&record.config)?;
        let orig = &record.orig_vf_state;

        let mut placement = if device_plane {
            Placement::host(orig.host_if_name.clone())
        } else {
            self.locate_for_detach(netns, ifname, orig).await?
        };

        rollback::rollback(
            &self.link,
            &device,
            orig,
            &mut placement,
            &self.host_netns,
            device_plane,
        )
        .await?;

        info!(pf = %device.pf_name, vf = device.vf_index, "VF detached");
        Ok(())
    }

    async fn locate_for_detach(
        &self,
        netns: Option<&Netns>,
        ifname: &str,
        orig: &VfState,
    ) -> VfResult<Placement> {
        if let Some(ns) = netns {
            if self.link.netns_exists(ns) {
                if self.link.link_exists(ifname, Some(ns)).await? {
                    return Ok(Placement::in_netns(ns.clone(), ifname));
                }
                warn!(netns = %ns, ifname = %ifname, "Interface not found in container namespace");
            } else {
                warn!(netns = %ns, "Container namespace is gone, skipping link move");
            }
        }

        // The link may have come back under its container name.
        if orig.host_if_name != ifname && self.link.link_exists(ifname, None).await? {
            return Ok(Placement::host(ifname));
        }
        Ok(Placement::host(orig.host_if_name.clone()))
    }

    /// Verifies that the live VF matches every field set in `config`.
    #[instrument(skip(self, config), fields(device = %config.device_id, netns = %netns, ifname = %ifname))]
    pub async fn check(&self, config: &VfConfig, netns: &Netns, ifname: &str) -> VfResult<()> {
        let (device, device_plane) = self.resolve(config)?;

        let placement = if device_plane {
            Placement::host(device.host_if_name.clone().unwrap_or_default())
        } else {
            if !self.link.netns_exists(netns) || !self.link.link_exists(ifname, Some(netns)).await? {
                return Err(VfError::CheckMismatch {
                    mismatches: vec![Mismatch::new(
                        "interface",
                        format!("{} in {}", ifname, netns),
                        "absent",
                    )],
                });
            }
            Placement::in_netns(netns.clone(), ifname)
        };

        let live = snapshot::capture(
            &self.link,
            &device,
            &placement,
            &placement.name,
            device_plane,
        )
        .await?;
        checker::check(config, &live)?;

        info!(pf = %device.pf_name, vf = device.vf_index, "VF state matches configuration");
        Ok(())
    }
}

fn transition(phase: &mut AttachPhase, next: AttachPhase) {
    info!(from = %phase, to = %next, "Attach phase");
    *phase = next;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_names() {
        assert_eq!(AttachPhase::RolledBack.to_string(), "rolled-back");
        assert_eq!(AttachPhase::Aborted.as_str(), "aborted");
    }

    #[test]
    fn test_attach_record_keys() {
        let record = AttachRecord {
            config: VfConfig {
                device_id: "0000:03:02.1".to_string(),
                vf_index: Some(1),
                vlan: Some(10),
                ..Default::default()
            },
            orig_vf_state: VfState::default(),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("config").is_some());
        assert_eq!(value["config"]["deviceId"], "0000:03:02.1");
        assert_eq!(value["origVfState"]["Vlan"], 0);
        assert_eq!(AttachRecord::from_value(&value).unwrap(), record);
    }

    #[test]
    fn test_bad_attach_record_is_restore_error() {
        let err = AttachRecord::from_value(&serde_json::json!({"config": 1})).unwrap_err();
        assert!(matches!(err, VfError::Restore { .. }));
    }
}
