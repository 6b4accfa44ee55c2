//! CNI invocation framing.
//!
//! The runtime passes the command and container details in `CNI_*`
//! environment variables, the network configuration on stdin, and reads a
//! JSON result (or error) from stdout.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use sriov_cni_common::{VfError, VfResult};

use crate::config::NetConf;
use crate::link::{LinkControl, Netns};
use crate::locator::DeviceLocator;
use crate::settings::DEFAULT_SETTINGS_PATH;
use crate::vf_mgr::{AttachError, AttachRecord, VfMgr};

/// CNI versions this plugin can speak.
pub const SUPPORTED_VERSIONS: &[&str] = &["0.3.0", "0.3.1", "0.4.0", "1.0.0"];

/// Version reported when the request does not name one.
pub const DEFAULT_CNI_VERSION: &str = "1.0.0";

/// Plugin invocation. Every flag falls back to its CNI environment variable.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "sriov")]
#[command(author, version, about = "SR-IOV VF CNI plugin", long_about = None)]
pub struct CniArgs {
    /// ADD, DEL, CHECK or VERSION
    #[arg(long, env = "CNI_COMMAND")]
    pub command: Option<String>,

    /// Container id
    #[arg(long, env = "CNI_CONTAINERID")]
    pub container_id: Option<String>,

    /// Path of the container network namespace
    #[arg(long, env = "CNI_NETNS")]
    pub netns: Option<PathBuf>,

    /// Interface name inside the container
    #[arg(long, env = "CNI_IFNAME")]
    pub ifname: Option<String>,

    /// Extra `KEY=VALUE;...` arguments
    #[arg(long, env = "CNI_ARGS")]
    pub cni_args: Option<String>,

    /// Plugin search path
    #[arg(long, env = "CNI_PATH")]
    pub cni_path: Option<String>,

    /// Settings file
    #[arg(long, env = "SRIOV_CNI_CONFIG", default_value = DEFAULT_SETTINGS_PATH)]
    pub config: PathBuf,
}

/// CNI operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CniCommand {
    Add,
    Del,
    Check,
    Version,
}

impl FromStr for CniCommand {
    type Err = VfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADD" => Ok(CniCommand::Add),
            "DEL" => Ok(CniCommand::Del),
            "CHECK" => Ok(CniCommand::Check),
            "VERSION" => Ok(CniCommand::Version),
            other => Err(VfError::environment(
                "CNI_COMMAND",
                format!("unknown command '{}'", other),
            )),
        }
    }
}

impl fmt::Display for CniCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CniCommand::Add => "ADD",
            CniCommand::Del => "DEL",
            CniCommand::Check => "CHECK",
            CniCommand::Version => "VERSION",
        };
        f.write_str(s)
    }
}

impl CniArgs {
    pub fn cni_command(&self) -> VfResult<CniCommand> {
        self.command
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| VfError::environment("CNI_COMMAND", "not set"))?
            .parse()
    }

    /// Container namespace, if given.
    pub fn netns(&self) -> Option<Netns> {
        self.netns
            .as_ref()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Netns::new)
    }

    pub fn require_netns(&self) -> VfResult<Netns> {
        self.netns()
            .ok_or_else(|| VfError::environment("CNI_NETNS", "not set"))
    }

    pub fn require_ifname(&self) -> VfResult<&str> {
        self.ifname
            .as_deref()
            .filter(|i| !i.is_empty())
            .ok_or_else(|| VfError::environment("CNI_IFNAME", "not set"))
    }
}

/// One interface of an ADD result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CniInterface {
    pub name: String,
    pub mac: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sandbox: String,
}

/// ADD result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddResult {
    pub cni_version: String,
    pub interfaces: Vec<CniInterface>,
    /// Handed back on DEL and CHECK.
    pub attach_record: AttachRecord,
}

/// VERSION result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionResult {
    pub cni_version: String,
    pub supported_versions: Vec<String>,
}

impl VersionResult {
    pub fn new() -> Self {
        Self {
            cni_version: DEFAULT_CNI_VERSION.to_string(),
            supported_versions: SUPPORTED_VERSIONS.iter().map(|v| v.to_string()).collect(),
        }
    }
}

impl Default for VersionResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Error result, written to stdout with a non-zero exit status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResult {
    pub cni_version: String,
    pub code: u32,
    pub msg: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub details: String,
}

impl ErrorResult {
    pub fn from_error(cni_version: &str, err: &VfError) -> Self {
        Self {
            cni_version: cni_version.to_string(),
            code: err.cni_code(),
            msg: err.to_string(),
            details: err.kind().to_string(),
        }
    }

    pub fn from_attach(cni_version: &str, err: &AttachError) -> Self {
        let mut details = format!("{} ({})", err.cause.kind(), err.phase);
        if let Some(secondary) = &err.secondary {
            details.push_str(&format!("; rollback: {}", secondary));
        }
        Self {
            cni_version: cni_version.to_string(),
            code: err.cause.cni_code(),
            msg: err.cause.to_string(),
            details,
        }
    }
}

fn version_of(conf: &NetConf) -> &str {
    if conf.cni_version.is_empty() {
        DEFAULT_CNI_VERSION
    } else {
        &conf.cni_version
    }
}

/// Runs one ADD, DEL or CHECK. Returns the JSON to print, if any.
pub async fn handle<L: LinkControl, D: DeviceLocator>(
    mgr: &VfMgr<L, D>,
    command: CniCommand,
    args: &CniArgs,
    conf: &NetConf,
) -> Result<Option<Value>, ErrorResult> {
    let version = version_of(conf);
    let fail = |e: VfError| ErrorResult::from_error(version, &e);

    if !conf.cni_version.is_empty() && !SUPPORTED_VERSIONS.contains(&conf.cni_version.as_str()) {
        warn!(version = %conf.cni_version, "Unsupported CNI version requested");
    }
    debug!(command = %command, container = ?args.container_id, "Handling CNI request");

    match command {
        CniCommand::Add => {
            let config = conf.resolve().map_err(fail)?;
            let netns = args.require_netns().map_err(fail)?;
            let ifname = args.require_ifname().map_err(fail)?;

            let attachment = mgr
                .attach(config, &netns, ifname)
                .await
                .map_err(|e| ErrorResult::from_attach(version, &e))?;

            let result = AddResult {
                cni_version: version.to_string(),
                interfaces: vec![CniInterface {
                    name: attachment.ifname.clone(),
                    mac: attachment.mac.clone(),
                    sandbox: if attachment.device_plane {
                        String::new()
                    } else {
                        netns.to_string()
                    },
                }],
                attach_record: attachment.record,
            };
            serde_json::to_value(&result)
                .map(Some)
                .map_err(|e| fail(VfError::decode("result", e)))
        }
        CniCommand::Del => {
            let value = conf
                .attach_record_value()
                .ok_or_else(|| fail(VfError::restore("no attach record in request")))?;
            let record = AttachRecord::from_value(value).map_err(fail)?;
            let ifname = args.require_ifname().map_err(fail)?;

            mgr.detach(&record, args.netns().as_ref(), ifname)
                .await
                .map_err(fail)?;
            Ok(None)
        }
        CniCommand::Check => {
            let config = conf.resolve().map_err(fail)?;
            let netns = args.require_netns().map_err(fail)?;
            let ifname = args.require_ifname().map_err(fail)?;

            mgr.check(&config, &netns, ifname).await.map_err(fail)?;
            Ok(None)
        }
        CniCommand::Version => serde_json::to_value(VersionResult::new())
            .map(Some)
            .map_err(|e| fail(VfError::decode("result", e))),
    }
}
