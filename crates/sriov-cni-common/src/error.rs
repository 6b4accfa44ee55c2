//! Error types for SR-IOV VF operations.
//!
//! Every plugin operation reports failures through [`VfError`]. The variants
//! follow the failure taxonomy of the attach/detach/check flows: validation,
//! device resolution, snapshot, per-attribute configuration, namespace moves,
//! restore and consistency checks, plus the plumbing errors underneath them.

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for VF operations.
pub type VfResult<T> = Result<T, VfError>;

/// A single field whose live value differs from the requested one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    /// Request field name (e.g. "vlan").
    pub field: String,
    /// Value requested by the caller.
    pub expected: String,
    /// Value read back from the device.
    pub observed: String,
}

impl Mismatch {
    pub fn new(
        field: impl Into<String>,
        expected: impl ToString,
        observed: impl ToString,
    ) -> Self {
        Self {
            field: field.into(),
            expected: expected.to_string(),
            observed: observed.to_string(),
        }
    }
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: expected {}, observed {}",
            self.field, self.expected, self.observed
        )
    }
}

/// Errors that can occur during VF operations.
#[derive(Debug, Error)]
pub enum VfError {
    /// The request failed validation. No device was touched.
    #[error("Invalid configuration for {field}: {reason}")]
    Config {
        /// The offending request field.
        field: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The device address does not name a virtual function.
    #[error("Failed to resolve device '{address}': {reason}")]
    DeviceResolution {
        /// The PCI address given by the caller.
        address: String,
        /// Error message.
        reason: String,
    },

    /// Reading the VF state failed.
    #[error("Failed to read state of VF {vf} on {pf}: {source}")]
    Snapshot {
        /// Physical function netdev name.
        pf: String,
        /// VF index.
        vf: u32,
        /// The underlying failure.
        #[source]
        source: Box<VfError>,
    },

    /// A single VF attribute could not be applied.
    #[error("Failed to set VF attribute '{attribute}' on {pf} vf {vf}: {source}")]
    LinkConfig {
        /// Attribute name (mac, vlan, rate, spoofchk, trust, link_state).
        attribute: String,
        /// Physical function netdev name.
        pf: String,
        /// VF index.
        vf: u32,
        /// The underlying failure.
        #[source]
        source: Box<VfError>,
    },

    /// Moving or renaming the VF netdev across namespaces failed.
    #[error("Failed to move interface '{ifname}': {source}")]
    NamespaceMove {
        /// Interface name at the time of the failure.
        ifname: String,
        /// The underlying failure.
        #[source]
        source: Box<VfError>,
    },

    /// Restoring the original VF state failed.
    #[error("Failed to restore VF state: {reason}")]
    Restore {
        /// Error message.
        reason: String,
    },

    /// Live VF attributes differ from the requested configuration.
    #[error("VF state does not match configuration: {}", first_mismatch(.mismatches))]
    CheckMismatch {
        /// All mismatching fields, in comparison order.
        mismatches: Vec<Mismatch>,
    },

    /// Failed to execute a shell command (spawn error).
    #[error("Failed to execute shell command '{command}': {source}")]
    ShellExec {
        /// The command that failed to execute.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Shell command returned non-zero exit code.
    #[error("Shell command failed: '{command}' (exit code {exit_code}): {output}")]
    ShellCommandFailed {
        /// The command that failed.
        command: String,
        /// The exit code.
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// Tool output could not be parsed.
    #[error("Failed to parse {what}: {reason}")]
    Parse {
        /// What was being parsed.
        what: String,
        /// Error message.
        reason: String,
    },

    /// Filesystem access failed.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Structured input could not be decoded.
    #[error("Failed to decode {what}: {reason}")]
    Decode {
        /// What was being decoded.
        what: String,
        /// Error message.
        reason: String,
    },

    /// A required invocation variable is missing or malformed.
    #[error("Invalid environment variable {name}: {reason}")]
    Environment {
        /// Variable name.
        name: String,
        /// Error message.
        reason: String,
    },
}

fn first_mismatch(mismatches: &[Mismatch]) -> String {
    match mismatches {
        [] => "no mismatches".to_string(),
        [only] => only.to_string(),
        [first, rest @ ..] => format!("{} (and {} more)", first, rest.len()),
    }
}

impl VfError {
    /// Creates an invalid configuration error.
    pub fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates a device resolution error.
    pub fn device_resolution(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DeviceResolution {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Wraps a read failure as a snapshot error.
    pub fn snapshot(pf: impl Into<String>, vf: u32, source: VfError) -> Self {
        Self::Snapshot {
            pf: pf.into(),
            vf,
            source: Box::new(source),
        }
    }

    /// Wraps a set failure as a per-attribute configuration error.
    pub fn link_config(
        attribute: impl Into<String>,
        pf: impl Into<String>,
        vf: u32,
        source: VfError,
    ) -> Self {
        Self::LinkConfig {
            attribute: attribute.into(),
            pf: pf.into(),
            vf,
            source: Box::new(source),
        }
    }

    /// Wraps a link failure as a namespace move error.
    pub fn namespace_move(ifname: impl Into<String>, source: VfError) -> Self {
        Self::NamespaceMove {
            ifname: ifname.into(),
            source: Box::new(source),
        }
    }

    /// Creates a restore error.
    pub fn restore(reason: impl Into<String>) -> Self {
        Self::Restore {
            reason: reason.into(),
        }
    }

    /// Creates a parse error.
    pub fn parse(what: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            what: what.into(),
            reason: reason.into(),
        }
    }

    /// Creates a filesystem error.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a decode error.
    pub fn decode(what: impl Into<String>, reason: impl ToString) -> Self {
        Self::Decode {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates an environment error.
    pub fn environment(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Environment {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Short machine-readable name of the error category.
    pub fn kind(&self) -> &'static str {
        match self {
            VfError::Config { .. } => "config",
            VfError::DeviceResolution { .. } => "device_resolution",
            VfError::Snapshot { .. } => "snapshot",
            VfError::LinkConfig { .. } => "link_config",
            VfError::NamespaceMove { .. } => "namespace_move",
            VfError::Restore { .. } => "restore",
            VfError::CheckMismatch { .. } => "check_mismatch",
            VfError::ShellExec { .. } => "shell_exec",
            VfError::ShellCommandFailed { .. } => "shell_command",
            VfError::Parse { .. } => "parse",
            VfError::Io { .. } => "io",
            VfError::Decode { .. } => "decode",
            VfError::Environment { .. } => "environment",
        }
    }

    /// CNI error code reported to the runtime.
    ///
    /// Codes below 100 are the ones reserved by the CNI specification,
    /// codes from 100 upwards are plugin specific.
    pub fn cni_code(&self) -> u32 {
        match self {
            VfError::Environment { .. } => 4,
            VfError::ShellExec { .. } | VfError::Io { .. } => 5,
            VfError::Decode { .. } => 6,
            VfError::Config { .. } => 7,
            VfError::DeviceResolution { .. } => 100,
            VfError::Snapshot { .. } | VfError::Parse { .. } => 101,
            VfError::LinkConfig { .. } | VfError::ShellCommandFailed { .. } => 102,
            VfError::NamespaceMove { .. } => 103,
            VfError::Restore { .. } => 104,
            VfError::CheckMismatch { .. } => 105,
        }
    }
}
