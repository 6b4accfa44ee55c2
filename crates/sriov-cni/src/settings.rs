//! Plugin settings file.
//!
//! Loads optional host-level settings from TOML. A missing file means
//! defaults. Default location: /etc/cni/sriov-cni.toml

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use sriov_cni_common::{shell, VfError, VfResult};

use crate::commands::IpCommands;
use crate::link::Netns;
use crate::locator::SYSFS_ROOT;
use crate::logging::LogLevel;

/// Default settings file location.
pub const DEFAULT_SETTINGS_PATH: &str = "/etc/cni/sriov-cni.toml";

/// External command paths
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSettings {
    /// `ip` binary
    #[serde(default = "default_ip")]
    pub ip: String,

    /// `nsenter` binary
    #[serde(default = "default_nsenter")]
    pub nsenter: String,
}

/// Host layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemSettings {
    /// Where sysfs is mounted
    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: PathBuf,

    /// Namespace links are returned to on detach and rollback
    #[serde(default = "default_host_netns")]
    pub host_netns: PathBuf,
}

/// Logging defaults, overridable per request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// panic, error, warning, info or debug
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file; stderr when unset
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// Complete plugin settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub commands: CommandSettings,

    #[serde(default)]
    pub system: SystemSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

// Default functions
fn default_ip() -> String {
    shell::IP_CMD.to_string()
}

fn default_nsenter() -> String {
    shell::NSENTER_CMD.to_string()
}

fn default_sysfs_root() -> PathBuf {
    PathBuf::from(SYSFS_ROOT)
}

/// The plugin's own namespace. Not `/proc/self`: `ip` resolves that against
/// itself, and it may run under `nsenter`.
fn default_host_netns() -> PathBuf {
    PathBuf::from(format!("/proc/{}/ns/net", std::process::id()))
}

fn default_log_level() -> String {
    "info".to_string()
}

// Default implementations
impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            ip: default_ip(),
            nsenter: default_nsenter(),
        }
    }
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            sysfs_root: default_sysfs_root(),
            host_netns: default_host_netns(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Settings {
    /// Load settings from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> VfResult<Self> {
        let path = path.as_ref();

        let settings: Self = match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                VfError::config(
                    "settings",
                    format!("Failed to parse {}: {}", path.display(), e),
                )
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => return Err(VfError::io(path, e)),
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Validate settings
    pub fn validate(&self) -> VfResult<()> {
        if self.commands.ip.trim().is_empty() {
            return Err(VfError::config("commands.ip", "must not be empty"));
        }
        if self.commands.nsenter.trim().is_empty() {
            return Err(VfError::config("commands.nsenter", "must not be empty"));
        }
        if !self.system.host_netns.is_absolute() {
            return Err(VfError::config("system.host_netns", "must be an absolute path"));
        }
        self.logging
            .level
            .parse::<LogLevel>()
            .map_err(|reason| VfError::config("logging.level", reason))?;
        Ok(())
    }

    pub fn ip_commands(&self) -> IpCommands {
        IpCommands::new(&self.commands.ip, &self.commands.nsenter)
    }

    pub fn host_netns(&self) -> Netns {
        Netns::new(&self.system.host_netns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.commands.ip, "/sbin/ip");
        assert_eq!(settings.commands.nsenter, "/usr/bin/nsenter");
        assert_eq!(settings.system.sysfs_root, PathBuf::from("/sys"));
        assert_eq!(
            settings.system.host_netns,
            PathBuf::from(format!("/proc/{}/ns/net", std::process::id()))
        );
        assert_eq!(settings.logging.level, "info");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
[commands]
ip = "/usr/sbin/ip"

[logging]
level = "debug"
file = "/var/log/sriov-cni.log"
"#;
        let settings: Settings = toml::from_str(toml_str).unwrap();
        assert_eq!(settings.commands.ip, "/usr/sbin/ip");
        assert_eq!(settings.logging.level, "debug");
        assert_eq!(
            settings.logging.file,
            Some(PathBuf::from("/var/log/sriov-cni.log"))
        );
        // Unspecified values should use defaults
        assert_eq!(settings.commands.nsenter, "/usr/bin/nsenter");
    }

    #[test]
    fn test_load_nonexistent_file_defaults() {
        let settings = Settings::load_or_default("/nonexistent/sriov-cni.toml").unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[system]\nsysfs_root = \"/tmp/sys\"").unwrap();
        let settings = Settings::load_or_default(file.path()).unwrap();
        assert_eq!(settings.system.sysfs_root, PathBuf::from("/tmp/sys"));
    }

    #[test]
    fn test_load_rejects_bad_level() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nlevel = \"chatty\"").unwrap();
        let err = Settings::load_or_default(file.path()).unwrap_err();
        assert!(matches!(err, VfError::Config { .. }));
    }

    #[test]
    fn test_validate_relative_netns() {
        let mut settings = Settings::default();
        settings.system.host_netns = PathBuf::from("ns/net");
        assert!(settings.validate().is_err());
    }
}
