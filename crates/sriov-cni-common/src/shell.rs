//! Shell command execution utilities.
//!
//! Every interaction with the link layer goes through the `ip` tool (and
//! `nsenter` for commands that must run inside a container network
//! namespace). Arguments that come from the caller are always passed through
//! [`shellquote`] before being spliced into a command line.
//!
//! # Example
//!
//! ```ignore
//! use sriov_cni_common::shell::{self, IP_CMD, shellquote};
//!
//! let cmd = format!("{} -j link show dev {}", IP_CMD, shellquote("enp3s0f0"));
//! let result = shell::exec(&cmd).await?;
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{VfError, VfResult};

/// Default path to the `ip` command.
pub const IP_CMD: &str = "/sbin/ip";

/// Default path to the `nsenter` command.
pub const NSENTER_CMD: &str = "/usr/bin/nsenter";

/// Shell used to run command lines.
pub const SH_CMD: &str = "/bin/sh";

/// Regex for characters that need escaping in shell double-quotes.
/// Matches: $, `, ", \, and newline
static SHELL_ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([$`"\\\n])"#).expect("Invalid regex pattern"));

/// Quotes a string for safe use in shell commands.
///
/// The string is wrapped in double quotes and every character with a special
/// meaning inside double quotes (`$`, `` ` ``, `"`, `\`, newline) is escaped.
///
/// # Example
///
/// ```
/// use sriov_cni_common::shell::shellquote;
///
/// assert_eq!(shellquote("enp3s0f0v1"), "\"enp3s0f0v1\"");
/// assert_eq!(shellquote("with$var"), "\"with\\$var\"");
/// ```
pub fn shellquote(s: &str) -> String {
    let escaped = SHELL_ESCAPE_RE.replace_all(s, r"\$1");
    format!("\"{}\"", escaped)
}

/// Exit status and trimmed output of a command line.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// What `ip` had to say about a failure: stderr, or stdout if that is
    /// all there is.
    pub fn diagnostic(&self) -> &str {
        if self.stderr.is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }
}

/// Runs a command line through `/bin/sh -c`.
///
/// A non-zero exit status is returned, not raised, so callers can use it as
/// an answer (for instance "no such device"). Use [`exec_checked`] otherwise.
pub async fn exec(cmd: &str) -> VfResult<ExecResult> {
    tracing::debug!(command = %cmd, "Running command");

    let output = Command::new(SH_CMD)
        .arg("-c")
        .arg(cmd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| VfError::ShellExec {
            command: cmd.to_string(),
            source: e,
        })?;

    let result = ExecResult {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    };
    tracing::trace!(command = %cmd, exit_code = result.exit_code, "Command finished");

    Ok(result)
}

/// Runs a command line and returns its stdout; a non-zero exit is a
/// [`VfError::ShellCommandFailed`] carrying the diagnostic.
pub async fn exec_checked(cmd: &str) -> VfResult<String> {
    let result = exec(cmd).await?;
    if result.success() {
        return Ok(result.stdout);
    }

    tracing::warn!(command = %cmd, exit_code = result.exit_code, "Command failed: {}", result.diagnostic());
    Err(VfError::ShellCommandFailed {
        command: cmd.to_string(),
        exit_code: result.exit_code,
        output: result.diagnostic().to_string(),
    })
}
