//! Common infrastructure for the SR-IOV CNI crates.
//!
//! - [`shell`]: Safe shell command execution with proper quoting
//! - [`error`]: The error taxonomy shared by every plugin operation
//!
//! # Example
//!
//! ```ignore
//! use sriov_cni_common::{
//!     shell::{self, IP_CMD, shellquote},
//!     VfResult,
//! };
//!
//! async fn set_spoofchk(pf: &str, vf: u32) -> VfResult<()> {
//!     let cmd = format!("{} link set dev {} vf {} spoofchk off",
//!         IP_CMD, shellquote(pf), vf);
//!     shell::exec_checked(&cmd).await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod shell;

pub use error::{Mismatch, VfError, VfResult};
