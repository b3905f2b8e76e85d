//! Common infrastructure for ESXi host network tooling.
//!
//! This crate provides the pieces shared by the audit/migration tool and
//! its test harness:
//!
//! - [`shell`]: Remote command execution on an ESXi host with proper quoting
//! - [`error`]: Error taxonomy for gateway, shell and configuration failures
//!
//! # Example
//!
//! ```ignore
//! use esxnet_common::{
//!     shell::{shellquote, RemoteShell, SshTarget},
//!     error::NetCfgResult,
//! };
//!
//! async fn list_nics(shell: &RemoteShell) -> NetCfgResult<String> {
//!     shell.exec_or_throw("esxcli network nic list").await
//! }
//! ```

pub mod error;
pub mod shell;

// Re-export commonly used items at crate root
pub use error::{NetCfgError, NetCfgResult};
pub use shell::{shellquote, ExecResult, RemoteShell, SshTarget};
