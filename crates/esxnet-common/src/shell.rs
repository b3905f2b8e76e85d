//! Remote command execution on ESXi hosts.
//!
//! Commands run through the system `ssh` client so that host key handling
//! and ciphers follow the operator's OpenSSH configuration. When a password
//! is configured the client is wrapped in `sshpass -e`; otherwise the
//! session runs in `BatchMode` and relies on key authentication.
//!
//! # Example
//!
//! ```ignore
//! use esxnet_common::shell::{shellquote, RemoteShell, SshTarget};
//!
//! let shell = RemoteShell::new(SshTarget::new("esx01.example.com", "root"));
//! let cmd = format!("esxcli network vswitch standard list -v {}", shellquote("vswitch_prod"));
//! let result = shell.exec(&cmd).await?;
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;

use crate::error::{NetCfgError, NetCfgResult};

/// Default SSH client binary.
pub const SSH_CMD: &str = "ssh";

/// Password helper used when a password is configured.
pub const SSHPASS_CMD: &str = "sshpass";

/// Default SSH port.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Exit code the OpenSSH client uses for connection-level failures.
pub const SSH_CONNECTION_FAILURE: i32 = 255;

/// Exit code `sshpass` uses when the password was rejected.
pub const SSHPASS_BAD_PASSWORD: i32 = 5;

/// Regex for characters that need escaping in shell double-quotes.
/// Matches: $, `, ", \, and newline
static SHELL_ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([$`"\\\n])"#).expect("Invalid regex pattern"));

/// Quotes a string for safe use in shell commands.
///
/// This function wraps the string in double quotes and escapes any
/// characters that have special meaning inside double quotes:
/// - `$` (variable expansion)
/// - `` ` `` (command substitution)
/// - `"` (quote termination)
/// - `\` (escape character)
/// - newline (command termination)
///
/// # Example
///
/// ```
/// use esxnet_common::shell::shellquote;
///
/// assert_eq!(shellquote("simple"), "\"simple\"");
/// assert_eq!(shellquote("with$var"), "\"with\\$var\"");
/// assert_eq!(shellquote("with\"quote"), "\"with\\\"quote\"");
/// ```
pub fn shellquote(s: &str) -> String {
    let escaped = SHELL_ESCAPE_RE.replace_all(s, r"\$1");
    format!("\"{}\"", escaped)
}

/// Result of a shell command execution.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// The exit code of the command (0 = success).
    pub exit_code: i32,
    /// The trimmed stdout output.
    pub stdout: String,
    /// The trimmed stderr output.
    pub stderr: String,
}

impl ExecResult {
    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns the combined output (stdout + stderr) for error messages.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Connection parameters for an ESXi host shell.
#[derive(Clone, PartialEq, Eq)]
pub struct SshTarget {
    /// Host name or address.
    pub host: String,
    /// Login user.
    pub user: String,
    /// Password, if key authentication is not used.
    pub password: Option<String>,
    /// SSH port.
    pub port: u16,
    /// SSH client binary.
    pub ssh_binary: String,
}

impl SshTarget {
    /// Creates a key-authenticated target on the default port.
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            password: None,
            port: DEFAULT_SSH_PORT,
            ssh_binary: SSH_CMD.to_string(),
        }
    }

    /// Sets a password for `sshpass` based login.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Overrides the SSH port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Overrides the SSH client binary.
    pub fn with_ssh_binary(mut self, binary: impl Into<String>) -> Self {
        self.ssh_binary = binary.into();
        self
    }

    /// Returns "user@host".
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

impl std::fmt::Debug for SshTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshTarget")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("port", &self.port)
            .field("ssh_binary", &self.ssh_binary)
            .finish()
    }
}

/// Program, arguments and optional password environment for one remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Program to spawn locally.
    pub program: String,
    /// Arguments, the last one being the remote command.
    pub args: Vec<String>,
    /// Value for `SSHPASS` when a password is used.
    pub sshpass_env: Option<String>,
}

/// Shell on a remote ESXi host.
///
/// Cloning is cheap; clones share the same target.
#[derive(Debug, Clone)]
pub struct RemoteShell {
    target: Arc<SshTarget>,
}

impl RemoteShell {
    /// Creates a shell for the given target.
    pub fn new(target: SshTarget) -> Self {
        Self {
            target: Arc::new(target),
        }
    }

    /// Returns the connection parameters.
    pub fn target(&self) -> &SshTarget {
        &self.target
    }

    /// Builds the local invocation that runs `cmd` on the host.
    pub fn invocation(&self, cmd: &str) -> Invocation {
        let target = &self.target;
        let mut args = Vec::new();

        let program = match &target.password {
            Some(_) => {
                args.push("-e".to_string());
                args.push(target.ssh_binary.clone());
                SSHPASS_CMD.to_string()
            }
            None => {
                args.push("-o".to_string());
                args.push("BatchMode=yes".to_string());
                target.ssh_binary.clone()
            }
        };

        args.extend([
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-p".to_string(),
            target.port.to_string(),
            target.destination(),
            "--".to_string(),
            cmd.to_string(),
        ]);

        Invocation {
            program,
            args,
            sshpass_env: target.password.clone(),
        }
    }

    /// Executes a command on the host.
    ///
    /// # Returns
    ///
    /// * `Ok(ExecResult)` - The command execution result
    /// * `Err(NetCfgError)` - If the local ssh client could not be spawned
    pub async fn exec(&self, cmd: &str) -> NetCfgResult<ExecResult> {
        tracing::debug!(host = %self.target.host, command = %cmd, "Executing remote command");

        let invocation = self.invocation(cmd);
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(password) = &invocation.sshpass_env {
            command.env("SSHPASS", password);
        }

        let output = command.output().await.map_err(|e| NetCfgError::ShellExec {
            command: cmd.to_string(),
            source: e,
        })?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        let result = ExecResult {
            exit_code,
            stdout,
            stderr,
        };

        if result.success() {
            tracing::trace!(command = %cmd, exit_code = exit_code, "Command succeeded");
        } else {
            tracing::warn!(
                host = %self.target.host,
                command = %cmd,
                exit_code = exit_code,
                stderr = %result.stderr,
                "Command failed"
            );
        }

        Ok(result)
    }

    /// Executes a command and returns an error on non-zero exit.
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - The stdout output on success
    /// * `Err(NetCfgError)` - If the command fails or returns non-zero
    pub async fn exec_or_throw(&self, cmd: &str) -> NetCfgResult<String> {
        let result = self.exec(cmd).await?;
        if result.success() {
            Ok(result.stdout)
        } else {
            Err(NetCfgError::ShellCommandFailed {
                command: cmd.to_string(),
                exit_code: result.exit_code,
                output: result.combined_output(),
            })
        }
    }

    /// Verifies the host accepts a login and runs a trivial command.
    ///
    /// Transport failures are reported as connection errors and a rejected
    /// password as an authentication error.
    pub async fn probe(&self) -> NetCfgResult<()> {
        let result = self.exec("true").await.map_err(|e| {
            NetCfgError::connection(self.target.destination(), e.to_string())
        })?;

        match result.exit_code {
            0 => Ok(()),
            SSHPASS_BAD_PASSWORD if self.target.password.is_some() => {
                Err(NetCfgError::authentication(
                    &self.target.host,
                    &self.target.user,
                    result.combined_output(),
                ))
            }
            _ => Err(NetCfgError::connection(
                self.target.destination(),
                format!(
                    "ssh exited with code {}: {}",
                    result.exit_code,
                    result.combined_output()
                ),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shellquote_simple() {
        assert_eq!(shellquote("simple"), "\"simple\"");
        assert_eq!(shellquote("vmnic4"), "\"vmnic4\"");
        assert_eq!(shellquote("128"), "\"128\"");
    }

    #[test]
    fn test_shellquote_special_chars() {
        // Dollar sign (variable expansion)
        assert_eq!(shellquote("$HOME"), "\"\\$HOME\"");

        // Backtick (command substitution)
        assert_eq!(shellquote("`whoami`"), "\"\\`whoami\\`\"");

        // Double quote
        assert_eq!(shellquote("say \"hello\""), "\"say \\\"hello\\\"\"");

        // Backslash
        assert_eq!(shellquote("path\\to"), "\"path\\\\to\"");

        // Newline
        assert_eq!(shellquote("line1\nline2"), "\"line1\\\nline2\"");
    }

    #[test]
    fn test_shellquote_empty() {
        assert_eq!(shellquote(""), "\"\"");
    }

    #[test]
    fn test_exec_result_combined() {
        let result = ExecResult {
            exit_code: 0,
            stdout: "stdout".to_string(),
            stderr: "stderr".to_string(),
        };
        assert!(result.success());
        assert_eq!(result.combined_output(), "stdout\nstderr");

        let failed = ExecResult {
            exit_code: 1,
            stdout: "".to_string(),
            stderr: "error message".to_string(),
        };
        assert!(!failed.success());
        assert_eq!(failed.combined_output(), "error message");
    }

    #[test]
    fn test_invocation_key_auth() {
        let shell = RemoteShell::new(SshTarget::new("esx01", "root").with_port(2222));
        let inv = shell.invocation("esxcli network nic list");

        assert_eq!(inv.program, "ssh");
        assert_eq!(inv.sshpass_env, None);
        assert!(inv.args.contains(&"BatchMode=yes".to_string()));
        assert!(inv.args.contains(&"2222".to_string()));
        assert!(inv.args.contains(&"root@esx01".to_string()));
        assert_eq!(inv.args.last().unwrap(), "esxcli network nic list");
    }

    #[test]
    fn test_invocation_password_auth() {
        let shell = RemoteShell::new(SshTarget::new("esx01", "root").with_password("s3cret"));
        let inv = shell.invocation("true");

        assert_eq!(inv.program, "sshpass");
        assert_eq!(&inv.args[..2], &["-e".to_string(), "ssh".to_string()]);
        assert_eq!(inv.sshpass_env.as_deref(), Some("s3cret"));
        assert!(!inv.args.contains(&"BatchMode=yes".to_string()));
        assert!(!inv.args.iter().any(|a| a.contains("s3cret")));
    }

    #[test]
    fn test_target_debug_redacts_password() {
        let target = SshTarget::new("esx01", "root").with_password("s3cret");
        let printed = format!("{:?}", target);
        assert!(!printed.contains("s3cret"));
        assert!(printed.contains("<redacted>"));
    }

    #[tokio::test]
    async fn test_exec_missing_binary() {
        let shell = RemoteShell::new(
            SshTarget::new("esx01", "root").with_ssh_binary("/nonexistent/ssh-client"),
        );
        match shell.exec("true").await {
            Err(NetCfgError::ShellExec { command, .. }) => assert_eq!(command, "true"),
            other => panic!("Expected ShellExec error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_probe_missing_binary_is_connection_error() {
        let shell = RemoteShell::new(
            SshTarget::new("esx01", "root").with_ssh_binary("/nonexistent/ssh-client"),
        );
        let err = shell.probe().await.unwrap_err();
        assert!(matches!(err, NetCfgError::Connection { .. }));
        assert!(err.is_fatal());
    }
}
