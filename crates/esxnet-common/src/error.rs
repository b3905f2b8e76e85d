//! Error types for host network operations.
//!
//! This module defines the error taxonomy shared by the management session,
//! the remote shell and the host gateway. All errors implement
//! `std::error::Error` via `thiserror`.

use std::io;
use thiserror::Error;

/// Result type alias for host network operations.
pub type NetCfgResult<T> = Result<T, NetCfgError>;

/// Errors that can occur while talking to a management endpoint or host.
#[derive(Debug, Error)]
pub enum NetCfgError {
    /// The management endpoint or host could not be reached.
    #[error("Could not connect to {endpoint}: {message}")]
    Connection {
        /// Endpoint address (vCenter FQDN or ESXi host).
        endpoint: String,
        /// Error message.
        message: String,
    },

    /// The endpoint rejected the supplied credentials.
    #[error("Authentication to {endpoint} as '{user}' failed: {message}")]
    Authentication {
        /// Endpoint address.
        endpoint: String,
        /// User the login was attempted as.
        user: String,
        /// Error message.
        message: String,
    },

    /// The host is not in the management inventory or not connected.
    #[error("Host '{host}' not found or not connected: {message}")]
    HostNotFound {
        /// Host identifier.
        host: String,
        /// Error message.
        message: String,
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

    /// A host fact (bond, VMK interface, address) could not be determined.
    #[error("Fact lookup failed for {fact}: {message}")]
    FactLookup {
        /// The fact being looked up (e.g. "vmk for vmnic4").
        fact: String,
        /// Error message.
        message: String,
    },

    /// The management API answered with something unexpected.
    #[error("Management API {operation} failed: {message}")]
    Management {
        /// The operation that failed (e.g. "create session").
        operation: String,
        /// Error message.
        message: String,
    },

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// Internal error (unexpected state).
    #[error("Internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl NetCfgError {
    /// Creates a connection error.
    pub fn connection(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Creates an authentication error.
    pub fn authentication(
        endpoint: impl Into<String>,
        user: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Authentication {
            endpoint: endpoint.into(),
            user: user.into(),
            message: message.into(),
        }
    }

    /// Creates a host not found error.
    pub fn host_not_found(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HostNotFound {
            host: host.into(),
            message: message.into(),
        }
    }

    /// Creates a fact lookup error.
    pub fn fact_lookup(fact: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FactLookup {
            fact: fact.into(),
            message: message.into(),
        }
    }

    /// Creates a management API error.
    pub fn management(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Management {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this error means the endpoint itself is unusable,
    /// so nothing further should be attempted against it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            NetCfgError::Connection { .. }
                | NetCfgError::Authentication { .. }
                | NetCfgError::HostNotFound { .. }
        )
    }
}
