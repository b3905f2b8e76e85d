//! Configuration file support for esxnetcfg
//!
//! Loads and validates settings from a TOML file.
//! Default location: /etc/esxnet/esxnetcfg.toml

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use esxnet_common::{NetCfgError, NetCfgResult};

use crate::types::{HostTarget, VlanMapping};

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/esxnet/esxnetcfg.toml";

/// vCenter settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagementConfig {
    /// vCenter FQDN or URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// vCenter user
    #[serde(default)]
    pub user: String,

    /// vCenter password
    #[serde(default)]
    pub password: String,

    /// Accept self-signed certificates
    #[serde(default)]
    pub insecure_tls: bool,
}

/// ESXi shell settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EsxiConfig {
    /// Shell user
    #[serde(default = "default_esxi_user")]
    pub user: String,

    /// Shell password; key authentication when unset
    #[serde(default)]
    pub password: Option<String>,

    /// SSH port
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,

    /// SSH client binary
    #[serde(default = "default_ssh_binary")]
    pub ssh_binary: String,
}

/// Target network layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// First physical NIC
    #[serde(default = "default_primary_nic")]
    pub primary_nic: String,

    /// Second physical NIC
    #[serde(default = "default_secondary_nic")]
    pub secondary_nic: String,

    /// Standard switch name
    #[serde(default = "default_vswitch")]
    pub vswitch: String,

    /// VLAN ID (as text) to port group name
    #[serde(default)]
    pub networks: BTreeMap<String, String>,
}

/// Task wait settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WaitConfig {
    /// Deadline per task wait in seconds; no deadline when unset
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Complete esxnetcfg configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EsxNetConfig {
    /// vCenter configuration
    #[serde(default)]
    pub management: ManagementConfig,

    /// ESXi shell configuration
    #[serde(default)]
    pub esxi: EsxiConfig,

    /// Network layout
    #[serde(default)]
    pub network: NetworkConfig,

    /// Task waits
    #[serde(default)]
    pub wait: WaitConfig,
}

// Default functions
fn default_endpoint() -> String {
    "vsphere.vmware.com".to_string()
}

fn default_esxi_user() -> String {
    "root".to_string()
}

fn default_ssh_port() -> u16 {
    esxnet_common::shell::DEFAULT_SSH_PORT
}

fn default_ssh_binary() -> String {
    esxnet_common::shell::SSH_CMD.to_string()
}

fn default_primary_nic() -> String {
    "vmnic4".to_string()
}

fn default_secondary_nic() -> String {
    "vmnic5".to_string()
}

fn default_vswitch() -> String {
    "vswitch_prod".to_string()
}

// Default implementations
impl Default for ManagementConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            user: String::new(),
            password: String::new(),
            insecure_tls: false,
        }
    }
}

impl Default for EsxiConfig {
    fn default() -> Self {
        Self {
            user: default_esxi_user(),
            password: None,
            ssh_port: default_ssh_port(),
            ssh_binary: default_ssh_binary(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            primary_nic: default_primary_nic(),
            secondary_nic: default_secondary_nic(),
            vswitch: default_vswitch(),
            networks: BTreeMap::new(),
        }
    }
}

impl EsxNetConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> NetCfgResult<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                NetCfgError::invalid_config(
                    path.display().to_string(),
                    format!("failed to parse: {}", e),
                )
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Config file {} not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(NetCfgError::invalid_config(
                path.display().to_string(),
                format!("failed to read: {}", e),
            )),
        }
    }

    /// Get task wait deadline as Duration
    pub fn task_timeout(&self) -> Option<Duration> {
        self.wait.timeout_secs.map(Duration::from_secs)
    }

    /// Parsed VLAN mapping
    pub fn vlan_mapping(&self) -> NetCfgResult<VlanMapping> {
        VlanMapping::from_table(&self.network.networks)
    }

    /// Target for `host` using the configured NICs and switch
    pub fn target(&self, host: impl Into<String>) -> HostTarget {
        HostTarget::new(
            host,
            &self.network.primary_nic,
            &self.network.secondary_nic,
            &self.network.vswitch,
        )
    }

    /// Validate configuration
    pub fn validate(&self) -> NetCfgResult<()> {
        if self.network.primary_nic.trim().is_empty() {
            return Err(NetCfgError::invalid_config("primary_nic", "must not be empty"));
        }

        if self.network.secondary_nic.trim().is_empty() {
            return Err(NetCfgError::invalid_config(
                "secondary_nic",
                "must not be empty",
            ));
        }

        if self.network.primary_nic == self.network.secondary_nic {
            return Err(NetCfgError::invalid_config(
                "secondary_nic",
                format!("must differ from primary_nic '{}'", self.network.primary_nic),
            ));
        }

        if self.network.vswitch.trim().is_empty() {
            return Err(NetCfgError::invalid_config("vswitch", "must not be empty"));
        }

        if self.esxi.ssh_port == 0 {
            return Err(NetCfgError::invalid_config("ssh_port", "must be > 0"));
        }

        if self.wait.timeout_secs == Some(0) {
            return Err(NetCfgError::invalid_config("timeout_secs", "must be > 0"));
        }

        self.vlan_mapping()?;

        Ok(())
    }
}
