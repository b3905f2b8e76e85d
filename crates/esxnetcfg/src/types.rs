//! Type definitions for esxnetcfg

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

use esxnet_common::{NetCfgError, NetCfgResult};

/// Port capacity of the standard switch built by a migration
pub const VSWITCH_NUM_PORTS: u32 = 128;

/// Highest valid 802.1Q VLAN ID
pub const MAX_VLAN_ID: u16 = 4095;

/// Host, NIC pair and switch name an audit or migration is about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostTarget {
    /// Host name as registered in vCenter
    pub host: String,
    /// First physical NIC (e.g. "vmnic4")
    pub primary_nic: String,
    /// Second physical NIC (e.g. "vmnic5")
    pub secondary_nic: String,
    /// Name of the standard switch to build
    pub vswitch: String,
}

impl HostTarget {
    /// Creates a new target
    pub fn new(
        host: impl Into<String>,
        primary_nic: impl Into<String>,
        secondary_nic: impl Into<String>,
        vswitch: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            primary_nic: primary_nic.into(),
            secondary_nic: secondary_nic.into(),
            vswitch: vswitch.into(),
        }
    }

    /// Both NICs, primary first
    pub fn nics(&self) -> Vec<String> {
        vec![self.primary_nic.clone(), self.secondary_nic.clone()]
    }
}

/// Snapshot of a host's network state
///
/// A snapshot is never updated in place; every audit captures a new one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostNetworkFacts {
    /// Host the facts were captured from
    pub host: String,
    /// NSX uplink interface bound to the primary NIC
    pub vmk_interface_primary: Option<String>,
    /// NSX uplink interface bound to the secondary NIC
    pub vmk_interface_secondary: Option<String>,
    /// Bond backing the primary NIC
    pub bond_primary: Option<String>,
    /// Bond backing the secondary NIC
    pub bond_secondary: Option<String>,
    /// Address of the primary uplink interface
    pub vmk_primary_ip: Option<Ipv4Addr>,
    /// Netmask of the primary uplink interface
    pub vmk_primary_subnet: Option<Ipv4Addr>,
    /// Address of the secondary uplink interface
    pub vmk_secondary_ip: Option<Ipv4Addr>,
    /// Netmask of the secondary uplink interface
    pub vmk_secondary_subnet: Option<Ipv4Addr>,
    /// True if a standard switch with the target name exists
    pub vswitch_configured: bool,
    /// Names of all standard switches on the host
    pub vswitches: Vec<String>,
}

/// Classified network topology of a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkProfile {
    /// Both NICs under NSX control, no standard switch
    Sdn,
    /// One NIC under NSX control, standard switch present
    Split,
    /// No NIC under NSX control, standard switch present
    Physical,
    /// Any other combination
    Unknown,
}

impl NetworkProfile {
    /// Returns the profile name
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkProfile::Sdn => "sdn",
            NetworkProfile::Split => "split",
            NetworkProfile::Physical => "physical",
            NetworkProfile::Unknown => "unknown",
        }
    }
}

impl fmt::Display for NetworkProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered VLAN ID to port group name mapping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VlanMapping {
    entries: Vec<(u16, String)>,
}

impl VlanMapping {
    /// Creates an empty mapping
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a mapping from pairs, keeping their order
    pub fn from_pairs<I, S>(pairs: I) -> NetCfgResult<Self>
    where
        I: IntoIterator<Item = (u16, S)>,
        S: Into<String>,
    {
        let mut mapping = Self::new();
        for (vlan_id, name) in pairs {
            mapping.insert(vlan_id, name)?;
        }
        Ok(mapping)
    }

    /// Builds a mapping from a table keyed by VLAN ID text, as found in
    /// TOML files
    pub fn from_table(table: &BTreeMap<String, String>) -> NetCfgResult<Self> {
        let mut pairs = Vec::with_capacity(table.len());
        for (key, name) in table {
            let vlan_id = parse_vlan_id(key)?;
            pairs.push((vlan_id, name.clone()));
        }
        // Numeric order, not the lexical order of the keys
        pairs.sort_by_key(|(vlan_id, _)| *vlan_id);
        Self::from_pairs(pairs)
    }

    /// Appends an entry
    pub fn insert(&mut self, vlan_id: u16, name: impl Into<String>) -> NetCfgResult<()> {
        let name = name.into();
        if vlan_id > MAX_VLAN_ID {
            return Err(NetCfgError::invalid_config(
                "networks",
                format!("VLAN ID {} out of range 0-{}", vlan_id, MAX_VLAN_ID),
            ));
        }
        if name.trim().is_empty() {
            return Err(NetCfgError::invalid_config(
                "networks",
                format!("empty port group name for VLAN {}", vlan_id),
            ));
        }
        if self.contains(vlan_id) {
            return Err(NetCfgError::invalid_config(
                "networks",
                format!("duplicate VLAN ID {}", vlan_id),
            ));
        }
        self.entries.push((vlan_id, name));
        Ok(())
    }

    /// Parses one "ID=NAME" entry
    pub fn parse_entry(s: &str) -> NetCfgResult<(u16, String)> {
        let (id, name) = s.split_once('=').ok_or_else(|| {
            NetCfgError::invalid_config("networks", format!("expected ID=NAME, got '{}'", s))
        })?;
        let vlan_id = parse_vlan_id(id)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(NetCfgError::invalid_config(
                "networks",
                format!("empty port group name in '{}'", s),
            ));
        }
        Ok((vlan_id, name.to_string()))
    }

    /// Returns true if the VLAN is mapped
    pub fn contains(&self, vlan_id: u16) -> bool {
        self.entries.iter().any(|(id, _)| *id == vlan_id)
    }

    /// Port group name for a VLAN
    pub fn name(&self, vlan_id: u16) -> Option<&str> {
        self.entries
            .iter()
            .find(|(id, _)| *id == vlan_id)
            .map(|(_, name)| name.as_str())
    }

    /// Entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (u16, &str)> {
        self.entries.iter().map(|(id, name)| (*id, name.as_str()))
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_vlan_id(s: &str) -> NetCfgResult<u16> {
    let vlan_id: u16 = s.trim().parse().map_err(|_| {
        NetCfgError::invalid_config("networks", format!("invalid VLAN ID '{}'", s.trim()))
    })?;
    if vlan_id > MAX_VLAN_ID {
        return Err(NetCfgError::invalid_config(
            "networks",
            format!("VLAN ID {} out of range 0-{}", vlan_id, MAX_VLAN_ID),
        ));
    }
    Ok(vlan_id)
}

/// Standard switch to create
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualSwitchSpec {
    /// Switch name
    pub name: String,
    /// Physical NICs bound as uplinks
    pub nics: Vec<String>,
    /// Port capacity
    pub num_ports: u32,
}

impl VirtualSwitchSpec {
    /// Switch spec for a migration target: both NICs, 128 ports
    pub fn for_target(target: &HostTarget) -> Self {
        Self {
            name: target.vswitch.clone(),
            nics: target.nics(),
            num_ports: VSWITCH_NUM_PORTS,
        }
    }
}

/// Port group security policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityPolicy {
    /// Allow promiscuous mode
    pub allow_promiscuous: bool,
    /// Allow forged transmits
    pub forged_transmits: bool,
    /// Allow MAC address changes
    pub mac_changes: bool,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            allow_promiscuous: false,
            forged_transmits: true,
            mac_changes: true,
        }
    }
}

/// VLAN tagged port group to create
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortGroupSpec {
    /// Switch the port group is added to
    pub vswitch: String,
    /// VLAN ID
    pub vlan_id: u16,
    /// Port group name
    pub name: String,
    /// Security policy
    pub security: SecurityPolicy,
}

impl PortGroupSpec {
    /// Creates a port group spec with the default security policy
    pub fn new(vswitch: impl Into<String>, vlan_id: u16, name: impl Into<String>) -> Self {
        Self {
            vswitch: vswitch.into(),
            vlan_id,
            name: name.into(),
            security: SecurityPolicy::default(),
        }
    }
}

/// Whether the NSX gateway answered from one uplink interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UplinkReachability {
    /// Uplink interface the pings were sent from
    pub vmk: String,
    /// True if no packet was lost
    pub reachable: bool,
}

/// Outcome of an NSX gateway check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayCheck {
    pub host: String,
    /// NSX gateway type (e.g. "tunneling")
    pub gateway_type: String,
    /// Currently active default gateway, if NSX reports one
    pub gateway: Option<Ipv4Addr>,
    /// One entry per distinct uplink interface, primary first
    pub uplinks: Vec<UplinkReachability>,
}

impl GatewayCheck {
    /// Creates a check without uplink results
    pub fn new(
        host: impl Into<String>,
        gateway_type: impl Into<String>,
        gateway: Option<Ipv4Addr>,
    ) -> Self {
        Self {
            host: host.into(),
            gateway_type: gateway_type.into(),
            gateway,
            uplinks: Vec::new(),
        }
    }

    /// Returns true if a gateway exists and every uplink interface reaches it.
    /// A host without uplink interfaces is never healthy.
    pub fn healthy(&self) -> bool {
        self.gateway.is_some()
            && !self.uplinks.is_empty()
            && self.uplinks.iter().all(|u| u.reachable)
    }
}
