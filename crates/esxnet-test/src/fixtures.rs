//! Host layouts used across the migration scenarios
//!
//! Every fixture uses the default NICs (`vmnic4`, `vmnic5`) and switch name
//! (`vswitch_prod`) so one [`target`] fits all of them.

use std::net::Ipv4Addr;

use esxnet_common::NetCfgResult;
use esxnetcfg::{HostNetworkFacts, HostTarget, VlanMapping, DEFAULT_GATEWAY_TYPE};

use crate::simulated::SimulatedHost;

/// Host name used by the fixtures
pub const HOST: &str = "esx01.example.com";
/// Primary NIC
pub const PRIMARY_NIC: &str = "vmnic4";
/// Secondary NIC
pub const SECONDARY_NIC: &str = "vmnic5";
/// Target switch
pub const VSWITCH: &str = "vswitch_prod";
/// Management switch present on every host
pub const MGMT_VSWITCH: &str = "vSwitch0";

pub const PRIMARY_IP: Ipv4Addr = Ipv4Addr::new(10, 20, 0, 11);
pub const SECONDARY_IP: Ipv4Addr = Ipv4Addr::new(10, 20, 1, 11);
pub const NETMASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);
/// NSX tunneling gateway, inside the primary uplink's subnet only
pub const TUNNEL_GATEWAY: Ipv4Addr = Ipv4Addr::new(10, 20, 0, 1);

/// Migration target for [`HOST`]
pub fn target() -> HostTarget {
    HostTarget::new(HOST, PRIMARY_NIC, SECONDARY_NIC, VSWITCH)
}

/// Two port groups, VLAN 10 and 20
pub fn networks() -> NetCfgResult<VlanMapping> {
    VlanMapping::from_pairs([(10, "net-a"), (20, "net-b")])
}

/// Both NICs in their own NSX bond with an addressed uplink interface
pub fn sdn_host() -> SimulatedHost {
    SimulatedHost::new()
        .with_bond(PRIMARY_NIC, "bond0")
        .with_bond(SECONDARY_NIC, "bond1")
        .with_vmk(PRIMARY_NIC, "vmk10", PRIMARY_IP, NETMASK)
        .with_vmk(SECONDARY_NIC, "vmk11", SECONDARY_IP, NETMASK)
        .with_gateway(DEFAULT_GATEWAY_TYPE, TUNNEL_GATEWAY)
        .with_vswitch(MGMT_VSWITCH, &["vmnic0"])
}

/// Both NICs are uplinks of the target switch
pub fn physical_host() -> SimulatedHost {
    SimulatedHost::new()
        .with_vswitch(MGMT_VSWITCH, &["vmnic0"])
        .with_vswitch(VSWITCH, &[PRIMARY_NIC, SECONDARY_NIC])
}

/// Primary NIC under NSX, secondary NIC an uplink of the target switch
pub fn split_host() -> SimulatedHost {
    SimulatedHost::new()
        .with_bond(PRIMARY_NIC, "bond0")
        .with_vmk(PRIMARY_NIC, "vmk10", PRIMARY_IP, NETMASK)
        .with_vswitch(MGMT_VSWITCH, &["vmnic0"])
        .with_vswitch(VSWITCH, &[SECONDARY_NIC])
}

/// Both NICs in one bond, one uplink interface
pub fn shared_bond_host() -> SimulatedHost {
    SimulatedHost::new()
        .with_bond(PRIMARY_NIC, "bond0")
        .with_bond(SECONDARY_NIC, "bond0")
        .with_vmk(PRIMARY_NIC, "vmk10", PRIMARY_IP, NETMASK)
        .with_gateway(DEFAULT_GATEWAY_TYPE, TUNNEL_GATEWAY)
        .with_vswitch(MGMT_VSWITCH, &["vmnic0"])
}

/// Neither NSX state nor the target switch
pub fn bare_host() -> SimulatedHost {
    SimulatedHost::new().with_vswitch(MGMT_VSWITCH, &["vmnic0"])
}

/// Facts an audit of [`sdn_host`] captures
pub fn sdn_facts() -> HostNetworkFacts {
    HostNetworkFacts {
        host: HOST.to_string(),
        vmk_interface_primary: Some("vmk10".to_string()),
        vmk_interface_secondary: Some("vmk11".to_string()),
        bond_primary: Some("bond0".to_string()),
        bond_secondary: Some("bond1".to_string()),
        vmk_primary_ip: Some(PRIMARY_IP),
        vmk_primary_subnet: Some(NETMASK),
        vmk_secondary_ip: Some(SECONDARY_IP),
        vmk_secondary_subnet: Some(NETMASK),
        vswitch_configured: false,
        vswitches: vec![MGMT_VSWITCH.to_string()],
    }
}

/// Facts an audit of [`physical_host`] captures
pub fn physical_facts() -> HostNetworkFacts {
    HostNetworkFacts {
        host: HOST.to_string(),
        vswitch_configured: true,
        vswitches: vec![MGMT_VSWITCH.to_string(), VSWITCH.to_string()],
        ..Default::default()
    }
}

/// Facts an audit of [`split_host`] captures
pub fn split_facts() -> HostNetworkFacts {
    HostNetworkFacts {
        host: HOST.to_string(),
        vmk_interface_primary: Some("vmk10".to_string()),
        bond_primary: Some("bond0".to_string()),
        vmk_primary_ip: Some(PRIMARY_IP),
        vmk_primary_subnet: Some(NETMASK),
        vswitch_configured: true,
        vswitches: vec![MGMT_VSWITCH.to_string(), VSWITCH.to_string()],
        ..Default::default()
    }
}
