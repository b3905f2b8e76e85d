//! Host gateway abstraction
//!
//! The gateway answers fact queries about a host and submits configuration
//! mutations. Mutations return a [`RemoteTaskHandle`] whose completion is
//! observed through the gateway's [`PropertyCollector`].

use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::sync::Arc;

use esxnet_common::NetCfgResult;
use esxnet_tasks::{PropertyCollector, RemoteTaskHandle};

use crate::types::{PortGroupSpec, VirtualSwitchSpec};

/// Access to the network configuration of ESXi hosts.
#[async_trait]
pub trait HostGateway: Send + Sync {
    /// Verifies the management endpoint and the host are reachable and the
    /// credentials are accepted.
    async fn connect(&self, host: &str) -> NetCfgResult<()>;

    /// Releases the management session.
    async fn disconnect(&self) -> NetCfgResult<()> {
        Ok(())
    }

    /// Bond backing a physical NIC.
    async fn bond_for_nic(&self, host: &str, nic: &str) -> NetCfgResult<Option<String>>;

    /// NSX uplink interface bound to a physical NIC.
    async fn vmk_for_nic(&self, host: &str, nic: &str) -> NetCfgResult<Option<String>>;

    /// IPv4 address of an uplink interface.
    async fn vmk_ip(&self, host: &str, vmk: &str) -> NetCfgResult<Option<Ipv4Addr>>;

    /// IPv4 netmask of an uplink interface.
    async fn vmk_subnet(&self, host: &str, vmk: &str) -> NetCfgResult<Option<Ipv4Addr>>;

    /// Names of all standard switches.
    async fn list_vswitches(&self, host: &str) -> NetCfgResult<Vec<String>>;

    /// Currently active NSX default gateway of a gateway type
    /// (e.g. "tunneling").
    async fn nsx_gateway(&self, host: &str, gateway_type: &str) -> NetCfgResult<Option<Ipv4Addr>>;

    /// Returns true if `gateway` answers pings sent from an uplink
    /// interface without loss.
    async fn ping_gateway(&self, host: &str, vmk: &str, gateway: Ipv4Addr) -> NetCfgResult<bool>;

    /// Removes a standard switch.
    async fn delete_switch(&self, host: &str, name: &str) -> NetCfgResult<RemoteTaskHandle>;

    /// Creates a standard switch.
    async fn create_switch(
        &self,
        host: &str,
        spec: &VirtualSwitchSpec,
    ) -> NetCfgResult<RemoteTaskHandle>;

    /// Adds a port group to a standard switch.
    async fn create_port_group(
        &self,
        host: &str,
        spec: &PortGroupSpec,
    ) -> NetCfgResult<RemoteTaskHandle>;

    /// Destroys an NSX bond.
    async fn destroy_bond(&self, host: &str, bond: &str) -> NetCfgResult<RemoteTaskHandle>;

    /// Creates an NSX bond over the given uplinks.
    async fn create_bond(
        &self,
        host: &str,
        bond: &str,
        uplinks: &[String],
    ) -> NetCfgResult<RemoteTaskHandle>;

    /// Assigns an address to an uplink interface.
    async fn set_uplink_ip(
        &self,
        host: &str,
        vmk: &str,
        ip: Ipv4Addr,
        subnet: Ipv4Addr,
    ) -> NetCfgResult<RemoteTaskHandle>;

    /// Connects an uplink interface.
    async fn connect_uplink(&self, host: &str, vmk: &str) -> NetCfgResult<RemoteTaskHandle>;

    /// Collector the returned task handles belong to.
    fn collector(&self) -> Arc<dyn PropertyCollector>;
}
