//! Simulated ESXi host and gateway
//!
//! [`SimulatedHost`] models the parts of a host the migration touches: NSX
//! bonds and uplink interfaces per NIC, standard switches, port groups and
//! the NSX default gateways.
//! [`SimulatedGateway`] implements [`HostGateway`] on top of it. Mutations
//! run as tasks on a [`LocalTaskCollector`] and change the facts later
//! queries return. Every call is recorded and failures can be injected per
//! operation.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::debug;

use esxnet_common::{NetCfgError, NetCfgResult};
use esxnet_tasks::{LocalTaskCollector, PropertyCollector, RemoteTaskHandle};
use esxnetcfg::{HostGateway, PortGroupSpec, VirtualSwitchSpec};

/// Network state of a simulated host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatedHost {
    /// NIC -> bond
    pub bonds: BTreeMap<String, String>,
    /// NIC -> NSX uplink interface
    pub vmks: BTreeMap<String, String>,
    /// Uplink interface -> (address, netmask)
    pub addresses: BTreeMap<String, (Ipv4Addr, Ipv4Addr)>,
    /// Connected uplink interfaces
    pub connected_uplinks: BTreeSet<String>,
    /// Standard switches by name
    pub vswitches: BTreeMap<String, VirtualSwitchSpec>,
    /// Port groups in creation order
    pub port_groups: Vec<PortGroupSpec>,
    /// NSX gateway type -> active default gateway
    pub gateways: BTreeMap<String, Ipv4Addr>,
}

impl SimulatedHost {
    /// Creates a host without NSX state or switches
    pub fn new() -> Self {
        Self::default()
    }

    /// Puts a NIC into a bond
    pub fn with_bond(mut self, nic: &str, bond: &str) -> Self {
        self.bonds.insert(nic.to_string(), bond.to_string());
        self
    }

    /// Binds an addressed uplink interface to a NIC
    pub fn with_vmk(mut self, nic: &str, vmk: &str, ip: Ipv4Addr, subnet: Ipv4Addr) -> Self {
        self.vmks.insert(nic.to_string(), vmk.to_string());
        self.addresses.insert(vmk.to_string(), (ip, subnet));
        self
    }

    /// Adds a standard switch
    pub fn with_vswitch(mut self, name: &str, nics: &[&str]) -> Self {
        self.vswitches.insert(
            name.to_string(),
            VirtualSwitchSpec {
                name: name.to_string(),
                nics: nics.iter().map(|n| n.to_string()).collect(),
                num_ports: esxnetcfg::VSWITCH_NUM_PORTS,
            },
        );
        self
    }

    /// Sets the active default gateway of an NSX gateway type
    pub fn with_gateway(mut self, gateway_type: &str, gateway: Ipv4Addr) -> Self {
        self.gateways.insert(gateway_type.to_string(), gateway);
        self
    }

    /// Port group by name
    pub fn port_group(&self, name: &str) -> Option<&PortGroupSpec> {
        self.port_groups.iter().find(|pg| pg.name == name)
    }

    fn has_vmk(&self, vmk: &str) -> bool {
        self.vmks.values().any(|v| v == vmk)
    }

    /// An uplink interface reaches a gateway inside its own subnet
    fn reaches(&self, vmk: &str, gateway: Ipv4Addr) -> bool {
        if !self.has_vmk(vmk) {
            return false;
        }
        match self.addresses.get(vmk) {
            Some((ip, subnet)) => {
                let mask = u32::from(*subnet);
                u32::from(*ip) & mask == u32::from(gateway) & mask
            }
            None => false,
        }
    }

    fn switch_using(&self, nic: &str) -> Option<&str> {
        self.vswitches
            .values()
            .find(|s| s.nics.iter().any(|n| n == nic))
            .map(|s| s.name.as_str())
    }

    /// Applies a mutation the way the host would
    fn apply(&mut self, call: &GatewayCall) -> Result<(), String> {
        match call {
            GatewayCall::DestroyBond { bond } => {
                let nics: Vec<String> = self
                    .bonds
                    .iter()
                    .filter(|(_, b)| *b == bond)
                    .map(|(nic, _)| nic.clone())
                    .collect();
                if nics.is_empty() {
                    return Err(format!("bond {} not found", bond));
                }
                for nic in &nics {
                    self.bonds.remove(nic);
                    if let Some(vmk) = self.vmks.remove(nic) {
                        self.addresses.remove(&vmk);
                        self.connected_uplinks.remove(&vmk);
                    }
                }
                Ok(())
            }
            GatewayCall::DeleteSwitch { name } => {
                if self.vswitches.remove(name).is_none() {
                    return Err(format!("vswitch {} not found", name));
                }
                self.port_groups.retain(|pg| &pg.vswitch != name);
                Ok(())
            }
            GatewayCall::CreateSwitch(spec) => {
                if self.vswitches.contains_key(&spec.name) {
                    return Err(format!("vswitch {} already exists", spec.name));
                }
                for nic in &spec.nics {
                    if let Some(bond) = self.bonds.get(nic) {
                        return Err(format!("{} is claimed by bond {}", nic, bond));
                    }
                    if let Some(other) = self.switch_using(nic) {
                        return Err(format!("{} is an uplink of {}", nic, other));
                    }
                }
                self.vswitches.insert(spec.name.clone(), spec.clone());
                Ok(())
            }
            GatewayCall::CreatePortGroup(spec) => {
                if !self.vswitches.contains_key(&spec.vswitch) {
                    return Err(format!("vswitch {} not found", spec.vswitch));
                }
                if self.port_group(&spec.name).is_some() {
                    return Err(format!("port group {} already exists", spec.name));
                }
                self.port_groups.push(spec.clone());
                Ok(())
            }
            GatewayCall::CreateBond { bond, uplinks } => {
                for nic in uplinks {
                    if let Some(other) = self.switch_using(nic) {
                        return Err(format!("{} is an uplink of {}", nic, other));
                    }
                }
                for nic in uplinks {
                    self.bonds.insert(nic.clone(), bond.clone());
                }
                Ok(())
            }
            GatewayCall::SetUplinkIp { vmk, ip, subnet } => {
                if !self.has_vmk(vmk) {
                    return Err(format!("uplink {} not found", vmk));
                }
                self.addresses.insert(vmk.clone(), (*ip, *subnet));
                Ok(())
            }
            GatewayCall::ConnectUplink { vmk } => {
                if !self.has_vmk(vmk) {
                    return Err(format!("uplink {} not found", vmk));
                }
                self.connected_uplinks.insert(vmk.clone());
                Ok(())
            }
            other => Err(format!("{} is not a mutation", other.key())),
        }
    }
}

/// A recorded gateway call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    Connect { host: String },
    BondForNic { nic: String },
    VmkForNic { nic: String },
    VmkIp { vmk: String },
    VmkSubnet { vmk: String },
    ListVswitches,
    NsxGateway { gateway_type: String },
    PingGateway { vmk: String, gateway: Ipv4Addr },
    DeleteSwitch { name: String },
    CreateSwitch(VirtualSwitchSpec),
    CreatePortGroup(PortGroupSpec),
    DestroyBond { bond: String },
    CreateBond { bond: String, uplinks: Vec<String> },
    SetUplinkIp { vmk: String, ip: Ipv4Addr, subnet: Ipv4Addr },
    ConnectUplink { vmk: String },
}

impl GatewayCall {
    /// Key used for failure injection and call assertions
    /// (e.g. "destroy_bond:bond0", "list_vswitches")
    pub fn key(&self) -> String {
        match self {
            GatewayCall::Connect { .. } => "connect".to_string(),
            GatewayCall::BondForNic { nic } => format!("bond_for_nic:{}", nic),
            GatewayCall::VmkForNic { nic } => format!("vmk_for_nic:{}", nic),
            GatewayCall::VmkIp { vmk } => format!("vmk_ip:{}", vmk),
            GatewayCall::VmkSubnet { vmk } => format!("vmk_subnet:{}", vmk),
            GatewayCall::ListVswitches => "list_vswitches".to_string(),
            GatewayCall::NsxGateway { gateway_type } => format!("nsx_gateway:{}", gateway_type),
            GatewayCall::PingGateway { vmk, .. } => format!("ping_gateway:{}", vmk),
            GatewayCall::DeleteSwitch { name } => format!("delete_switch:{}", name),
            GatewayCall::CreateSwitch(spec) => format!("create_switch:{}", spec.name),
            GatewayCall::CreatePortGroup(spec) => format!("create_port_group:{}", spec.name),
            GatewayCall::DestroyBond { bond } => format!("destroy_bond:{}", bond),
            GatewayCall::CreateBond { bond, .. } => format!("create_bond:{}", bond),
            GatewayCall::SetUplinkIp { vmk, .. } => format!("set_uplink_ip:{}", vmk),
            GatewayCall::ConnectUplink { vmk } => format!("connect_uplink:{}", vmk),
        }
    }

    /// Returns true for calls that change host state
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            GatewayCall::DeleteSwitch { .. }
                | GatewayCall::CreateSwitch(_)
                | GatewayCall::CreatePortGroup(_)
                | GatewayCall::DestroyBond { .. }
                | GatewayCall::CreateBond { .. }
                | GatewayCall::SetUplinkIp { .. }
                | GatewayCall::ConnectUplink { .. }
        )
    }
}

/// Where an injected failure strikes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// The call itself returns an error (queries and submissions)
    Submit,
    /// The submission is accepted and the task ends in error
    Task,
    /// The submission is accepted and the task never finishes
    Hang,
    /// The host stops answering; the call fails with a connection error
    Unreachable,
}

#[derive(Debug, Clone)]
struct Failure {
    mode: FailureMode,
    message: String,
}

/// [`HostGateway`] over a [`SimulatedHost`]
pub struct SimulatedGateway {
    host: Arc<Mutex<SimulatedHost>>,
    collector: Arc<LocalTaskCollector>,
    calls: Mutex<Vec<GatewayCall>>,
    failures: Mutex<HashMap<String, Failure>>,
}

impl SimulatedGateway {
    /// Creates a gateway for `host`
    pub fn new(host: SimulatedHost) -> Self {
        Self {
            host: Arc::new(Mutex::new(host)),
            collector: Arc::new(LocalTaskCollector::new()),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a shareable gateway for `host`
    pub fn shared(host: SimulatedHost) -> Arc<Self> {
        Arc::new(Self::new(host))
    }

    /// Injects a failure for the call with the given key
    pub fn fail_on(&self, key: &str, mode: FailureMode, message: &str) {
        self.failures.lock().insert(
            key.to_string(),
            Failure {
                mode,
                message: message.to_string(),
            },
        );
    }

    /// Current host state
    pub fn snapshot(&self) -> SimulatedHost {
        self.host.lock().clone()
    }

    /// All recorded calls in order
    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().clone()
    }

    /// Recorded mutation calls in order
    pub fn mutations(&self) -> Vec<GatewayCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.is_mutation())
            .cloned()
            .collect()
    }

    /// Forgets recorded calls
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// The in-process collector behind the task handles
    pub fn local_collector(&self) -> &Arc<LocalTaskCollector> {
        &self.collector
    }

    fn record(&self, call: GatewayCall) -> Option<Failure> {
        let failure = self.failures.lock().get(&call.key()).cloned();
        self.calls.lock().push(call);
        failure
    }

    fn query<T>(&self, call: GatewayCall, read: impl FnOnce(&SimulatedHost) -> T) -> NetCfgResult<T> {
        let key = call.key();
        match self.record(call) {
            Some(Failure {
                mode: FailureMode::Unreachable,
                message,
            }) => Err(NetCfgError::connection(key, message)),
            Some(failure) => Err(NetCfgError::fact_lookup(key, failure.message)),
            None => Ok(read(&self.host.lock())),
        }
    }

    fn mutate(&self, call: GatewayCall) -> NetCfgResult<RemoteTaskHandle> {
        let key = call.key();
        let failure = self.record(call.clone());

        match &failure {
            Some(Failure {
                mode: FailureMode::Submit,
                message,
            }) => return Err(NetCfgError::management(key, message.clone())),
            Some(Failure {
                mode: FailureMode::Unreachable,
                message,
            }) => return Err(NetCfgError::connection(key, message.clone())),
            _ => {}
        }

        debug!(operation = %key, "Simulated task submitted");
        let host = Arc::clone(&self.host);
        Ok(self.collector.spawn(key, async move {
            match failure {
                Some(Failure {
                    mode: FailureMode::Task,
                    message,
                }) => Err(message),
                Some(Failure {
                    mode: FailureMode::Hang,
                    ..
                }) => std::future::pending().await,
                _ => {
                    let result = host.lock().apply(&call);
                    result
                }
            }
        }))
    }
}

#[async_trait]
impl HostGateway for SimulatedGateway {
    async fn connect(&self, host: &str) -> NetCfgResult<()> {
        match self.record(GatewayCall::Connect {
            host: host.to_string(),
        }) {
            Some(failure) => Err(NetCfgError::connection(host, failure.message)),
            None => Ok(()),
        }
    }

    async fn bond_for_nic(&self, _host: &str, nic: &str) -> NetCfgResult<Option<String>> {
        self.query(
            GatewayCall::BondForNic {
                nic: nic.to_string(),
            },
            |h| h.bonds.get(nic).cloned(),
        )
    }

    async fn vmk_for_nic(&self, _host: &str, nic: &str) -> NetCfgResult<Option<String>> {
        self.query(
            GatewayCall::VmkForNic {
                nic: nic.to_string(),
            },
            |h| h.vmks.get(nic).cloned(),
        )
    }

    async fn vmk_ip(&self, _host: &str, vmk: &str) -> NetCfgResult<Option<Ipv4Addr>> {
        self.query(
            GatewayCall::VmkIp {
                vmk: vmk.to_string(),
            },
            |h| h.addresses.get(vmk).map(|(ip, _)| *ip),
        )
    }

    async fn vmk_subnet(&self, _host: &str, vmk: &str) -> NetCfgResult<Option<Ipv4Addr>> {
        self.query(
            GatewayCall::VmkSubnet {
                vmk: vmk.to_string(),
            },
            |h| h.addresses.get(vmk).map(|(_, subnet)| *subnet),
        )
    }

    async fn list_vswitches(&self, _host: &str) -> NetCfgResult<Vec<String>> {
        self.query(GatewayCall::ListVswitches, |h| {
            h.vswitches.keys().cloned().collect()
        })
    }

    async fn nsx_gateway(
        &self,
        _host: &str,
        gateway_type: &str,
    ) -> NetCfgResult<Option<Ipv4Addr>> {
        self.query(
            GatewayCall::NsxGateway {
                gateway_type: gateway_type.to_string(),
            },
            |h| h.gateways.get(gateway_type).copied(),
        )
    }

    async fn ping_gateway(&self, _host: &str, vmk: &str, gateway: Ipv4Addr) -> NetCfgResult<bool> {
        self.query(
            GatewayCall::PingGateway {
                vmk: vmk.to_string(),
                gateway,
            },
            |h| h.reaches(vmk, gateway),
        )
    }

    async fn delete_switch(&self, _host: &str, name: &str) -> NetCfgResult<RemoteTaskHandle> {
        self.mutate(GatewayCall::DeleteSwitch {
            name: name.to_string(),
        })
    }

    async fn create_switch(
        &self,
        _host: &str,
        spec: &VirtualSwitchSpec,
    ) -> NetCfgResult<RemoteTaskHandle> {
        self.mutate(GatewayCall::CreateSwitch(spec.clone()))
    }

    async fn create_port_group(
        &self,
        _host: &str,
        spec: &PortGroupSpec,
    ) -> NetCfgResult<RemoteTaskHandle> {
        self.mutate(GatewayCall::CreatePortGroup(spec.clone()))
    }

    async fn destroy_bond(&self, _host: &str, bond: &str) -> NetCfgResult<RemoteTaskHandle> {
        self.mutate(GatewayCall::DestroyBond {
            bond: bond.to_string(),
        })
    }

    async fn create_bond(
        &self,
        _host: &str,
        bond: &str,
        uplinks: &[String],
    ) -> NetCfgResult<RemoteTaskHandle> {
        self.mutate(GatewayCall::CreateBond {
            bond: bond.to_string(),
            uplinks: uplinks.to_vec(),
        })
    }

    async fn set_uplink_ip(
        &self,
        _host: &str,
        vmk: &str,
        ip: Ipv4Addr,
        subnet: Ipv4Addr,
    ) -> NetCfgResult<RemoteTaskHandle> {
        self.mutate(GatewayCall::SetUplinkIp {
            vmk: vmk.to_string(),
            ip,
            subnet,
        })
    }

    async fn connect_uplink(&self, _host: &str, vmk: &str) -> NetCfgResult<RemoteTaskHandle> {
        self.mutate(GatewayCall::ConnectUplink {
            vmk: vmk.to_string(),
        })
    }

    fn collector(&self) -> Arc<dyn PropertyCollector> {
        self.collector.clone()
    }
}
