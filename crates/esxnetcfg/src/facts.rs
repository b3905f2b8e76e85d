//! Host fact collection

use tracing::{debug, instrument, warn};

use esxnet_common::NetCfgResult;

use crate::gateway::HostGateway;
use crate::types::{HostNetworkFacts, HostTarget};

/// Captures a fresh facts snapshot for `target`.
///
/// A failed bond, uplink interface, address or netmask lookup is treated as
/// absent. A failure to list the standard switches is returned, since
/// "no switches" would be a wrong answer rather than an unknown one. Losing
/// the host itself ([`esxnet_common::NetCfgError::is_fatal`]) fails the capture.
#[instrument(skip(gateway), fields(host = %target.host))]
pub async fn capture(
    gateway: &dyn HostGateway,
    target: &HostTarget,
) -> NetCfgResult<HostNetworkFacts> {
    let host = target.host.as_str();

    let bond_primary = lookup(
        "bond",
        &target.primary_nic,
        gateway.bond_for_nic(host, &target.primary_nic).await,
    )?;
    let bond_secondary = lookup(
        "bond",
        &target.secondary_nic,
        gateway.bond_for_nic(host, &target.secondary_nic).await,
    )?;
    let vmk_interface_primary = lookup(
        "vmk",
        &target.primary_nic,
        gateway.vmk_for_nic(host, &target.primary_nic).await,
    )?;
    let vmk_interface_secondary = lookup(
        "vmk",
        &target.secondary_nic,
        gateway.vmk_for_nic(host, &target.secondary_nic).await,
    )?;

    let (vmk_primary_ip, vmk_primary_subnet) = match &vmk_interface_primary {
        Some(vmk) => (
            lookup("ip", vmk, gateway.vmk_ip(host, vmk).await)?,
            lookup("subnet", vmk, gateway.vmk_subnet(host, vmk).await)?,
        ),
        None => (None, None),
    };
    let (vmk_secondary_ip, vmk_secondary_subnet) = match &vmk_interface_secondary {
        Some(vmk) => (
            lookup("ip", vmk, gateway.vmk_ip(host, vmk).await)?,
            lookup("subnet", vmk, gateway.vmk_subnet(host, vmk).await)?,
        ),
        None => (None, None),
    };

    let vswitches = gateway.list_vswitches(host).await?;
    let vswitch_configured = vswitches.iter().any(|name| name == &target.vswitch);
    if vswitch_configured {
        debug!(vswitch = %target.vswitch, "Standard switch found");
    } else {
        debug!(vswitch = %target.vswitch, found = ?vswitches, "Standard switch not found");
    }

    Ok(HostNetworkFacts {
        host: target.host.clone(),
        vmk_interface_primary,
        vmk_interface_secondary,
        bond_primary,
        bond_secondary,
        vmk_primary_ip,
        vmk_primary_subnet,
        vmk_secondary_ip,
        vmk_secondary_subnet,
        vswitch_configured,
        vswitches,
    })
}

fn lookup<T: std::fmt::Debug>(
    fact: &str,
    subject: &str,
    result: NetCfgResult<Option<T>>,
) -> NetCfgResult<Option<T>> {
    match result {
        Ok(value) => {
            debug!(fact, subject, value = ?value, "Fact lookup");
            Ok(value)
        }
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            warn!(fact, subject, error = %e, "Fact lookup failed, treating as absent");
            Ok(None)
        }
    }
}
