//! Host gateway backed by vCenter and the ESXi shell
//!
//! vCenter is used to authenticate and to resolve the host. Facts are read
//! and mutations applied with `esxcli` and the NSX host tools over SSH.
//! Each mutation runs as a task on a [`LocalTaskCollector`], so callers
//! observe completion through the same collector protocol as any other
//! remote task.

use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use esxnet_common::shell::SSH_CONNECTION_FAILURE;
use esxnet_common::{NetCfgError, NetCfgResult, RemoteShell, SshTarget};
use esxnet_tasks::{LocalTaskCollector, PropertyCollector, RemoteTaskHandle};

use crate::commands::{
    build_bond_for_nic_cmd, build_connect_uplink_cmd, build_create_bond_cmd,
    build_create_port_group_cmd, build_create_vswitch_cmd, build_delete_vswitch_cmd,
    build_destroy_bond_cmd, build_list_vswitches_cmd, build_set_uplink_ip_cmd,
    build_nsx_gateway_cmd, build_vmk_for_nic_cmd, build_vmk_ip_cmd, build_vmk_subnet_cmd,
    build_vmkping_cmd, first_value, parse_packet_loss, parse_vswitch_names,
};
use crate::gateway::HostGateway;
use crate::types::{PortGroupSpec, VirtualSwitchSpec};
use crate::vcenter::VcenterSession;

/// [`HostGateway`] for real ESXi hosts
pub struct EsxHostGateway {
    session: VcenterSession,
    /// Login settings; the host is filled in per call
    ssh: SshTarget,
    collector: Arc<LocalTaskCollector>,
}

impl EsxHostGateway {
    /// Creates a gateway using `session` for management calls and `ssh`
    /// (whose host field is ignored) for shell logins.
    pub fn new(session: VcenterSession, ssh: SshTarget) -> Self {
        Self {
            session,
            ssh,
            collector: Arc::new(LocalTaskCollector::new()),
        }
    }

    fn shell(&self, host: &str) -> RemoteShell {
        RemoteShell::new(SshTarget {
            host: host.to_string(),
            ..self.ssh.clone()
        })
    }

    /// Runs a lookup; empty output means the fact is absent
    async fn query(&self, host: &str, fact: &str, cmd: &str) -> NetCfgResult<Option<String>> {
        let result = self.shell(host).exec(cmd).await?;
        if result.exit_code == SSH_CONNECTION_FAILURE {
            return Err(NetCfgError::connection(host, result.combined_output()));
        }
        if !result.success() {
            return Err(NetCfgError::fact_lookup(
                fact,
                format!("exit code {}: {}", result.exit_code, result.combined_output()),
            ));
        }
        Ok(first_value(&result.stdout))
    }

    async fn query_addr(
        &self,
        host: &str,
        fact: &str,
        cmd: &str,
    ) -> NetCfgResult<Option<Ipv4Addr>> {
        match self.query(host, fact, cmd).await? {
            Some(text) => text.parse().map(Some).map_err(|_| {
                NetCfgError::fact_lookup(fact, format!("not an IPv4 address: '{}'", text))
            }),
            None => Ok(None),
        }
    }

    /// Starts a shell command as a task and returns its handle
    fn submit(&self, host: &str, description: String, cmd: String) -> RemoteTaskHandle {
        let shell = self.shell(host);
        debug!(host, command = %cmd, "Submitting task");
        self.collector.spawn(description, async move {
            shell
                .exec_or_throw(&cmd)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string())
        })
    }
}

#[async_trait]
impl HostGateway for EsxHostGateway {
    #[instrument(skip(self))]
    async fn connect(&self, host: &str) -> NetCfgResult<()> {
        self.session.login().await?;
        let summary = self.session.find_host(host).await?;
        info!(
            "Found ESXi host {} ({}) in vCenter {}",
            summary.name,
            summary.host,
            self.session.base_url()
        );
        self.shell(host).probe().await
    }

    async fn disconnect(&self) -> NetCfgResult<()> {
        self.session.logout().await
    }

    async fn bond_for_nic(&self, host: &str, nic: &str) -> NetCfgResult<Option<String>> {
        self.query(host, &format!("bond of {}", nic), &build_bond_for_nic_cmd(nic))
            .await
    }

    async fn vmk_for_nic(&self, host: &str, nic: &str) -> NetCfgResult<Option<String>> {
        self.query(host, &format!("vmk of {}", nic), &build_vmk_for_nic_cmd(nic))
            .await
    }

    async fn vmk_ip(&self, host: &str, vmk: &str) -> NetCfgResult<Option<Ipv4Addr>> {
        self.query_addr(host, &format!("address of {}", vmk), &build_vmk_ip_cmd(vmk))
            .await
    }

    async fn vmk_subnet(&self, host: &str, vmk: &str) -> NetCfgResult<Option<Ipv4Addr>> {
        self.query_addr(host, &format!("netmask of {}", vmk), &build_vmk_subnet_cmd(vmk))
            .await
    }

    async fn list_vswitches(&self, host: &str) -> NetCfgResult<Vec<String>> {
        let output = self
            .shell(host)
            .exec_or_throw(&build_list_vswitches_cmd())
            .await?;
        Ok(parse_vswitch_names(&output))
    }

    async fn nsx_gateway(&self, host: &str, gateway_type: &str) -> NetCfgResult<Option<Ipv4Addr>> {
        self.query_addr(
            host,
            &format!("{} gateway", gateway_type),
            &build_nsx_gateway_cmd(gateway_type),
        )
        .await
    }

    async fn ping_gateway(&self, host: &str, vmk: &str, gateway: Ipv4Addr) -> NetCfgResult<bool> {
        // vmkping exits non-zero when nothing comes back; read the summary instead
        let result = self
            .shell(host)
            .exec(&build_vmkping_cmd(vmk, gateway))
            .await?;
        if result.exit_code == SSH_CONNECTION_FAILURE {
            return Err(NetCfgError::connection(host, result.combined_output()));
        }
        match parse_packet_loss(&result.stdout) {
            Some(loss) => {
                debug!(host, vmk, %gateway, loss, "Gateway ping finished");
                Ok(loss == 0.0)
            }
            None => {
                warn!(
                    host,
                    vmk,
                    %gateway,
                    "No ping summary: {}",
                    result.combined_output()
                );
                Ok(false)
            }
        }
    }

    async fn delete_switch(&self, host: &str, name: &str) -> NetCfgResult<RemoteTaskHandle> {
        Ok(self.submit(
            host,
            format!("delete vswitch {}", name),
            build_delete_vswitch_cmd(name),
        ))
    }

    async fn create_switch(
        &self,
        host: &str,
        spec: &VirtualSwitchSpec,
    ) -> NetCfgResult<RemoteTaskHandle> {
        Ok(self.submit(
            host,
            format!("create vswitch {}", spec.name),
            build_create_vswitch_cmd(spec),
        ))
    }

    async fn create_port_group(
        &self,
        host: &str,
        spec: &PortGroupSpec,
    ) -> NetCfgResult<RemoteTaskHandle> {
        Ok(self.submit(
            host,
            format!("create port group {}", spec.name),
            build_create_port_group_cmd(spec),
        ))
    }

    async fn destroy_bond(&self, host: &str, bond: &str) -> NetCfgResult<RemoteTaskHandle> {
        Ok(self.submit(
            host,
            format!("destroy bond {}", bond),
            build_destroy_bond_cmd(bond),
        ))
    }

    async fn create_bond(
        &self,
        host: &str,
        bond: &str,
        uplinks: &[String],
    ) -> NetCfgResult<RemoteTaskHandle> {
        if uplinks.is_empty() {
            return Err(NetCfgError::invalid_config(
                "uplinks",
                format!("bond {} needs at least one uplink", bond),
            ));
        }
        Ok(self.submit(
            host,
            format!("create bond {}", bond),
            build_create_bond_cmd(bond, uplinks),
        ))
    }

    async fn set_uplink_ip(
        &self,
        host: &str,
        vmk: &str,
        ip: Ipv4Addr,
        subnet: Ipv4Addr,
    ) -> NetCfgResult<RemoteTaskHandle> {
        Ok(self.submit(
            host,
            format!("set {} address {}/{}", vmk, ip, subnet),
            build_set_uplink_ip_cmd(vmk, ip, subnet),
        ))
    }

    async fn connect_uplink(&self, host: &str, vmk: &str) -> NetCfgResult<RemoteTaskHandle> {
        Ok(self.submit(
            host,
            format!("connect uplink {}", vmk),
            build_connect_uplink_cmd(vmk),
        ))
    }

    fn collector(&self) -> Arc<dyn PropertyCollector> {
        self.collector.clone()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use esxnet_tasks::{TaskWaiter, WaitError};
    use pretty_assertions::assert_eq;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    /// Stand-in ssh client: answers on the remote command (its last argument)
    const FAKE_SSH: &str = r#"#!/bin/sh
for last; do :; done
case "$last" in
  *vmnic9*) echo "ssh: connect to host esx01 port 22: Connection refused" >&2; exit 255 ;;
  *"gw/show"*) echo 10.0.0.1 ;;
  *"vmkping"*"vmk10"*) printf '3 packets transmitted, 3 packets received, 0%% packet loss\n' ;;
  *"vmkping"*) printf '3 packets transmitted, 0 packets received, 100%% packet loss\n'; exit 1 ;;
  *"vswitch standard list"*) printf 'vSwitch0\n   Name: vSwitch0\n\nvswitch_prod\n   Name: vswitch_prod\n' ;;
  *"grep -i vmk"*) echo vmk10 ;;
  *"grep 'IP'"*) echo 10.0.0.5 ;;
  *"grep 'Mask'"*) echo garbage ;;
  *"bond/destroy"*) echo "bond not found" >&2; exit 1 ;;
  *) exit 0 ;;
esac
"#;

    fn install_fake_ssh(dir: &Path) -> String {
        let path = dir.join("ssh");
        std::fs::write(&path, FAKE_SSH).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn gateway(ssh_binary: &str) -> EsxHostGateway {
        let session = VcenterSession::new("vc01.example.com", "admin", "secret", false).unwrap();
        EsxHostGateway::new(
            session,
            SshTarget::new("", "root").with_ssh_binary(ssh_binary),
        )
    }

    #[tokio::test]
    async fn test_fact_queries() {
        let dir = tempfile::tempdir().unwrap();
        let gw = gateway(&install_fake_ssh(dir.path()));

        assert_eq!(
            gw.list_vswitches("esx01").await.unwrap(),
            vec!["vSwitch0", "vswitch_prod"]
        );
        assert_eq!(gw.bond_for_nic("esx01", "vmnic4").await.unwrap(), None);
        assert_eq!(
            gw.vmk_for_nic("esx01", "vmnic4").await.unwrap(),
            Some("vmk10".to_string())
        );
        assert_eq!(
            gw.vmk_ip("esx01", "vmk10").await.unwrap(),
            Some(Ipv4Addr::new(10, 0, 0, 5))
        );
        let err = gw.vmk_subnet("esx01", "vmk10").await.unwrap_err();
        assert!(matches!(err, NetCfgError::FactLookup { .. }));
    }

    #[tokio::test]
    async fn test_lost_connection_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let gw = gateway(&install_fake_ssh(dir.path()));

        let err = gw.vmk_for_nic("esx01", "vmnic9").await.unwrap_err();
        assert!(matches!(err, NetCfgError::Connection { .. }), "{}", err);
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_gateway_checks() {
        let dir = tempfile::tempdir().unwrap();
        let gw = gateway(&install_fake_ssh(dir.path()));
        let gateway_ip = Ipv4Addr::new(10, 0, 0, 1);

        assert_eq!(
            gw.nsx_gateway("esx01", "tunneling").await.unwrap(),
            Some(gateway_ip)
        );
        assert!(gw.ping_gateway("esx01", "vmk10", gateway_ip).await.unwrap());
        assert!(!gw.ping_gateway("esx01", "vmk11", gateway_ip).await.unwrap());
    }

    #[tokio::test]
    async fn test_mutations_run_as_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let gw = gateway(&install_fake_ssh(dir.path()));
        let waiter = TaskWaiter::new(gw.collector());

        let spec = PortGroupSpec::new("vswitch_prod", 10, "net-a");
        let task = gw.create_port_group("esx01", &spec).await.unwrap();
        waiter.await_all(&[task]).await.unwrap();

        let task = gw.destroy_bond("esx01", "bond0").await.unwrap();
        let err = waiter.await_all(&[task.clone()]).await.unwrap_err();
        match err {
            WaitError::TaskFailed { task: failed, message } => {
                assert_eq!(failed, task);
                assert!(message.contains("bond not found"), "{}", message);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_ssh_binary() {
        let gw = gateway("/nonexistent/ssh-client");
        let err = gw.bond_for_nic("esx01", "vmnic4").await.unwrap_err();
        assert!(matches!(err, NetCfgError::ShellExec { .. }));

        let err = gw.create_bond("esx01", "bond0", &[]).await.unwrap_err();
        assert!(matches!(err, NetCfgError::InvalidConfig { .. }));
    }
}
