//! Shell command builders for ESXi network operations

use once_cell::sync::Lazy;
use regex::Regex;
use std::net::Ipv4Addr;

use esxnet_common::shellquote;

use crate::types::{PortGroupSpec, VirtualSwitchSpec};

/// esxcli binary
pub const ESXCLI_CMD: &str = "esxcli";

/// NSX database inspection tool
pub const NSX_DBCTL_CMD: &str = "nsx-dbctl";

/// NSX host CLI
pub const NSXCLI_CMD: &str = "nsxcli";

/// ESXi ping utility
pub const VMKPING_CMD: &str = "vmkping";

/// Network stack the NSX uplink interfaces are bound to
pub const NSX_NETSTACK: &str = "nsxTcpipStack";

/// NSX gateway type of the overlay transport
pub const DEFAULT_GATEWAY_TYPE: &str = "tunneling";

/// Summary figure of ping output, e.g. "3 packets received, 0% packet loss"
static PACKET_LOSS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([0-9]+(?:\.[0-9]+)?)% packet loss").expect("Invalid regex pattern")
});

/// esxcli namespace for standard switches
const VSWITCH_NS: &str = "network vswitch standard";

/// Build bond lookup command
///
/// Prints the name of the bond port holding the NIC interface, or nothing.
pub fn build_bond_for_nic_cmd(nic: &str) -> String {
    let pattern = shellquote(&format!("interface \"{}\"", nic));
    format!(
        r#"{} show | grep -i {} -B 2 | grep -i port | sed -e 's/Port "\(.*\)"/\1/'"#,
        NSX_DBCTL_CMD, pattern
    )
}

/// Build uplink interface lookup command
///
/// Prints the name of the vmk port next to the NIC interface, or nothing.
pub fn build_vmk_for_nic_cmd(nic: &str) -> String {
    let pattern = shellquote(&format!("interface \"{}\"", nic));
    format!(
        r#"{} show | grep -i {} -A 4 -B 4 | grep -i vmk | grep -i port | sed -e 's/Port "\(.*\)"/\1/'"#,
        NSX_DBCTL_CMD, pattern
    )
}

/// Build uplink interface address lookup command
pub fn build_vmk_ip_cmd(vmk: &str) -> String {
    build_uplink_field_cmd(vmk, "IP")
}

/// Build uplink interface netmask lookup command
pub fn build_vmk_subnet_cmd(vmk: &str) -> String {
    build_uplink_field_cmd(vmk, "Mask")
}

fn build_uplink_field_cmd(vmk: &str, field: &str) -> String {
    format!(
        r#"{} uplink/show | grep -A 5 {} | grep '{}' | sed -e 's/^[^:]*: *\([0-9.]*\).*/\1/'"#,
        NSXCLI_CMD,
        shellquote(vmk),
        field
    )
}

/// Build standard switch listing command
pub fn build_list_vswitches_cmd() -> String {
    format!("{} {} list", ESXCLI_CMD, VSWITCH_NS)
}

/// Build standard switch removal command
pub fn build_delete_vswitch_cmd(name: &str) -> String {
    format!(
        "{} {} remove --vswitch-name={}",
        ESXCLI_CMD,
        VSWITCH_NS,
        shellquote(name)
    )
}

/// Build standard switch creation command
///
/// Adds the switch with its port count, then binds each NIC as an uplink.
pub fn build_create_vswitch_cmd(spec: &VirtualSwitchSpec) -> String {
    let name = shellquote(&spec.name);
    let mut parts = vec![format!(
        "{} {} add --vswitch-name={} --ports={}",
        ESXCLI_CMD, VSWITCH_NS, name, spec.num_ports
    )];
    for nic in &spec.nics {
        parts.push(format!(
            "{} {} uplink add --uplink-name={} --vswitch-name={}",
            ESXCLI_CMD,
            VSWITCH_NS,
            shellquote(nic),
            name
        ));
    }
    parts.join(" && ")
}

/// Build port group creation command
///
/// Adds the port group, tags it with its VLAN and applies the security
/// policy.
pub fn build_create_port_group_cmd(spec: &PortGroupSpec) -> String {
    let pg = shellquote(&spec.name);
    let add = format!(
        "{} {} portgroup add --portgroup-name={} --vswitch-name={}",
        ESXCLI_CMD,
        VSWITCH_NS,
        pg,
        shellquote(&spec.vswitch)
    );
    let vlan = format!(
        "{} {} portgroup set --portgroup-name={} --vlan-id={}",
        ESXCLI_CMD, VSWITCH_NS, pg, spec.vlan_id
    );
    let security = format!(
        "{} {} portgroup policy security set --portgroup-name={} \
         --allow-promiscuous={} --allow-forged-transmits={} --allow-mac-change={}",
        ESXCLI_CMD,
        VSWITCH_NS,
        pg,
        spec.security.allow_promiscuous,
        spec.security.forged_transmits,
        spec.security.mac_changes
    );
    format!("{} && {} && {}", add, vlan, security)
}

/// Build bond destroy command
pub fn build_destroy_bond_cmd(bond: &str) -> String {
    format!("{} bond/destroy {}", NSXCLI_CMD, shellquote(bond))
}

/// Build bond create command
pub fn build_create_bond_cmd(bond: &str, uplinks: &[String]) -> String {
    format!(
        "{} bond/create {} uplink={}",
        NSXCLI_CMD,
        shellquote(bond),
        shellquote(&uplinks.join(","))
    )
}

/// Build uplink address command
pub fn build_set_uplink_ip_cmd(vmk: &str, ip: Ipv4Addr, subnet: Ipv4Addr) -> String {
    format!(
        "{} uplink/set-ip {} {} {}",
        NSXCLI_CMD,
        shellquote(vmk),
        ip,
        subnet
    )
}

/// Build uplink connect command
pub fn build_connect_uplink_cmd(vmk: &str) -> String {
    format!("{} uplink/connect {}", NSXCLI_CMD, shellquote(vmk))
}

/// Build NSX default gateway lookup command
///
/// Prints the currently active default gateway of the gateway type, or
/// nothing.
pub fn build_nsx_gateway_cmd(gateway_type: &str) -> String {
    format!(
        r#"{} gw/show | grep -i {} -A 2 | grep -i 'currently active default gateway' | sed -e 's/^[^:]*: *\([0-9.]*\).*/\1/'"#,
        NSXCLI_CMD,
        shellquote(gateway_type)
    )
}

/// Build gateway reachability check over an NSX uplink interface
pub fn build_vmkping_cmd(vmk: &str, gateway: Ipv4Addr) -> String {
    format!(
        "{} ++netstack={} -I {} {}",
        VMKPING_CMD,
        NSX_NETSTACK,
        shellquote(vmk),
        gateway
    )
}

/// Packet loss percentage reported by `vmkping`, if the summary is present
pub fn parse_packet_loss(output: &str) -> Option<f64> {
    PACKET_LOSS_RE
        .captures(output)
        .and_then(|caps| caps[1].parse().ok())
}

/// Extracts switch names from `esxcli network vswitch standard list` output
///
/// Each switch block starts with an unindented name line followed by
/// indented "Key: value" lines, one of which is "Name: <switch>".
pub fn parse_vswitch_names(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("Name:"))
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

/// First non-empty output line, if any
pub fn first_value(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_bond_for_nic_cmd() {
        let cmd = build_bond_for_nic_cmd("vmnic4");
        assert!(cmd.starts_with("nsx-dbctl show | grep -i "));
        assert!(cmd.contains(r#"interface \"vmnic4\""#));
        assert!(cmd.contains("-B 2"));
    }

    #[test]
    fn test_vmk_for_nic_cmd() {
        let cmd = build_vmk_for_nic_cmd("vmnic5");
        assert!(cmd.contains("-A 4 -B 4 | grep -i vmk"));
        assert!(cmd.contains("vmnic5"));
    }

    #[test]
    fn test_uplink_field_cmds() {
        assert_eq!(
            build_vmk_ip_cmd("vmk10"),
            r#"nsxcli uplink/show | grep -A 5 "vmk10" | grep 'IP' | sed -e 's/^[^:]*: *\([0-9.]*\).*/\1/'"#
        );
        assert!(build_vmk_subnet_cmd("vmk10").contains("grep 'Mask'"));
    }

    #[test]
    fn test_vswitch_cmds() {
        assert_eq!(
            build_list_vswitches_cmd(),
            "esxcli network vswitch standard list"
        );
        assert_eq!(
            build_delete_vswitch_cmd("vswitch_prod"),
            r#"esxcli network vswitch standard remove --vswitch-name="vswitch_prod""#
        );

        let spec = VirtualSwitchSpec {
            name: "vswitch_prod".to_string(),
            nics: vec!["vmnic4".to_string(), "vmnic5".to_string()],
            num_ports: 128,
        };
        assert_eq!(
            build_create_vswitch_cmd(&spec),
            "esxcli network vswitch standard add --vswitch-name=\"vswitch_prod\" --ports=128 && \
             esxcli network vswitch standard uplink add --uplink-name=\"vmnic4\" --vswitch-name=\"vswitch_prod\" && \
             esxcli network vswitch standard uplink add --uplink-name=\"vmnic5\" --vswitch-name=\"vswitch_prod\""
        );
    }

    #[test]
    fn test_port_group_cmd() {
        let spec = PortGroupSpec::new("vswitch_prod", 10, "net-a");
        let cmd = build_create_port_group_cmd(&spec);
        assert!(cmd.contains("portgroup add --portgroup-name=\"net-a\" --vswitch-name=\"vswitch_prod\""));
        assert!(cmd.contains("portgroup set --portgroup-name=\"net-a\" --vlan-id=10"));
        assert!(cmd.contains(
            "--allow-promiscuous=false --allow-forged-transmits=true --allow-mac-change=true"
        ));
    }

    #[test]
    fn test_operands_are_quoted() {
        let cmd = build_destroy_bond_cmd("bond0; reboot");
        assert_eq!(cmd, r#"nsxcli bond/destroy "bond0; reboot""#);

        let spec = PortGroupSpec::new("vswitch_prod", 20, "net $(id)");
        let cmd = build_create_port_group_cmd(&spec);
        assert!(cmd.contains(r#"--portgroup-name="net \$(id)""#));
    }

    #[test]
    fn test_nsx_uplink_cmds() {
        assert_eq!(
            build_create_bond_cmd("bond0", &["vmnic4".to_string(), "vmnic5".to_string()]),
            r#"nsxcli bond/create "bond0" uplink="vmnic4,vmnic5""#
        );
        assert_eq!(
            build_set_uplink_ip_cmd(
                "vmk10",
                Ipv4Addr::new(10, 0, 0, 5),
                Ipv4Addr::new(255, 255, 255, 0)
            ),
            r#"nsxcli uplink/set-ip "vmk10" 10.0.0.5 255.255.255.0"#
        );
        assert_eq!(
            build_connect_uplink_cmd("vmk10"),
            r#"nsxcli uplink/connect "vmk10""#
        );
    }

    #[test]
    fn test_gateway_check_cmds() {
        assert_eq!(
            build_nsx_gateway_cmd("tunneling"),
            r#"nsxcli gw/show | grep -i "tunneling" -A 2 | grep -i 'currently active default gateway' | sed -e 's/^[^:]*: *\([0-9.]*\).*/\1/'"#
        );
        assert_eq!(
            build_vmkping_cmd("vmk10", Ipv4Addr::new(10, 0, 0, 1)),
            r#"vmkping ++netstack=nsxTcpipStack -I "vmk10" 10.0.0.1"#
        );
    }

    #[test]
    fn test_parse_packet_loss() {
        let ok = "PING 10.0.0.1 (10.0.0.1): 56 data bytes\n\
                  64 bytes from 10.0.0.1: icmp_seq=0 ttl=64 time=0.3 ms\n\n\
                  --- 10.0.0.1 ping statistics ---\n\
                  3 packets transmitted, 3 packets received, 0% packet loss\n";
        assert_eq!(parse_packet_loss(ok), Some(0.0));

        let lost = "3 packets transmitted, 0 packets received, 100% packet loss";
        assert_eq!(parse_packet_loss(lost), Some(100.0));
        assert_eq!(parse_packet_loss("4 packets transmitted, 3 received, 25.0% packet loss"), Some(25.0));
        assert_eq!(parse_packet_loss("Unknown interface 'vmk99'"), None);
    }

    #[test]
    fn test_parse_vswitch_names() {
        let output = "vSwitch0\n   Name: vSwitch0\n   Class: cswitch\n   Num Ports: 2560\n\n\
                      vswitch_prod\n   Name: vswitch_prod\n   Num Ports: 128\n";
        assert_eq!(parse_vswitch_names(output), vec!["vSwitch0", "vswitch_prod"]);
        assert!(parse_vswitch_names("").is_empty());
    }

    #[test]
    fn test_first_value() {
        assert_eq!(first_value("\n  bond0 \nbond1"), Some("bond0".to_string()));
        assert_eq!(first_value("  \n"), None);
    }
}
