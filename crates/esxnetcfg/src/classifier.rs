//! Network profile classification

use crate::types::{HostNetworkFacts, NetworkProfile};

/// Maps a facts snapshot to a network profile.
///
/// Rules, first match wins:
/// 1. Both uplink interfaces present, no switch: `Sdn`
/// 2. Exactly one uplink interface present, switch present: `Split`
/// 3. No uplink interface present, switch present: `Physical`
/// 4. Anything else: `Unknown`
pub fn classify(facts: &HostNetworkFacts) -> NetworkProfile {
    let primary = facts.vmk_interface_primary.is_some();
    let secondary = facts.vmk_interface_secondary.is_some();
    let switch = facts.vswitch_configured;

    match (primary, secondary, switch) {
        (true, true, false) => NetworkProfile::Sdn,
        (true, false, true) | (false, true, true) => NetworkProfile::Split,
        (false, false, true) => NetworkProfile::Physical,
        _ => NetworkProfile::Unknown,
    }
}

/// Human readable explanation of a profile
pub fn describe(profile: NetworkProfile) -> &'static str {
    match profile {
        NetworkProfile::Sdn => {
            "both interfaces are managed by NSX and no standard switch is present; host fully managed by NSX"
        }
        NetworkProfile::Split => {
            "one NIC is managed by NSX and a standard switch is present; split network configuration"
        }
        NetworkProfile::Physical => {
            "no NIC is managed by NSX and a standard switch is present"
        }
        NetworkProfile::Unknown => "unable to determine the network profile",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts(primary: bool, secondary: bool, switch: bool) -> HostNetworkFacts {
        HostNetworkFacts {
            host: "esx01".to_string(),
            vmk_interface_primary: primary.then(|| "vmk10".to_string()),
            vmk_interface_secondary: secondary.then(|| "vmk11".to_string()),
            vswitch_configured: switch,
            ..Default::default()
        }
    }

    #[test]
    fn test_all_combinations() {
        let cases = [
            (true, true, false, NetworkProfile::Sdn),
            (true, true, true, NetworkProfile::Unknown),
            (true, false, true, NetworkProfile::Split),
            (false, true, true, NetworkProfile::Split),
            (true, false, false, NetworkProfile::Unknown),
            (false, true, false, NetworkProfile::Unknown),
            (false, false, true, NetworkProfile::Physical),
            (false, false, false, NetworkProfile::Unknown),
        ];

        for (primary, secondary, switch, expected) in cases {
            assert_eq!(
                classify(&facts(primary, secondary, switch)),
                expected,
                "primary={} secondary={} switch={}",
                primary,
                secondary,
                switch
            );
        }
    }

    #[test]
    fn test_deterministic() {
        let f = facts(true, false, true);
        assert_eq!(classify(&f), classify(&f.clone()));
    }

    #[test]
    fn test_bonds_do_not_affect_profile() {
        let mut f = facts(false, false, true);
        f.bond_primary = Some("bond0".to_string());
        assert_eq!(classify(&f), NetworkProfile::Physical);
    }

    #[test]
    fn test_describe() {
        assert!(describe(NetworkProfile::Sdn).contains("fully managed by NSX"));
        assert!(describe(NetworkProfile::Unknown).contains("unable"));
    }
}
