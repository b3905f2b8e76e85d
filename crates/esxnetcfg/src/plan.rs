//! Migration plan construction
//!
//! A plan is built once from the audited facts and lists only the steps
//! that have something to do: a bond that is absent is not torn down, and a
//! switch that does not exist is not deleted.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{
    HostNetworkFacts, HostTarget, NetworkProfile, PortGroupSpec, VirtualSwitchSpec, VlanMapping,
};

/// States of a migration run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    Start,
    Audited,
    BondsCleared,
    SwitchRemoved,
    SwitchCreated,
    PortGroupsAssigned,
    Verified,
}

impl MigrationState {
    /// Mutating phases in execution order
    pub const PHASES: [MigrationState; 4] = [
        MigrationState::BondsCleared,
        MigrationState::SwitchRemoved,
        MigrationState::SwitchCreated,
        MigrationState::PortGroupsAssigned,
    ];

    /// Returns the state name
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationState::Start => "start",
            MigrationState::Audited => "audited",
            MigrationState::BondsCleared => "bonds_cleared",
            MigrationState::SwitchRemoved => "switch_removed",
            MigrationState::SwitchCreated => "switch_created",
            MigrationState::PortGroupsAssigned => "port_groups_assigned",
            MigrationState::Verified => "verified",
        }
    }
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reconfiguration step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum MigrationStep {
    /// Tear down an NSX bond
    DestroyBond { bond: String },
    /// Remove the existing standard switch
    DeleteSwitch { name: String },
    /// Build the standard switch
    CreateSwitch(VirtualSwitchSpec),
    /// Add a VLAN port group
    CreatePortGroup(PortGroupSpec),
}

impl MigrationStep {
    /// The state reached once the phase this step belongs to is done
    pub fn phase(&self) -> MigrationState {
        match self {
            MigrationStep::DestroyBond { .. } => MigrationState::BondsCleared,
            MigrationStep::DeleteSwitch { .. } => MigrationState::SwitchRemoved,
            MigrationStep::CreateSwitch(_) => MigrationState::SwitchCreated,
            MigrationStep::CreatePortGroup(_) => MigrationState::PortGroupsAssigned,
        }
    }

    /// Operation identifier used in logs and reports
    pub fn operation(&self) -> String {
        match self {
            MigrationStep::DestroyBond { bond } => format!("destroy bond {}", bond),
            MigrationStep::DeleteSwitch { name } => format!("delete vswitch {}", name),
            MigrationStep::CreateSwitch(spec) => format!(
                "create vswitch {} on {} ({} ports)",
                spec.name,
                spec.nics.join(","),
                spec.num_ports
            ),
            MigrationStep::CreatePortGroup(spec) => format!(
                "create port group {} (vlan {}) on {}",
                spec.name, spec.vlan_id, spec.vswitch
            ),
        }
    }
}

impl fmt::Display for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.operation())
    }
}

/// Ordered steps converging a host on the `Physical` profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationPlan {
    steps: Vec<MigrationStep>,
    expected: NetworkProfile,
}

impl MigrationPlan {
    /// Builds the plan for `target` from the audited facts.
    pub fn build(target: &HostTarget, facts: &HostNetworkFacts, networks: &VlanMapping) -> Self {
        let mut steps = Vec::new();

        if let Some(bond) = &facts.bond_primary {
            steps.push(MigrationStep::DestroyBond { bond: bond.clone() });
        }
        if let Some(bond) = &facts.bond_secondary {
            // Both NICs can sit in the same bond
            if facts.bond_primary.as_ref() != Some(bond) {
                steps.push(MigrationStep::DestroyBond { bond: bond.clone() });
            }
        }

        if facts.vswitch_configured {
            steps.push(MigrationStep::DeleteSwitch {
                name: target.vswitch.clone(),
            });
        }

        steps.push(MigrationStep::CreateSwitch(VirtualSwitchSpec::for_target(
            target,
        )));

        for (vlan_id, name) in networks.iter() {
            steps.push(MigrationStep::CreatePortGroup(PortGroupSpec::new(
                &target.vswitch,
                vlan_id,
                name,
            )));
        }

        Self {
            steps,
            expected: NetworkProfile::Physical,
        }
    }

    /// All steps in execution order
    pub fn steps(&self) -> &[MigrationStep] {
        &self.steps
    }

    /// Steps belonging to one phase, in order
    pub fn steps_for(&self, phase: MigrationState) -> impl Iterator<Item = &MigrationStep> {
        self.steps.iter().filter(move |step| step.phase() == phase)
    }

    /// Profile the host must show after the plan ran
    pub fn expected_profile(&self) -> NetworkProfile {
        self.expected
    }

    /// Number of steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the plan has no steps
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn target() -> HostTarget {
        HostTarget::new("esx01", "vmnic4", "vmnic5", "vswitch_prod")
    }

    fn sdn_facts() -> HostNetworkFacts {
        HostNetworkFacts {
            host: "esx01".to_string(),
            vmk_interface_primary: Some("vmk10".to_string()),
            vmk_interface_secondary: Some("vmk11".to_string()),
            bond_primary: Some("bond0".to_string()),
            bond_secondary: Some("bond1".to_string()),
            ..Default::default()
        }
    }

    fn operations(plan: &MigrationPlan) -> Vec<String> {
        plan.steps().iter().map(MigrationStep::operation).collect()
    }

    #[test]
    fn test_sdn_host_plan() {
        let networks = VlanMapping::from_pairs([(10, "net-a"), (20, "net-b")]).unwrap();
        let plan = MigrationPlan::build(&target(), &sdn_facts(), &networks);

        assert_eq!(
            operations(&plan),
            vec![
                "destroy bond bond0",
                "destroy bond bond1",
                "create vswitch vswitch_prod on vmnic4,vmnic5 (128 ports)",
                "create port group net-a (vlan 10) on vswitch_prod",
                "create port group net-b (vlan 20) on vswitch_prod",
            ]
        );
        assert_eq!(plan.expected_profile(), NetworkProfile::Physical);
    }

    #[test]
    fn test_absent_bonds_are_skipped() {
        let facts = HostNetworkFacts {
            bond_primary: None,
            bond_secondary: Some("bond1".to_string()),
            ..sdn_facts()
        };
        let plan = MigrationPlan::build(&target(), &facts, &VlanMapping::new());
        assert_eq!(plan.steps_for(MigrationState::BondsCleared).count(), 1);

        let facts = HostNetworkFacts {
            bond_primary: None,
            bond_secondary: None,
            ..sdn_facts()
        };
        let plan = MigrationPlan::build(&target(), &facts, &VlanMapping::new());
        assert_eq!(plan.steps_for(MigrationState::BondsCleared).count(), 0);
    }

    #[test]
    fn test_shared_bond_destroyed_once() {
        let facts = HostNetworkFacts {
            bond_primary: Some("bond0".to_string()),
            bond_secondary: Some("bond0".to_string()),
            ..sdn_facts()
        };
        let plan = MigrationPlan::build(&target(), &facts, &VlanMapping::new());
        let bonds: Vec<_> = plan.steps_for(MigrationState::BondsCleared).collect();
        assert_eq!(
            bonds,
            vec![&MigrationStep::DestroyBond {
                bond: "bond0".to_string()
            }]
        );
    }

    #[test]
    fn test_existing_switch_is_deleted_first() {
        let facts = HostNetworkFacts {
            vswitch_configured: true,
            vswitches: vec!["vSwitch0".to_string(), "vswitch_prod".to_string()],
            ..Default::default()
        };
        let plan = MigrationPlan::build(&target(), &facts, &VlanMapping::new());
        assert_eq!(
            operations(&plan),
            vec![
                "delete vswitch vswitch_prod",
                "create vswitch vswitch_prod on vmnic4,vmnic5 (128 ports)",
            ]
        );
    }

    #[test]
    fn test_phases_follow_step_order() {
        let networks = VlanMapping::from_pairs([(10, "net-a")]).unwrap();
        let facts = HostNetworkFacts {
            vswitch_configured: true,
            ..sdn_facts()
        };
        let plan = MigrationPlan::build(&target(), &facts, &networks);
        let phases: Vec<MigrationState> = plan.steps().iter().map(|s| s.phase()).collect();
        let mut sorted = phases.clone();
        sorted.sort();
        assert_eq!(phases, sorted);
        assert_eq!(plan.len(), 5);
    }
}
