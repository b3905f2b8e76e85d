//! esxnetcfg - network profile audit and migration for ESXi hosts
//!
//! Classifies a host's uplink layout as fully NSX managed (`sdn`), split or
//! fully switch based (`physical`), and migrates hosts to the switch based
//! layout by tearing down NSX bonds and rebuilding a standard switch with
//! VLAN port groups.

mod classifier;
mod commands;
mod config_file;
mod error;
mod esx_gateway;
mod facts;
mod gateway;
mod migrator;
mod output;
mod plan;
mod report;
mod types;
mod vcenter;

pub use classifier::{classify, describe};
pub use commands::*;
pub use config_file::*;
pub use error::{MigrationError, MigrationResult, StepError};
pub use esx_gateway::EsxHostGateway;
pub use facts::capture;
pub use gateway::HostGateway;
pub use migrator::{MigrationOutcome, MigrationRequest, NetworkMigrator};
pub use output::{
    audit_json, audit_text, gateway_check_json, gateway_check_text, outcome_json, outcome_text,
};
pub use plan::{MigrationPlan, MigrationState, MigrationStep};
pub use report::{MigrationReport, OperationRecord};
pub use types::*;
pub use vcenter::{HostSummary, VcenterSession};
