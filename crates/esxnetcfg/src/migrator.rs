//! NetworkMigrator - audit and migration of ESXi host network profiles

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use esxnet_common::NetCfgResult;
use esxnet_tasks::{RemoteTaskHandle, TaskWaiter, WaitError};

use crate::classifier::{classify, describe};
use crate::error::{MigrationError, MigrationResult, StepError};
use crate::facts;
use crate::gateway::HostGateway;
use crate::plan::{MigrationPlan, MigrationState, MigrationStep};
use crate::report::{MigrationReport, OperationRecord};
use crate::types::{
    GatewayCheck, HostNetworkFacts, HostTarget, NetworkProfile, UplinkReachability, VlanMapping,
};

/// What to migrate and which port groups to build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRequest {
    /// Host, NICs and switch name
    pub target: HostTarget,
    /// VLAN ID to port group name mapping
    pub networks: VlanMapping,
}

impl MigrationRequest {
    /// Creates a new request
    pub fn new(target: HostTarget, networks: VlanMapping) -> Self {
        Self { target, networks }
    }
}

/// Terminal outcome of a migration run
#[derive(Debug)]
pub enum MigrationOutcome {
    /// The verifying audit classified the host as `Physical`
    Converged { report: MigrationReport },
    /// The verifying audit found a different profile
    Diverged {
        profile: NetworkProfile,
        facts: HostNetworkFacts,
        report: MigrationReport,
    },
}

impl MigrationOutcome {
    /// Returns true for `Converged`
    pub fn is_converged(&self) -> bool {
        matches!(self, MigrationOutcome::Converged { .. })
    }

    /// Run report
    pub fn report(&self) -> &MigrationReport {
        match self {
            MigrationOutcome::Converged { report } => report,
            MigrationOutcome::Diverged { report, .. } => report,
        }
    }
}

/// Drives hosts between network profiles
///
/// Migration flow:
/// 1. Connect to the management endpoint and the host
/// 2. Audit (capture facts, classify) and build a plan
/// 3. Destroy present bonds, remove the old switch, create the switch,
///    add port groups; one mutation at a time, failures recorded
/// 4. Audit again and compare against the expected profile
pub struct NetworkMigrator {
    gateway: Arc<dyn HostGateway>,
    waiter: TaskWaiter,
}

impl NetworkMigrator {
    /// Creates a migrator waiting on the gateway's collector without a deadline
    pub fn new(gateway: Arc<dyn HostGateway>) -> Self {
        let waiter = TaskWaiter::new(gateway.collector());
        Self { gateway, waiter }
    }

    /// Sets the deadline for each task wait
    pub fn with_task_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.waiter = self.waiter.with_timeout(timeout);
        self
    }

    /// Uses `token` to cancel in-flight task waits
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.waiter = self.waiter.with_cancellation(token);
        self
    }

    /// Connects to the management endpoint and the host
    #[instrument(skip(self))]
    pub async fn connect(&self, host: &str) -> NetCfgResult<()> {
        self.gateway.connect(host).await?;
        info!("Connected to host {}", host);
        Ok(())
    }

    /// Captures a fresh facts snapshot
    pub async fn inspect(&self, target: &HostTarget) -> NetCfgResult<HostNetworkFacts> {
        facts::capture(self.gateway.as_ref(), target).await
    }

    /// Captures facts and classifies them. Never mutates the host.
    #[instrument(skip(self), fields(host = %target.host))]
    pub async fn audit(&self, target: &HostTarget) -> NetCfgResult<NetworkProfile> {
        info!("Auditing host {} for a network profile", target.host);
        let facts = self.inspect(target).await?;
        let profile = classify(&facts);
        info!(
            "Audit complete on host {}, currently configured as '{}': {}",
            target.host,
            profile,
            describe(profile)
        );
        Ok(profile)
    }

    /// Looks up the NSX default gateway and pings it from each uplink
    /// interface. Never mutates the host.
    #[instrument(skip(self), fields(host = %target.host))]
    pub async fn check_gateway(
        &self,
        target: &HostTarget,
        gateway_type: &str,
    ) -> NetCfgResult<GatewayCheck> {
        let host = target.host.as_str();
        let facts = self.inspect(target).await?;
        let gateway = self.gateway.nsx_gateway(host, gateway_type).await?;
        let mut check = GatewayCheck::new(host, gateway_type, gateway);

        let Some(gateway) = gateway else {
            warn!("No NSX {} gateway found on host {}", gateway_type, host);
            return Ok(check);
        };
        info!("NSX {} gateway on host {} is {}", gateway_type, host, gateway);

        let vmks = [facts.vmk_interface_primary, facts.vmk_interface_secondary];
        for vmk in vmks.into_iter().flatten() {
            // A shared bond exposes one interface for both NICs
            if check.uplinks.iter().any(|u| u.vmk == vmk) {
                continue;
            }
            let reachable = self.gateway.ping_gateway(host, &vmk, gateway).await?;
            if reachable {
                info!("Ping from {} to gateway {} succeeded", vmk, gateway);
            } else {
                warn!("Ping from {} to gateway {} failed", vmk, gateway);
            }
            check.uplinks.push(UplinkReachability { vmk, reachable });
        }
        if check.uplinks.is_empty() {
            warn!("Host {} has no NSX uplink interfaces to check", host);
        }
        Ok(check)
    }

    /// Converges a host on the `Physical` profile.
    ///
    /// Connection and audit failures stop the run. Failures of individual
    /// mutations are recorded in the report and the run continues, so the
    /// verifying audit always reports the true end state.
    #[instrument(skip(self, request), fields(host = %request.target.host))]
    pub async fn migrate_to_physical(
        &self,
        request: &MigrationRequest,
    ) -> MigrationResult<MigrationOutcome> {
        let target = &request.target;
        let mut report = MigrationReport::new();

        self.connect(&target.host)
            .await
            .map_err(MigrationError::Connection)?;

        let current = self.inspect(target).await.map_err(MigrationError::Audit)?;
        let profile = classify(&current);
        self.transition(&mut report, MigrationState::Audited);
        info!(
            "Audit complete on host {}, currently configured as '{}'",
            target.host, profile
        );

        let plan = MigrationPlan::build(target, &current, &request.networks);
        info!("Migration plan has {} operations", plan.len());

        for phase in MigrationState::PHASES {
            for step in plan.steps_for(phase) {
                let record = self.execute(&target.host, step).await;
                let cancelled = matches!(
                    record.result,
                    Err(StepError::Task(WaitError::Cancelled))
                );
                report.record(record);
                if cancelled {
                    warn!("Migration of host {} cancelled", target.host);
                    return Err(MigrationError::Cancelled { report });
                }
            }
            if plan.steps_for(phase).next().is_none() {
                info!("Nothing to do for {}", phase);
            }
            self.transition(&mut report, phase);
        }

        let verified = self.inspect(target).await.map_err(MigrationError::Verify)?;
        let profile = classify(&verified);
        self.transition(&mut report, MigrationState::Verified);

        let failures = report.failures().count();
        if failures > 0 {
            warn!("{} operations failed on host {}", failures, target.host);
        }

        if profile == plan.expected_profile() {
            info!("Host {} converged on profile '{}'", target.host, profile);
            Ok(MigrationOutcome::Converged { report })
        } else {
            warn!(
                "State does not match on host {}: expected '{}', found '{}'",
                target.host,
                plan.expected_profile(),
                profile
            );
            Ok(MigrationOutcome::Diverged {
                profile,
                facts: verified,
                report,
            })
        }
    }

    fn transition(&self, report: &mut MigrationReport, state: MigrationState) {
        info!("{} -> {}", report.state(), state);
        report.enter(state);
    }

    /// Submits one step and waits for its task
    async fn execute(&self, host: &str, step: &MigrationStep) -> OperationRecord {
        let operation = step.operation();
        info!("Starting: {}", operation);

        let (task, result) = match self.submit(host, step).await {
            Ok(task) => {
                let result = self
                    .waiter
                    .await_all(std::slice::from_ref(&task))
                    .await
                    .map_err(StepError::Task);
                (Some(task), result)
            }
            Err(e) => (None, Err(StepError::Submit(e))),
        };

        match &result {
            Ok(()) => info!("Completed: {}", operation),
            Err(e) => warn!("Failed: {}: {}", operation, e),
        }

        OperationRecord {
            operation,
            phase: step.phase(),
            task,
            result,
        }
    }

    async fn submit(&self, host: &str, step: &MigrationStep) -> NetCfgResult<RemoteTaskHandle> {
        match step {
            MigrationStep::DestroyBond { bond } => self.gateway.destroy_bond(host, bond).await,
            MigrationStep::DeleteSwitch { name } => self.gateway.delete_switch(host, name).await,
            MigrationStep::CreateSwitch(spec) => self.gateway.create_switch(host, spec).await,
            MigrationStep::CreatePortGroup(spec) => {
                self.gateway.create_port_group(host, spec).await
            }
        }
    }
}
