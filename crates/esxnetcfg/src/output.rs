//! Text and JSON rendering of audit and migration results

use serde_json::{json, Value};
use std::fmt::Write;

use crate::classifier::describe;
use crate::migrator::MigrationOutcome;
use crate::types::{GatewayCheck, HostNetworkFacts, NetworkProfile};

/// Audit status line
pub fn audit_text(host: &str, profile: NetworkProfile) -> String {
    format!(
        "audit complete on host {}, currently configured as '{}' ({})",
        host,
        profile,
        describe(profile)
    )
}

/// Audit result with the captured facts
pub fn audit_json(facts: &HostNetworkFacts, profile: NetworkProfile) -> Value {
    json!({
        "host": facts.host,
        "profile": profile,
        "facts": facts,
    })
}

/// Migration summary, one line per failed operation
pub fn outcome_text(host: &str, outcome: &MigrationOutcome) -> String {
    let mut out = String::new();
    let report = outcome.report();

    match outcome {
        MigrationOutcome::Converged { .. } => {
            let _ = writeln!(out, "host {}: config completed, profile 'physical'", host);
        }
        MigrationOutcome::Diverged { profile, .. } => {
            let _ = writeln!(
                out,
                "host {}: state does not match, profile '{}' ({})",
                host,
                profile,
                describe(*profile)
            );
        }
    }

    let _ = writeln!(
        out,
        "{} operations, {} failed",
        report.operations().len(),
        report.failures().count()
    );
    for op in report.failures() {
        let _ = writeln!(
            out,
            "  FAILED {}: {}",
            op.operation,
            op.error().unwrap_or_default()
        );
    }
    out
}

/// Migration result as JSON
pub fn outcome_json(host: &str, outcome: &MigrationOutcome) -> Value {
    match outcome {
        MigrationOutcome::Converged { report } => json!({
            "host": host,
            "outcome": "converged",
            "profile": NetworkProfile::Physical,
            "report": report.to_json(),
        }),
        MigrationOutcome::Diverged {
            profile,
            facts,
            report,
        } => json!({
            "host": host,
            "outcome": "diverged",
            "profile": profile,
            "facts": facts,
            "report": report.to_json(),
        }),
    }
}

/// Gateway check summary, one line per uplink interface
pub fn gateway_check_text(check: &GatewayCheck) -> String {
    let mut out = String::new();
    let Some(gateway) = check.gateway else {
        let _ = writeln!(
            out,
            "host {}: no NSX {} gateway found",
            check.host, check.gateway_type
        );
        return out;
    };

    let _ = writeln!(
        out,
        "host {}: NSX {} gateway {}, {}",
        check.host,
        check.gateway_type,
        gateway,
        if check.healthy() { "connectivity looks good" } else { "connectivity problems" }
    );
    if check.uplinks.is_empty() {
        let _ = writeln!(out, "  no NSX uplink interfaces");
    }
    for uplink in &check.uplinks {
        let _ = writeln!(
            out,
            "  {} {}",
            if uplink.reachable { "OK    " } else { "FAILED" },
            uplink.vmk
        );
    }
    out
}

/// Gateway check result as JSON
pub fn gateway_check_json(check: &GatewayCheck) -> Value {
    json!({
        "host": check.host,
        "gateway_type": check.gateway_type,
        "gateway": check.gateway,
        "healthy": check.healthy(),
        "uplinks": check.uplinks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StepError;
    use crate::plan::MigrationState;
    use crate::report::{MigrationReport, OperationRecord};
    use esxnet_common::NetCfgError;

    fn report_with_failure() -> MigrationReport {
        let mut report = MigrationReport::new();
        report.record(OperationRecord {
            operation: "create port group net-b (vlan 20) on vswitch_prod".to_string(),
            phase: MigrationState::PortGroupsAssigned,
            task: None,
            result: Err(StepError::Submit(NetCfgError::internal("refused"))),
        });
        report
    }

    #[test]
    fn test_audit_text() {
        let line = audit_text("esx01", NetworkProfile::Sdn);
        assert!(line.starts_with("audit complete on host esx01, currently configured as 'sdn'"));
    }

    #[test]
    fn test_audit_json() {
        let facts = HostNetworkFacts {
            host: "esx01".to_string(),
            vswitch_configured: true,
            ..Default::default()
        };
        let value = audit_json(&facts, NetworkProfile::Physical);
        assert_eq!(value["profile"], json!("physical"));
        assert_eq!(value["facts"]["vswitch_configured"], json!(true));
    }

    #[test]
    fn test_outcome_text_lists_failures() {
        let outcome = MigrationOutcome::Converged {
            report: report_with_failure(),
        };
        let text = outcome_text("esx01", &outcome);
        assert!(text.contains("config completed"));
        assert!(text.contains("1 operations, 1 failed"));
        assert!(text.contains("FAILED create port group net-b"));
    }

    #[test]
    fn test_gateway_check_rendering() {
        let mut check = GatewayCheck::new("esx01", "tunneling", Some("10.0.0.1".parse().unwrap()));
        check.uplinks.push(crate::types::UplinkReachability {
            vmk: "vmk10".to_string(),
            reachable: true,
        });
        check.uplinks.push(crate::types::UplinkReachability {
            vmk: "vmk11".to_string(),
            reachable: false,
        });

        let text = gateway_check_text(&check);
        assert!(text.starts_with("host esx01: NSX tunneling gateway 10.0.0.1, connectivity problems"));
        assert!(text.contains("FAILED vmk11"));

        let value = gateway_check_json(&check);
        assert_eq!(value["gateway"], json!("10.0.0.1"));
        assert_eq!(value["healthy"], json!(false));
        assert_eq!(value["uplinks"][0]["reachable"], json!(true));

        let missing = GatewayCheck::new("esx01", "tunneling", None);
        assert_eq!(
            gateway_check_text(&missing),
            "host esx01: no NSX tunneling gateway found\n"
        );
        assert_eq!(gateway_check_json(&missing)["gateway"], json!(null));
    }

    #[test]
    fn test_outcome_json_diverged() {
        let outcome = MigrationOutcome::Diverged {
            profile: NetworkProfile::Unknown,
            facts: HostNetworkFacts::default(),
            report: report_with_failure(),
        };
        let value = outcome_json("esx01", &outcome);
        assert_eq!(value["outcome"], json!("diverged"));
        assert_eq!(value["profile"], json!("unknown"));
        assert_eq!(value["report"]["operations"][0]["ok"], json!(false));
    }
}
