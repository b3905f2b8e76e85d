//! esxnetcfg - ESXi host network profile audit and migration
//!
//! Exit status: 0 when the audit succeeded, the migration converged or the
//! gateway check passed, 1 when the migration diverged or the gateway check
//! failed, 2 on fatal errors.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use esxnet_common::SshTarget;
use esxnetcfg::{
    audit_json, audit_text, classify, gateway_check_json, gateway_check_text, outcome_json,
    outcome_text, EsxHostGateway, EsxNetConfig, HostGateway, HostTarget, MigrationError,
    MigrationOutcome, MigrationRequest, NetworkMigrator, VcenterSession, VlanMapping,
    DEFAULT_CONFIG_PATH, DEFAULT_GATEWAY_TYPE,
};

const EXIT_UNHEALTHY: u8 = 1;
const EXIT_FATAL: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Action {
    /// Classify the host without changing it
    Audit,
    /// Migrate the host to the standard switch layout
    Update,
    /// Ping the NSX default gateway from each uplink interface
    CheckGateway,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// Configure a standard switch for an ESXi host
#[derive(Parser, Debug)]
#[command(name = "esxnetcfg")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// vCenter FQDN or URL
    #[arg(long)]
    vc_fqdn: Option<String>,

    /// vCenter user
    #[arg(long)]
    vc_user: Option<String>,

    /// vCenter password
    #[arg(long)]
    vc_password: Option<String>,

    /// ESXi host name as registered in vCenter
    #[arg(long)]
    hostname: String,

    /// ESXi shell user
    #[arg(long)]
    esxi_user: Option<String>,

    /// ESXi shell password
    #[arg(long)]
    esxi_password: Option<String>,

    /// First physical NIC
    #[arg(long)]
    primary_nic: Option<String>,

    /// Second physical NIC
    #[arg(long)]
    secondary_nic: Option<String>,

    /// VLAN port group as ID=NAME (repeatable)
    #[arg(long = "network", value_name = "ID=NAME", value_parser = parse_network)]
    networks: Vec<(u16, String)>,

    /// Standard switch name
    #[arg(long)]
    vswitch: Option<String>,

    /// Action to perform
    #[arg(long, value_enum, default_value = "audit")]
    action: Action,

    /// NSX gateway type for --action check-gateway
    #[arg(long, default_value = DEFAULT_GATEWAY_TYPE)]
    gateway_type: String,

    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Deadline per remote task in seconds
    #[arg(long, value_name = "SECS")]
    task_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Accept self-signed vCenter certificates
    #[arg(long)]
    insecure: bool,
}

fn parse_network(s: &str) -> Result<(u16, String), String> {
    VlanMapping::parse_entry(s).map_err(|e| e.to_string())
}

/// Initializes tracing/logging subsystem
fn init_logging(log_level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .init();
}

/// Applies command line overrides on top of the file settings
fn merge(mut config: EsxNetConfig, args: &Args) -> anyhow::Result<(EsxNetConfig, VlanMapping)> {
    if let Some(v) = &args.vc_fqdn {
        config.management.endpoint = v.clone();
    }
    if let Some(v) = &args.vc_user {
        config.management.user = v.clone();
    }
    if let Some(v) = &args.vc_password {
        config.management.password = v.clone();
    }
    if args.insecure {
        config.management.insecure_tls = true;
    }
    if let Some(v) = &args.esxi_user {
        config.esxi.user = v.clone();
    }
    if let Some(v) = &args.esxi_password {
        config.esxi.password = Some(v.clone());
    }
    if let Some(v) = &args.primary_nic {
        config.network.primary_nic = v.clone();
    }
    if let Some(v) = &args.secondary_nic {
        config.network.secondary_nic = v.clone();
    }
    if let Some(v) = &args.vswitch {
        config.network.vswitch = v.clone();
    }
    if let Some(secs) = args.task_timeout {
        config.wait.timeout_secs = Some(secs);
    }

    config.validate().context("invalid configuration")?;

    // --network replaces the file mapping as a whole
    let networks = if args.networks.is_empty() {
        config.vlan_mapping()?
    } else {
        VlanMapping::from_pairs(args.networks.iter().cloned()).context("invalid --network")?
    };

    Ok((config, networks))
}

fn build_gateway(config: &EsxNetConfig) -> anyhow::Result<Arc<dyn HostGateway>> {
    let session = VcenterSession::new(
        &config.management.endpoint,
        &config.management.user,
        &config.management.password,
        config.management.insecure_tls,
    )?;

    let mut ssh = SshTarget::new("", &config.esxi.user)
        .with_port(config.esxi.ssh_port)
        .with_ssh_binary(&config.esxi.ssh_binary);
    if let Some(password) = &config.esxi.password {
        ssh = ssh.with_password(password);
    }

    Ok(Arc::new(EsxHostGateway::new(session, ssh)))
}

async fn run(args: Args, cancel: CancellationToken) -> anyhow::Result<ExitCode> {
    let config = EsxNetConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let (config, networks) = merge(config, &args)?;
    let target = config.target(&args.hostname);

    info!(
        "checking host {} in virtual center {}",
        target.host, config.management.endpoint
    );

    let gateway = build_gateway(&config)?;
    let migrator = NetworkMigrator::new(Arc::clone(&gateway))
        .with_task_timeout(config.task_timeout())
        .with_cancellation(cancel);

    let result = match args.action {
        Action::Audit => audit(&migrator, &target, args.format).await,
        Action::Update => {
            update(&migrator, MigrationRequest::new(target, networks), args.format).await
        }
        Action::CheckGateway => {
            check_gateway(&migrator, &target, &args.gateway_type, args.format).await
        }
    };

    if let Err(e) = gateway.disconnect().await {
        warn!("Failed to close vCenter session: {}", e);
    }

    result
}

async fn audit(
    migrator: &NetworkMigrator,
    target: &HostTarget,
    format: OutputFormat,
) -> anyhow::Result<ExitCode> {
    migrator
        .connect(&target.host)
        .await
        .context("could not connect to vCenter and find the host")?;
    let facts = migrator.inspect(target).await.context("audit failed")?;
    let profile = classify(&facts);

    match format {
        OutputFormat::Text => println!("{}", audit_text(&target.host, profile)),
        OutputFormat::Json => println!("{}", audit_json(&facts, profile)),
    }
    Ok(ExitCode::SUCCESS)
}

async fn check_gateway(
    migrator: &NetworkMigrator,
    target: &HostTarget,
    gateway_type: &str,
    format: OutputFormat,
) -> anyhow::Result<ExitCode> {
    migrator
        .connect(&target.host)
        .await
        .context("could not connect to vCenter and find the host")?;
    let check = migrator
        .check_gateway(target, gateway_type)
        .await
        .context("gateway check failed")?;

    match format {
        OutputFormat::Text => print!("{}", gateway_check_text(&check)),
        OutputFormat::Json => println!("{}", gateway_check_json(&check)),
    }

    Ok(if check.healthy() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_UNHEALTHY)
    })
}

async fn update(
    migrator: &NetworkMigrator,
    request: MigrationRequest,
    format: OutputFormat,
) -> anyhow::Result<ExitCode> {
    let host = request.target.host.clone();

    let outcome = match migrator.migrate_to_physical(&request).await {
        Ok(outcome) => outcome,
        Err(MigrationError::Cancelled { report }) => {
            warn!(
                "Cancelled after {} operations ({} failed)",
                report.operations().len(),
                report.failures().count()
            );
            return Ok(ExitCode::from(EXIT_FATAL));
        }
        Err(e) => return Err(e.into()),
    };

    match format {
        OutputFormat::Text => print!("{}", outcome_text(&host, &outcome)),
        OutputFormat::Json => println!("{}", outcome_json(&host, &outcome)),
    }

    Ok(match outcome {
        MigrationOutcome::Converged { .. } => ExitCode::SUCCESS,
        MigrationOutcome::Diverged { .. } => ExitCode::from(EXIT_UNHEALTHY),
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling");
                cancel.cancel();
            }
        });
    }

    match run(args, cancel).await {
        Ok(code) => code,
        Err(e) => {
            error!("UNKNOWN - {:#}", e);
            ExitCode::from(EXIT_FATAL)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["esxnetcfg", "--hostname", "esx01.example.com"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]);
        assert_eq!(args.action, Action::Audit);
        assert_eq!(args.format, OutputFormat::Text);
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_PATH));

        let (config, networks) = merge(EsxNetConfig::default(), &args).unwrap();
        assert_eq!(config.network.primary_nic, "vmnic4");
        assert_eq!(config.network.vswitch, "vswitch_prod");
        assert!(networks.is_empty());
    }

    #[test]
    fn test_overrides() {
        let args = parse(&[
            "--action",
            "update",
            "--primary-nic",
            "vmnic0",
            "--secondary-nic",
            "vmnic1",
            "--network",
            "10=net-a",
            "--network",
            "20=net-b",
            "--task-timeout",
            "60",
            "--insecure",
        ]);
        assert_eq!(args.action, Action::Update);

        let mut file = EsxNetConfig::default();
        file.network
            .networks
            .insert("30".to_string(), "net-c".to_string());
        let (config, networks) = merge(file, &args).unwrap();

        assert_eq!(config.network.primary_nic, "vmnic0");
        assert!(config.management.insecure_tls);
        assert_eq!(config.task_timeout(), Some(Duration::from_secs(60)));
        let entries: Vec<_> = networks.iter().collect();
        assert_eq!(entries, vec![(10, "net-a"), (20, "net-b")]);
    }

    #[test]
    fn test_check_gateway_action() {
        assert_eq!(parse(&[]).gateway_type, "tunneling");

        let args = parse(&["--action", "check-gateway", "--gateway-type", "management"]);
        assert_eq!(args.action, Action::CheckGateway);
        assert_eq!(args.gateway_type, "management");
    }

    #[test]
    fn test_rejects_unknown_action() {
        let err = Args::try_parse_from([
            "esxnetcfg",
            "--hostname",
            "esx01",
            "--action",
            "destroy",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }

    #[test]
    fn test_rejects_bad_network() {
        assert!(Args::try_parse_from([
            "esxnetcfg",
            "--hostname",
            "esx01",
            "--network",
            "net-a",
        ])
        .is_err());
    }

    #[test]
    fn test_duplicate_networks_rejected() {
        let args = parse(&["--network", "10=net-a", "--network", "10=net-b"]);
        assert!(merge(EsxNetConfig::default(), &args).is_err());
    }
}
