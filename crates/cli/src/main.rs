use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ArgAction;
use clap::{Args, Parser, Subcommand, ValueEnum};
use fleet_audit_core::{
    run_audit, AuditConfig, AuditOptions, AuditReport, DiskUsageProber, GroupSortKey,
    NoopUsageProber, RegionReport, SnapshotInventory, SnapshotUsageProber,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "fleet-audit",
    version,
    about = "Reconcile source-region workloads against their migration destinations."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Per-subnet migration progress.
    Subnets(SubnetsArgs),
    /// Per-availability-zone migration progress.
    Zones(InventoryArgs),
    /// Dangling project links, unlinked projects and empty projects.
    Projects(InventoryArgs),
    /// Subnets holding workloads of one owning group.
    Owners(OwnersArgs),
    /// Hypervisor disk capacity, idle and fully drained hypervisors.
    Hypervisors(InventoryArgs),
    /// Full audit across all selected regions, written as a JSON report.
    Audit(AuditArgs),
    /// Validate an audit configuration file.
    CheckConfig(CheckConfigArgs),
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum CliSortKey {
    #[value(name = "member-count", alias = "count")]
    MemberCount,
    #[value(name = "to-be-migrated", alias = "pending")]
    ToBeMigrated,
    Usage,
    Key,
}

impl From<CliSortKey> for GroupSortKey {
    fn from(value: CliSortKey) -> Self {
        match value {
            CliSortKey::MemberCount => GroupSortKey::MemberCount,
            CliSortKey::ToBeMigrated => GroupSortKey::ToBeMigrated,
            CliSortKey::Usage => GroupSortKey::Usage,
            CliSortKey::Key => GroupSortKey::Key,
        }
    }
}

#[derive(Debug, Args)]
struct InventoryArgs {
    /// Audit configuration file. Campaign defaults are used when omitted.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory holding `<region>/{servers,projects,subnets,networks}.json` exports.
    #[arg(long, value_name = "DIR", default_value = "snapshots")]
    snapshots: PathBuf,

    /// Source region to audit (repeatable). Defaults to the configured regions.
    #[arg(long = "region", value_name = "REGION", action = ArgAction::Append)]
    regions: Vec<String>,

    /// Print JSON instead of tables.
    #[arg(long)]
    json: bool,

    /// Optional JSON output file.
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct UsageArgs {
    /// Include disk usage of the selected workloads per group.
    #[arg(long, requires = "usage_file")]
    usage: bool,

    /// Usage snapshot keyed by hypervisor (`{hypervisor: {workload_id: "12G"}}`).
    #[arg(long, value_name = "FILE", requires = "usage")]
    usage_file: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct SubnetsArgs {
    #[command(flatten)]
    inventory: InventoryArgs,

    #[command(flatten)]
    usage: UsageArgs,

    /// Group ordering.
    #[arg(long, default_value = "member-count")]
    sort: CliSortKey,
}

#[derive(Debug, Args)]
struct OwnersArgs {
    #[command(flatten)]
    inventory: InventoryArgs,

    /// Case-insensitive fragment of the owning group.
    #[arg(long)]
    group: String,
}

#[derive(Debug, Args)]
struct AuditArgs {
    #[command(flatten)]
    inventory: InventoryArgs,

    #[command(flatten)]
    usage: UsageArgs,

    /// Group ordering.
    #[arg(long, default_value = "member-count")]
    sort: CliSortKey,

    /// Report path used when `--output` is not given.
    #[arg(long, value_name = "FILE", default_value = "fleet-audit-report.json")]
    report: PathBuf,
}

#[derive(Debug, Args)]
struct CheckConfigArgs {
    /// Audit configuration file.
    #[arg(long, value_name = "FILE")]
    config: PathBuf,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Subnets(args) => run_subnets_command(args),
        Commands::Zones(args) => run_zones_command(args),
        Commands::Projects(args) => run_projects_command(args),
        Commands::Owners(args) => run_owners_command(args),
        Commands::Hypervisors(args) => run_hypervisors_command(args),
        Commands::Audit(args) => run_audit_command(args),
        Commands::CheckConfig(args) => run_check_config_command(args),
    }
}

fn load_config(path: Option<&Path>) -> Result<AuditConfig> {
    match path {
        Some(path) => AuditConfig::load(path),
        None => Ok(AuditConfig::default()),
    }
}

fn load_prober(args: &UsageArgs) -> Result<Box<dyn DiskUsageProber>> {
    Ok(match &args.usage_file {
        Some(path) => Box::new(SnapshotUsageProber::load(path)?),
        None => Box::new(NoopUsageProber),
    })
}

fn execute(
    inventory: &InventoryArgs,
    prober: &dyn DiskUsageProber,
    options: AuditOptions,
) -> Result<AuditReport> {
    let config = load_config(inventory.config.as_deref())?;
    let gateway = SnapshotInventory::new(&inventory.snapshots);
    let options = AuditOptions {
        regions: inventory.regions.clone(),
        ..options
    };
    run_audit(&config, &gateway, prober, &options)
}

fn usage_options(usage: &UsageArgs, sort: CliSortKey) -> AuditOptions {
    AuditOptions {
        include_usage: usage.usage,
        sort_key: sort.into(),
        ..AuditOptions::default()
    }
}

fn write_json<T: Serialize>(value: &T, output: &Path) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    fs::write(output, payload)
        .with_context(|| format!("failed to write output to {}", output.display()))?;
    println!("JSON written to {}", output.display());
    Ok(())
}

// Region-keyed output, mirroring the per-region JSON the collectors emit.
fn emit_by_region<T, F>(report: &AuditReport, args: &InventoryArgs, select: F) -> Result<bool>
where
    T: Serialize,
    F: Fn(&RegionReport) -> T,
{
    if !args.json && args.output.is_none() {
        return Ok(false);
    }
    let by_region = report
        .regions
        .iter()
        .map(|region| (region.region.clone(), select(region)))
        .collect::<BTreeMap<_, _>>();
    if let Some(output) = &args.output {
        write_json(&by_region, output)?;
    }
    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&by_region).context("failed to serialize output")?
        );
    }
    Ok(args.json)
}

fn run_subnets_command(args: SubnetsArgs) -> Result<()> {
    let prober = load_prober(&args.usage)?;
    let report = execute(
        &args.inventory,
        &*prober,
        usage_options(&args.usage, args.sort),
    )?;

    if !emit_by_region(&report, &args.inventory, |region| region.subnets.clone())? {
        for region in &report.regions {
            print_region_header(region);
            println!(
                "{:<20} {:<24} {:>5} {:>6} {:>8} {:>5} {:>8} {:>8} {:>4} {:>9}",
                "CIDR", "NAME", "VMS", "ACTIVE", "MIGRATED", "DNM", "UNLINKED", "PENDING", "HVS",
                "USAGE"
            );
            for group in &region.subnets {
                println!(
                    "{:<20} {:<24} {:>5} {:>6} {:>8} {:>5} {:>8} {:>8} {:>4} {:>9}",
                    group.key,
                    truncate(&group.display_name, 24),
                    group.member_count,
                    group.active_count,
                    group.migrated,
                    group.do_not_migrate,
                    group.unlinked,
                    group.to_be_migrated,
                    group.hypervisor_count,
                    group.total_usage.as_deref().unwrap_or("-")
                );
            }
            print_totals(region);
        }
    }
    print_failures(&report);
    Ok(())
}

fn run_zones_command(args: InventoryArgs) -> Result<()> {
    let report = execute(&args, &NoopUsageProber, AuditOptions::default())?;

    if !emit_by_region(&report, &args, |region| region.zones.clone())? {
        for region in &report.regions {
            print_region_header(region);
            println!(
                "{:<20} {:>5} {:>6} {:>8} {:>5} {:>8} {:>8} {:>4}  {}",
                "ZONE", "VMS", "ACTIVE", "MIGRATED", "DNM", "UNLINKED", "PENDING", "HVS",
                "DESTINATION ZONES"
            );
            for zone in &region.zones {
                println!(
                    "{:<20} {:>5} {:>6} {:>8} {:>5} {:>8} {:>8} {:>4}  {}",
                    zone.zone,
                    zone.member_count,
                    zone.active_count,
                    zone.migrated,
                    zone.do_not_migrate,
                    zone.unlinked,
                    zone.to_be_migrated,
                    zone.hypervisor_count,
                    zone.destination_zones.join(", ")
                );
            }
            print_totals(region);
        }
    }
    print_failures(&report);
    Ok(())
}

fn run_projects_command(args: InventoryArgs) -> Result<()> {
    let report = execute(&args, &NoopUsageProber, AuditOptions::default())?;

    if !emit_by_region(&report, &args, |region| region.projects.clone())? {
        for region in &report.regions {
            print_region_header(region);
            let findings = &region.projects;

            println!("Dangling migrate_to links: {}", findings.dangling_links.len());
            for link in &findings.dangling_links {
                println!(
                    "- {} ({}) [{}] -> {}",
                    link.project_name, link.project_id, link.owning_group, link.migrate_to
                );
            }

            println!("Unlinked projects with workloads: {}", findings.unlinked_projects.len());
            for project in &findings.unlinked_projects {
                println!(
                    "- {} - {} - {} ({} workload(s))",
                    project.project_name,
                    project.project_id,
                    project.owning_group,
                    project.workloads.len()
                );
                for workload in &project.workloads {
                    println!(
                        "    {} {} {}",
                        workload.name,
                        workload.id,
                        workload.host.as_deref().unwrap_or("-")
                    );
                }
            }

            println!("Empty projects: {}", findings.empty_projects.len());
            for project in &findings.empty_projects {
                println!(
                    "- {} ({}) [{}]",
                    project.project_name, project.project_id, project.owning_group
                );
            }
        }
    }
    print_failures(&report);
    Ok(())
}

fn run_owners_command(args: OwnersArgs) -> Result<()> {
    let options = AuditOptions {
        owning_group: Some(args.group.clone()),
        ..AuditOptions::default()
    };
    let report = execute(&args.inventory, &NoopUsageProber, options)?;

    if !emit_by_region(&report, &args.inventory, |region| {
        region.owning_group_subnets.clone()
    })? {
        for region in &report.regions {
            print_region_header(region);
            println!(
                "Subnets with workloads owned by '{}': {}",
                args.group,
                region.owning_group_subnets.len()
            );
            for subnet in &region.owning_group_subnets {
                println!(
                    "{} - {} - {} ({} workload(s))",
                    subnet.key,
                    subnet.subnet_id,
                    subnet.network_name,
                    subnet.workloads.len()
                );
                for workload in &subnet.workloads {
                    println!(
                        "    {:<32} {:<38} {}",
                        truncate(&workload.name, 32),
                        workload.id,
                        workload.owning_group
                    );
                }
            }
        }
    }
    print_failures(&report);
    Ok(())
}

fn run_hypervisors_command(args: InventoryArgs) -> Result<()> {
    let report = execute(&args, &NoopUsageProber, AuditOptions::default())?;

    if !emit_by_region(&report, &args, |region| {
        serde_json::json!({
            "capacity": region.capacity,
            "idle": region.idle_hypervisors,
            "drained": region.drained_hypervisors,
        })
    })? {
        for region in &report.regions {
            print_region_header(region);
            let capacity = &region.capacity;
            println!("Hypervisors: {}", capacity.hypervisor_count);
            println!("Hypervisors with 0 running VMs: {}", capacity.idle_count);
            println!("Total disk used: {} GB", capacity.disk_used_gb);
            println!("Total free space: {} GB", capacity.disk_free_gb);
            println!(
                "{:<24} {:<6} {:>10} {:>10} {:>10} {:>6} {:>5}",
                "NAME", "STATE", "SIZE GB", "USED GB", "FREE GB", "USE %", "VMS"
            );
            for hypervisor in &capacity.hypervisors {
                println!(
                    "{:<24} {:<6} {:>10} {:>10} {:>10} {:>6.1} {:>5}",
                    truncate(&hypervisor.name, 24),
                    hypervisor.state.as_deref().unwrap_or("-"),
                    hypervisor.disk_size_gb,
                    hypervisor.disk_used_gb,
                    hypervisor.disk_free_gb,
                    hypervisor.use_percent,
                    hypervisor
                        .running_vms
                        .map_or_else(|| "-".to_string(), |vms| vms.to_string())
                );
            }
            if !region.idle_hypervisors.is_empty() {
                println!("Idle hypervisors: {}", region.idle_hypervisors.join(", "));
            }
            if !region.drained_hypervisors.is_empty() {
                println!(
                    "Fully migrated hypervisors: {}",
                    region.drained_hypervisors.join(", ")
                );
            }
        }
    }
    print_failures(&report);
    Ok(())
}

fn run_audit_command(args: AuditArgs) -> Result<()> {
    let prober = load_prober(&args.usage)?;
    let report = execute(
        &args.inventory,
        &*prober,
        usage_options(&args.usage, args.sort),
    )?;
    let output = args.inventory.output.as_ref().unwrap_or(&args.report);

    let payload = serde_json::to_string_pretty(&report).context("failed to serialize report")?;
    fs::write(output, payload)
        .with_context(|| format!("failed to write report to {}", output.display()))?;

    println!("Report written to {}", output.display());
    println!(
        "Audited {} region(s), {} failed, {} warning(s).",
        report.regions.len(),
        report.failures.len(),
        report.warnings.len()
            + report
                .regions
                .iter()
                .map(|region| region.warnings.len())
                .sum::<usize>()
    );
    for region in &report.regions {
        print_totals(region);
    }
    print_failures(&report);
    Ok(())
}

fn run_check_config_command(args: CheckConfigArgs) -> Result<()> {
    let config = AuditConfig::load(&args.config)?;
    println!("Config {} is valid.", args.config.display());
    for (source, destination) in &config.region_pairs {
        println!("- {source} -> {destination}");
    }
    println!("Audited regions: {}", config.audited_regions().join(", "));
    println!(
        "Overlap: {:?}, usage scope: {:?}, usage strategy: {:?}",
        config.overlap_strategy, config.usage_scope, config.usage_strategy
    );
    Ok(())
}

fn print_region_header(region: &RegionReport) {
    println!("----------------------------------------------");
    println!("{} -> {}", region.region, region.destination_region);
    for warning in &region.warnings {
        println!("Warning: {warning}");
    }
}

fn print_totals(region: &RegionReport) {
    let totals = &region.totals;
    println!(
        "{}: active {} | migrated {} (+{} inactive) | do_not_migrate {} | unlinked {} | to be migrated {}",
        region.region,
        totals.active,
        totals.migrated,
        totals.migrated_inactive,
        totals.do_not_migrate,
        totals.unlinked,
        totals.to_be_migrated
    );
}

fn print_failures(report: &AuditReport) {
    for failure in &report.failures {
        println!("Region {} failed: {}", failure.region, failure.error);
    }
    for warning in &report.warnings {
        println!("Warning: {warning}");
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        return value.to_string();
    }
    let mut shortened = value.chars().take(width.saturating_sub(1)).collect::<String>();
    shortened.push('~');
    shortened
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{truncate, Cli, Commands};

    #[test]
    fn parses_repeatable_regions_and_usage_flags() {
        let cli = Cli::parse_from([
            "fleet-audit",
            "subnets",
            "--region",
            "iad_private",
            "--region",
            "sin_private",
            "--usage",
            "--usage-file",
            "usage.json",
            "--sort",
            "to-be-migrated",
        ]);
        match cli.command {
            Commands::Subnets(args) => {
                assert_eq!(args.inventory.regions, vec!["iad_private", "sin_private"]);
                assert!(args.usage.usage);
                assert!(args.usage.usage_file.is_some());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn usage_flag_and_usage_file_require_each_other() {
        assert!(Cli::try_parse_from(["fleet-audit", "subnets", "--usage-file", "u.json"]).is_err());
        assert!(Cli::try_parse_from(["fleet-audit", "subnets", "--usage"]).is_err());
        assert!(Cli::try_parse_from(["fleet-audit", "audit", "--usage"]).is_err());
    }

    #[test]
    fn owners_requires_a_group() {
        assert!(Cli::try_parse_from(["fleet-audit", "owners"]).is_err());
        let cli = Cli::parse_from(["fleet-audit", "owners", "--group", "Web Platform"]);
        match cli.command {
            Commands::Owners(args) => assert_eq!(args.group, "Web Platform"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn truncates_long_names() {
        assert_eq!(truncate("short", 24), "short");
        assert_eq!(truncate("abcdefghij", 5), "abcd~");
    }
}
