use std::collections::HashMap;
use std::error::Error as _;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use chrono::{SecondsFormat, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::aggregate::{
    aggregate_owning_group, aggregate_subnets, aggregate_zones, sort_group_reports, UsageOptions,
};
use crate::classify::{classify_region, Classifier};
use crate::config::AuditConfig;
use crate::error::AuditError;
use crate::inventory::{fetch_region_context, InventoryGateway, RegionContext};
use crate::model::{
    AuditMetadata, AuditPhase, AuditPhaseCount, AuditProgressEvent, AuditProgressSummary,
    AuditReport, GroupSortKey, RegionFailure, RegionMetrics, RegionPair, RegionReport,
    REPORT_VERSION,
};
use crate::hypervisors::{drained_hypervisors, hypervisor_capacity, idle_hypervisors};
use crate::projects::validate_projects;
use crate::usage::DiskUsageProber;

#[derive(Debug, Clone, Default)]
pub struct AuditOptions {
    pub regions: Vec<String>,
    pub include_usage: bool,
    pub sort_key: GroupSortKey,
    pub audit_id: Option<String>,
    pub emit_progress_events: bool,
    pub cancel_flag: Option<Arc<AtomicBool>>,
    pub owning_group: Option<String>,
}

#[derive(Clone, Copy)]
struct RegionRun<'a> {
    usage_prober: Option<&'a dyn DiskUsageProber>,
    sort_key: GroupSortKey,
    owning_group: Option<&'a str>,
}

pub struct AuditRunOutput {
    pub report: AuditReport,
    pub events: Vec<AuditProgressEvent>,
}

pub fn run_audit(
    config: &AuditConfig,
    gateway: &dyn InventoryGateway,
    prober: &dyn DiskUsageProber,
    options: &AuditOptions,
) -> Result<AuditReport> {
    run_audit_with_callback(config, gateway, prober, options, |_| {})
}

pub fn run_audit_with_events(
    config: &AuditConfig,
    gateway: &dyn InventoryGateway,
    prober: &dyn DiskUsageProber,
    options: &AuditOptions,
) -> Result<AuditRunOutput> {
    let mut events = Vec::new();
    let report =
        run_audit_with_callback(config, gateway, prober, options, |event| events.push(event))?;
    Ok(AuditRunOutput { report, events })
}

pub fn run_audit_with_callback<F>(
    config: &AuditConfig,
    gateway: &dyn InventoryGateway,
    prober: &dyn DiskUsageProber,
    options: &AuditOptions,
    mut on_event: F,
) -> Result<AuditReport>
where
    F: FnMut(AuditProgressEvent),
{
    config.validate()?;
    let regions = if options.regions.is_empty() {
        config.audited_regions()
    } else {
        options.regions.clone()
    };
    if regions.is_empty() {
        return Err(anyhow!("no source regions selected for audit"));
    }

    let audit_id = options
        .audit_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let total_regions = regions.len() as u64;
    let run = RegionRun {
        usage_prober: options.include_usage.then_some(prober),
        sort_key: options.sort_key,
        owning_group: options.owning_group.as_deref(),
    };

    let mut warnings = Vec::new();
    let mut reports = Vec::new();
    let mut failures = Vec::new();
    let mut total_events = 0_u64;
    let mut phase_counts: HashMap<AuditPhase, u64> = HashMap::new();
    let mut cancelled = false;

    info!(%audit_id, regions = total_regions, "starting migration audit");

    for (index, region) in regions.iter().enumerate() {
        if is_cancelled(options) {
            warnings.push(format!(
                "audit canceled by caller; {} region(s) not audited",
                regions.len() - index
            ));
            cancelled = true;
            break;
        }

        let pair = match config.region_pair(region) {
            Ok(pair) => pair,
            Err(err) => {
                warn!(region = %region, error = %err, "skipping region");
                failures.push(region_failure(region, &err));
                continue;
            }
        };

        let errors = failures.len() as u64;
        let outcome = {
            let mut on_phase = |phase: AuditPhase| {
                emit_audit_event(
                    options,
                    &mut on_event,
                    &audit_id,
                    &mut total_events,
                    &mut phase_counts,
                    phase,
                    Some(region.clone()),
                    index as u64,
                    total_regions,
                    errors,
                );
            };
            audit_pair(gateway, &pair, config, run, &mut on_phase)
        };

        match outcome {
            Ok(report) => reports.push(report),
            Err(err) => {
                warn!(region = %region, error = %err, "region audit failed");
                failures.push(region_failure(region, &err));
            }
        }
    }

    emit_audit_event(
        options,
        &mut on_event,
        &audit_id,
        &mut total_events,
        &mut phase_counts,
        AuditPhase::Done,
        None,
        (reports.len() + failures.len()) as u64,
        total_regions,
        failures.len() as u64,
    );

    let mut phase_counts = phase_counts
        .into_iter()
        .map(|(phase, events)| AuditPhaseCount { phase, events })
        .collect::<Vec<_>>();
    phase_counts.sort_by_key(|count| phase_rank(&count.phase));

    info!(
        %audit_id,
        audited = reports.len(),
        failed = failures.len(),
        "migration audit finished"
    );

    Ok(AuditReport {
        report_version: REPORT_VERSION.to_string(),
        generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        audit_id,
        audit: AuditMetadata {
            regions,
            include_usage: options.include_usage,
            usage_scope: config.usage_scope,
            usage_strategy: config.usage_strategy,
            overlap_strategy: config.overlap_strategy,
            sort_key: options.sort_key,
        },
        regions: reports,
        failures,
        progress_summary: AuditProgressSummary {
            total_events,
            phase_counts,
            completed: !cancelled,
        },
        warnings,
    })
}

pub fn audit_region(
    context: &RegionContext,
    config: &AuditConfig,
    usage_prober: Option<&dyn DiskUsageProber>,
    sort_key: GroupSortKey,
) -> Result<RegionReport, AuditError> {
    let run = RegionRun {
        usage_prober,
        sort_key,
        owning_group: None,
    };
    audit_context(context, config, run, Vec::new(), Instant::now(), &mut |_| {})
}

fn audit_pair(
    gateway: &dyn InventoryGateway,
    pair: &RegionPair,
    config: &AuditConfig,
    run: RegionRun<'_>,
    on_phase: &mut dyn FnMut(AuditPhase),
) -> Result<RegionReport, AuditError> {
    let started = Instant::now();
    let mut warnings = Vec::new();
    on_phase(AuditPhase::LoadingInventory);
    let context = fetch_region_context(
        gateway,
        pair,
        Duration::from_millis(config.project_retry_delay_ms),
        &mut warnings,
    )?;
    audit_context(&context, config, run, warnings, started, on_phase)
}

fn audit_context(
    context: &RegionContext,
    config: &AuditConfig,
    run: RegionRun<'_>,
    mut warnings: Vec<String>,
    started: Instant,
    on_phase: &mut dyn FnMut(AuditPhase),
) -> Result<RegionReport, AuditError> {
    let region = context.region();

    on_phase(AuditPhase::Classifying);
    let totals = classify_region(context)?.counts();
    let classifier = Classifier::for_context(context);
    let exclusions = config.exclusions.matchers_for(region, &mut warnings);

    on_phase(AuditPhase::GroupingSubnets);
    let usage = run.usage_prober.map(|prober| UsageOptions {
        prober,
        scope: config.usage_scope,
        strategy: config.usage_strategy,
    });
    if usage.is_some() {
        on_phase(AuditPhase::ProbingUsage);
    }
    let mut aggregation = aggregate_subnets(
        &context.source.subnets,
        &context.source.servers,
        &context.source.networks,
        &classifier,
        &exclusions,
        config.overlap_strategy,
        usage,
    );
    sort_group_reports(&mut aggregation.groups, run.sort_key);
    warnings.append(&mut aggregation.warnings);

    on_phase(AuditPhase::GroupingZones);
    let zones = aggregate_zones(
        &context.source.servers,
        &classifier,
        &exclusions,
        &config.zone_equivalents,
    );

    let owning_group_subnets = run.owning_group.map_or_else(Vec::new, |group| {
        aggregate_owning_group(
            &context.source.subnets,
            &context.source.servers,
            &context.source.networks,
            group,
            config.overlap_strategy,
        )
    });

    on_phase(AuditPhase::ValidatingProjects);
    let projects = validate_projects(
        &context.source.projects,
        &context.source.servers,
        &context.destination_projects,
    );

    let metrics = RegionMetrics {
        elapsed_ms: started.elapsed().as_millis().try_into().unwrap_or(u64::MAX),
        workloads: context.source.servers.len() as u64,
        active_workloads: totals.active,
        unplaced_workloads: aggregation.unplaced_workloads,
        projects: context.source.projects.len() as u64,
        subnet_groups: aggregation.groups.len() as u64,
        excluded_subnets: aggregation.excluded_subnets,
        destination_workloads: context.destination_servers.len() as u64,
        probe_calls: aggregation.probe_calls,
    };

    info!(
        region,
        active = totals.active,
        migrated = totals.migrated,
        to_be_migrated = totals.to_be_migrated,
        groups = metrics.subnet_groups,
        "region reconciled"
    );

    Ok(RegionReport {
        region: region.to_string(),
        destination_region: context.pair.destination.clone(),
        metrics,
        totals,
        subnets: aggregation.groups,
        zones,
        projects,
        idle_hypervisors: idle_hypervisors(&context.source.hypervisors),
        drained_hypervisors: drained_hypervisors(
            &context.source.hypervisors,
            &context.source.servers,
            &classifier,
        ),
        capacity: hypervisor_capacity(&context.source.hypervisors),
        owning_group_subnets,
        warnings,
    })
}

fn region_failure(region: &str, err: &AuditError) -> RegionFailure {
    let mut error = err.to_string();
    if let Some(source) = err.source() {
        error.push_str(": ");
        error.push_str(&source.to_string());
    }
    RegionFailure {
        region: region.to_string(),
        error,
    }
}

fn phase_rank(phase: &AuditPhase) -> u8 {
    match phase {
        AuditPhase::LoadingInventory => 0,
        AuditPhase::Classifying => 1,
        AuditPhase::GroupingSubnets => 2,
        AuditPhase::ProbingUsage => 3,
        AuditPhase::GroupingZones => 4,
        AuditPhase::ValidatingProjects => 5,
        AuditPhase::Done => 6,
    }
}

#[allow(clippy::too_many_arguments)]
fn emit_audit_event<F>(
    options: &AuditOptions,
    on_event: &mut F,
    audit_id: &str,
    total_events: &mut u64,
    phase_counts: &mut HashMap<AuditPhase, u64>,
    phase: AuditPhase,
    region: Option<String>,
    completed_regions: u64,
    total_regions: u64,
    errors: u64,
) where
    F: FnMut(AuditProgressEvent),
{
    *total_events = total_events.saturating_add(1);
    *phase_counts.entry(phase.clone()).or_insert(0) += 1;

    if options.emit_progress_events {
        on_event(AuditProgressEvent {
            seq: *total_events,
            audit_id: audit_id.to_string(),
            phase,
            region,
            completed_regions,
            total_regions,
            errors,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        });
    }
}

fn is_cancelled(options: &AuditOptions) -> bool {
    options
        .cancel_flag
        .as_ref()
        .is_some_and(|flag| flag.load(Ordering::Relaxed))
}
