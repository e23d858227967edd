pub mod aggregate;
pub mod audit;
pub mod classify;
pub mod config;
pub mod error;
pub mod hypervisors;
pub mod inventory;
pub mod matcher;
pub mod model;
pub mod placement;
pub mod projects;
pub mod usage;

pub use aggregate::{
    aggregate_owning_group, aggregate_subnets, aggregate_zones, sort_group_reports,
    SubnetAggregation, UsageOptions,
};
pub use audit::{
    audit_region, run_audit, run_audit_with_callback, run_audit_with_events, AuditOptions,
    AuditRunOutput,
};
pub use classify::{classify, classify_region, ClassificationSets, Classifier};
pub use config::{AuditConfig, ExclusionPolicy, RegionExclusions};
pub use error::AuditError;
pub use hypervisors::{drained_hypervisors, hypervisor_capacity, idle_hypervisors};
pub use inventory::{fetch_region_context, InventoryGateway, RegionContext, SnapshotInventory};
pub use model::{
    AuditMetadata, AuditPhase, AuditPhaseCount, AuditProgressEvent, AuditProgressSummary,
    AuditReport, Classification, ClassificationCounts, GroupReport, GroupSortKey,
    HypervisorCapacity, HypervisorUsage, Network, OverlapStrategy, OwnedWorkloadRef,
    OwningGroupSubnet, Project, ProjectFindings, RegionFailure, RegionPair, RegionReport, Subnet,
    UsageScope, UsageStrategy, Workload, ZoneReport, REPORT_VERSION,
};
pub use projects::{format_owning_group, validate_projects};
pub use usage::{
    format_usage_gb, parse_usage_gb, rollup_usage_gb, DiskUsageProber, NoopUsageProber,
    SnapshotUsageProber,
};
