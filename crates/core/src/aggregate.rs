use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use crate::classify::{ClassificationSets, Classifier};
use crate::config::RegionExclusions;
use crate::error::AuditError;
use crate::model::{
    GroupReport, GroupSortKey, Network, OverlapStrategy, OwnedWorkloadRef, OwningGroupSubnet,
    Subnet, UsageScope, UsageStrategy, Workload, ZoneReport,
};
use crate::placement::{build_subnet_groups, place, place_workloads};
use crate::projects::format_owning_group;
use crate::usage::{probe_each, probe_union, DiskUsageProber, UsageIndex};

pub const UNKNOWN_ZONE: &str = "unknown";

#[derive(Clone, Copy)]
pub struct UsageOptions<'p> {
    pub prober: &'p dyn DiskUsageProber,
    pub scope: UsageScope,
    pub strategy: UsageStrategy,
}

#[derive(Debug, Clone, Default)]
pub struct SubnetAggregation {
    pub groups: Vec<GroupReport>,
    pub unplaced_workloads: u64,
    pub excluded_subnets: u64,
    pub probe_calls: u64,
    pub warnings: Vec<String>,
}

struct GroupDraft {
    report: GroupReport,
    hosts: BTreeSet<String>,
    usage_ids: Vec<String>,
}

fn scoped_ids(sets: &ClassificationSets<'_>, scope: UsageScope) -> Vec<String> {
    match scope {
        UsageScope::Pending => sets.pending.iter().map(|w| w.id.clone()).collect(),
        UsageScope::Active => sets.active().map(|w| w.id.clone()).collect(),
    }
}

fn hosts_of<'a, I>(workloads: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a Workload>,
{
    workloads
        .into_iter()
        .filter_map(|workload| workload.host())
        .map(ToString::to_string)
        .collect()
}

pub fn aggregate_subnets(
    subnets: &[Subnet],
    workloads: &[Workload],
    networks: &[Network],
    classifier: &Classifier,
    exclusions: &RegionExclusions,
    overlap: OverlapStrategy,
    usage: Option<UsageOptions<'_>>,
) -> SubnetAggregation {
    let mut warnings = Vec::new();
    let placement = place(
        subnets,
        networks,
        workloads,
        exclusions,
        overlap,
        &mut warnings,
    );
    let scope = usage.map(|options| options.scope).unwrap_or_default();

    let mut drafts = placement
        .groups
        .iter()
        .map(|group| {
            let sets = classifier.partition(group.members.iter().copied());
            let counts = sets.counts();
            let hosts = hosts_of(group.members.iter().copied());
            let zones = group
                .members
                .iter()
                .filter_map(|workload| workload.zone())
                .map(ToString::to_string)
                .collect::<BTreeSet<_>>();

            GroupDraft {
                usage_ids: scoped_ids(&sets, scope),
                report: GroupReport {
                    key: group.key.clone(),
                    display_name: group.name.clone(),
                    subnet_id: Some(group.subnet_id.clone()),
                    network_name: Some(group.network_name.clone()),
                    member_count: group.members.len() as u64,
                    active_count: counts.active,
                    migrated: counts.migrated,
                    migrated_inactive: counts.migrated_inactive,
                    do_not_migrate: counts.do_not_migrate,
                    unlinked: counts.unlinked,
                    to_be_migrated: counts.to_be_migrated,
                    hypervisor_count: hosts.len() as u64,
                    hypervisors: hosts.iter().cloned().collect(),
                    zones: zones.into_iter().collect(),
                    total_usage: None,
                    total_usage_gb: None,
                },
                hosts,
            }
        })
        .collect::<Vec<_>>();

    let mut probe_calls = 0;
    if let Some(options) = usage {
        match probe_groups(options, &drafts) {
            Ok(probed) => {
                for (position, draft) in drafts.iter_mut().enumerate() {
                    let rollup = probed
                        .for_group(position)
                        .rollup(draft.usage_ids.iter().map(String::as_str));
                    draft.report.total_usage = Some(rollup.display());
                    draft.report.total_usage_gb = Some(rollup.total_gb);
                }
                probe_calls = probed.calls();
            }
            Err(err) => {
                warn!(error = %err, "disk usage unavailable for region");
                warnings.push(format!("disk usage unavailable: {err}."));
            }
        }
    }

    SubnetAggregation {
        groups: drafts.into_iter().map(|draft| draft.report).collect(),
        unplaced_workloads: placement.unplaced.len() as u64,
        excluded_subnets: placement.excluded_subnets,
        probe_calls,
        warnings,
    }
}

enum ProbedUsage {
    Shared(UsageIndex),
    PerGroup(Vec<UsageIndex>),
}

impl ProbedUsage {
    fn for_group(&self, position: usize) -> &UsageIndex {
        match self {
            Self::Shared(index) => index,
            Self::PerGroup(indexes) => &indexes[position],
        }
    }

    fn calls(&self) -> u64 {
        match self {
            Self::Shared(index) => index.calls(),
            Self::PerGroup(indexes) => indexes.iter().map(UsageIndex::calls).sum(),
        }
    }
}

fn probe_groups(
    options: UsageOptions<'_>,
    drafts: &[GroupDraft],
) -> Result<ProbedUsage, AuditError> {
    let host_sets = drafts.iter().map(|draft| &draft.hosts);
    match options.strategy {
        UsageStrategy::Batched => probe_union(options.prober, host_sets).map(ProbedUsage::Shared),
        UsageStrategy::PerGroup => probe_each(options.prober, host_sets).map(ProbedUsage::PerGroup),
    }
}

pub fn sort_group_reports(reports: &mut [GroupReport], key: GroupSortKey) {
    reports.sort_by(|left, right| {
        let primary = match key {
            GroupSortKey::MemberCount => right.member_count.cmp(&left.member_count),
            GroupSortKey::ToBeMigrated => right.to_be_migrated.cmp(&left.to_be_migrated),
            GroupSortKey::Usage => right
                .total_usage_gb
                .unwrap_or(-1.0)
                .partial_cmp(&left.total_usage_gb.unwrap_or(-1.0))
                .unwrap_or(Ordering::Equal),
            GroupSortKey::Key => Ordering::Equal,
        };
        primary.then_with(|| left.key.cmp(&right.key))
    });
}

pub fn aggregate_zones(
    workloads: &[Workload],
    classifier: &Classifier,
    exclusions: &RegionExclusions,
    zone_equivalents: &BTreeMap<String, String>,
) -> Vec<ZoneReport> {
    let mut by_zone: BTreeMap<&str, Vec<&Workload>> = BTreeMap::new();
    for workload in workloads {
        let zone = workload.zone().unwrap_or(UNKNOWN_ZONE);
        if exclusions.excludes_zone(zone) {
            continue;
        }
        by_zone.entry(zone).or_default().push(workload);
    }

    let mut reports = by_zone
        .into_iter()
        .map(|(zone, members)| {
            let sets = classifier.partition(members.iter().copied());
            let counts = sets.counts();
            let destination_zone = |workload: &Workload| {
                classifier
                    .confirmed_destination(workload)
                    .and_then(|id| classifier.destination().destination_zone(id))
                    .map(ToString::to_string)
            };
            let destination_zones = sets
                .migrated
                .iter()
                .chain(&sets.migrated_inactive)
                .filter_map(|workload| destination_zone(*workload))
                .collect::<BTreeSet<_>>();
            let accounted_in_destination = zone_equivalents.get(zone).map_or(0, |equivalent| {
                sets.migrated
                    .iter()
                    .filter(|workload| {
                        destination_zone(**workload).as_deref() == Some(equivalent.as_str())
                    })
                    .count() as u64
            });

            ZoneReport {
                zone: zone.to_string(),
                member_count: members.len() as u64,
                active_count: counts.active,
                migrated: counts.migrated,
                migrated_inactive: counts.migrated_inactive,
                do_not_migrate: counts.do_not_migrate,
                unlinked: counts.unlinked,
                to_be_migrated: counts.to_be_migrated,
                hypervisor_count: hosts_of(members.iter().copied()).len() as u64,
                destination_zones: destination_zones.into_iter().collect(),
                accounted_in_destination,
            }
        })
        .collect::<Vec<_>>();

    reports.sort_by(|left, right| {
        right
            .member_count
            .cmp(&left.member_count)
            .then_with(|| left.zone.cmp(&right.zone))
    });
    reports
}

pub fn aggregate_owning_group(
    subnets: &[Subnet],
    workloads: &[Workload],
    networks: &[Network],
    group: &str,
    overlap: OverlapStrategy,
) -> Vec<OwningGroupSubnet> {
    let needle = group.trim().to_lowercase();
    let owned = workloads.iter().filter(|workload| {
        workload
            .owning_group()
            .is_some_and(|owner| owner.to_lowercase().contains(&needle))
    });

    // Unknown-network warnings are already reported by the subnet view.
    let (mut groups, _) =
        build_subnet_groups(subnets, networks, &RegionExclusions::default(), &mut Vec::new());
    place_workloads(&mut groups, owned, overlap);

    groups
        .into_iter()
        .filter(|group| !group.members.is_empty())
        .map(|group| OwningGroupSubnet {
            key: group.key,
            subnet_id: group.subnet_id,
            network_name: group.network_name,
            workloads: group
                .members
                .iter()
                .map(|workload| OwnedWorkloadRef {
                    id: workload.id.clone(),
                    name: workload.name.clone(),
                    owning_group: format_owning_group(workload.owning_group()),
                })
                .collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::collections::{BTreeMap, BTreeSet, HashMap};

    use anyhow::{anyhow, Result};

    use super::{
        aggregate_owning_group, aggregate_subnets, aggregate_zones, sort_group_reports,
        ProbedUsage, UsageOptions,
    };
    use crate::classify::Classifier;
    use crate::config::ExclusionPolicy;
    use crate::model::{
        AddressEntry, AddressGroup, GroupSortKey, Network, OverlapStrategy, Project, Subnet,
        UsageScope, UsageStrategy, Workload,
    };
    use crate::usage::{DiskUsageProber, UsageIndex};

    struct FixedProber {
        calls: Cell<u32>,
        fail: bool,
    }

    impl DiskUsageProber for FixedProber {
        fn usage(&self, _hypervisors: &BTreeSet<String>) -> Result<HashMap<String, String>> {
            self.calls.set(self.calls.get() + 1);
            if self.fail {
                return Err(anyhow!("connection refused"));
            }
            Ok(HashMap::from([
                ("w1".to_string(), "2G".to_string()),
                ("w2".to_string(), "512M".to_string()),
                ("w4".to_string(), "512M".to_string()),
                ("w5".to_string(), "1G".to_string()),
            ]))
        }
    }

    fn workload(
        id: &str,
        project_id: &str,
        status: &str,
        addr: &str,
        host: &str,
        zone: &str,
        meta: &[(&str, &str)],
    ) -> Workload {
        Workload {
            id: id.to_string(),
            name: id.to_string(),
            status: status.to_string(),
            project_id: project_id.to_string(),
            host: Some(host.to_string()),
            addresses: vec![AddressGroup {
                network: "net".to_string(),
                entries: vec![AddressEntry {
                    addr: addr.to_string(),
                    addr_type: None,
                }],
            }],
            metadata: meta
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
            availability_zone: Some(zone.to_string()),
        }
    }

    fn project(id: &str, migrate_to: Option<&str>) -> Project {
        Project {
            id: id.to_string(),
            name: id.to_string(),
            meta: migrate_to
                .map(|value| BTreeMap::from([("migrate_to".to_string(), value.to_string())]))
                .unwrap_or_default(),
        }
    }

    fn subnets() -> Vec<Subnet> {
        vec![
            Subnet {
                id: "s-app".to_string(),
                name: "app".to_string(),
                cidr: "10.0.0.0/24".to_string(),
                network_id: "n1".to_string(),
            },
            Subnet {
                id: "s-db".to_string(),
                name: "db".to_string(),
                cidr: "10.0.1.0/24".to_string(),
                network_id: "n1".to_string(),
            },
        ]
    }

    fn networks() -> Vec<Network> {
        vec![Network {
            id: "n1".to_string(),
            name: "internal".to_string(),
        }]
    }

    fn fleet() -> (Vec<Workload>, Vec<Project>, Vec<Workload>) {
        let workloads = vec![
            workload("w1", "p1", "ACTIVE", "10.0.0.5", "hv1", "az1", &[]),
            workload(
                "w2",
                "p2",
                "ACTIVE",
                "10.0.0.6",
                "hv2",
                "az1",
                &[("migration_dst", "d1")],
            ),
            workload("w3", "p1", "SHUTOFF", "10.0.0.7", "hv1", "az1", &[]),
            workload("w4", "p2", "ACTIVE", "10.0.1.4", "hv3", "az2", &[]),
            workload("w5", "p2", "ACTIVE", "10.0.1.5", "hv3", "gen-az", &[]),
        ];
        let projects = vec![project("p1", None), project("p2", Some("team-x"))];
        let mut d1 = workload("d1", "q", "ACTIVE", "10.9.0.1", "dhv", "new-az1", &[]);
        d1.metadata
            .insert("migration_src".to_string(), "w2".to_string());
        (workloads, projects, vec![d1])
    }

    #[test]
    fn subnet_counts_partition_active_members() {
        let (workloads, projects, destination) = fleet();
        let classifier = Classifier::new(&projects, &destination);
        let exclusions = ExclusionPolicy::default().matchers_for("iad_private", &mut Vec::new());

        let aggregation = aggregate_subnets(
            &subnets(),
            &workloads,
            &networks(),
            &classifier,
            &exclusions,
            OverlapStrategy::MostSpecific,
            None,
        );
        let app = &aggregation.groups[0];

        assert_eq!(app.key, "10.0.0.0/24");
        assert_eq!(app.member_count, 3);
        assert_eq!(app.active_count, 2);
        assert_eq!(app.migrated, 1);
        assert_eq!(app.do_not_migrate, 0);
        assert_eq!(app.unlinked, 1);
        assert_eq!(app.to_be_migrated, 0);
        assert_eq!(app.hypervisors, vec!["hv1", "hv2"]);
        assert_eq!(app.zones, vec!["az1"]);
        assert_eq!(app.total_usage, None);
        assert!(app.counts().is_partitioned());
        assert_eq!(aggregation.probe_calls, 0);
    }

    #[test]
    fn batched_usage_runs_once_and_restricts_to_pending() {
        let (workloads, projects, destination) = fleet();
        let classifier = Classifier::new(&projects, &destination);
        let exclusions = ExclusionPolicy::default().matchers_for("iad_private", &mut Vec::new());
        let prober = FixedProber {
            calls: Cell::new(0),
            fail: false,
        };

        let aggregation = aggregate_subnets(
            &subnets(),
            &workloads,
            &networks(),
            &classifier,
            &exclusions,
            OverlapStrategy::MostSpecific,
            Some(UsageOptions {
                prober: &prober,
                scope: UsageScope::Pending,
                strategy: UsageStrategy::Batched,
            }),
        );

        assert_eq!(prober.calls.get(), 1);
        assert_eq!(aggregation.probe_calls, 1);
        assert_eq!(aggregation.groups[0].total_usage.as_deref(), Some("0.0G"));
        assert_eq!(aggregation.groups[1].total_usage.as_deref(), Some("1.5G"));
    }

    #[test]
    fn batched_usage_result_is_shared_by_every_group() {
        let mut index = UsageIndex::default();
        index.merge(HashMap::from([("w1".to_string(), "2G".to_string())]));
        let probed = ProbedUsage::Shared(index);

        assert!(std::ptr::eq(probed.for_group(0), probed.for_group(7)));
        assert_eq!(probed.calls(), 1);
        assert_eq!(probed.for_group(7).rollup(["w1"]).display(), "2.0G");
    }

    #[test]
    fn per_group_usage_with_active_scope() {
        let (workloads, projects, destination) = fleet();
        let classifier = Classifier::new(&projects, &destination);
        let exclusions = ExclusionPolicy::default().matchers_for("iad_private", &mut Vec::new());
        let prober = FixedProber {
            calls: Cell::new(0),
            fail: false,
        };

        let aggregation = aggregate_subnets(
            &subnets(),
            &workloads,
            &networks(),
            &classifier,
            &exclusions,
            OverlapStrategy::MostSpecific,
            Some(UsageOptions {
                prober: &prober,
                scope: UsageScope::Active,
                strategy: UsageStrategy::PerGroup,
            }),
        );

        assert_eq!(prober.calls.get(), 2);
        assert_eq!(aggregation.probe_calls, 2);
        assert_eq!(aggregation.groups[0].total_usage.as_deref(), Some("2.5G"));
        assert_eq!(aggregation.groups[0].total_usage_gb, Some(2.5));
    }

    #[test]
    fn prober_failure_blanks_usage_and_warns() {
        let (workloads, projects, destination) = fleet();
        let classifier = Classifier::new(&projects, &destination);
        let exclusions = ExclusionPolicy::default().matchers_for("iad_private", &mut Vec::new());
        let prober = FixedProber {
            calls: Cell::new(0),
            fail: true,
        };

        let aggregation = aggregate_subnets(
            &subnets(),
            &workloads,
            &networks(),
            &classifier,
            &exclusions,
            OverlapStrategy::MostSpecific,
            Some(UsageOptions {
                prober: &prober,
                scope: UsageScope::Pending,
                strategy: UsageStrategy::Batched,
            }),
        );

        assert!(aggregation
            .groups
            .iter()
            .all(|group| group.total_usage.is_none()));
        assert_eq!(aggregation.warnings.len(), 1);
        assert_eq!(aggregation.groups[0].member_count, 3);
    }

    #[test]
    fn sorting_by_usage_puts_missing_usage_last() {
        let (workloads, projects, destination) = fleet();
        let classifier = Classifier::new(&projects, &destination);
        let exclusions = ExclusionPolicy::default().matchers_for("iad_private", &mut Vec::new());
        let mut groups = aggregate_subnets(
            &subnets(),
            &workloads,
            &networks(),
            &classifier,
            &exclusions,
            OverlapStrategy::MostSpecific,
            None,
        )
        .groups;

        groups[1].total_usage_gb = Some(4.0);
        sort_group_reports(&mut groups, GroupSortKey::Usage);
        assert_eq!(groups[0].key, "10.0.1.0/24");

        sort_group_reports(&mut groups, GroupSortKey::MemberCount);
        assert_eq!(groups[0].key, "10.0.0.0/24");

        sort_group_reports(&mut groups, GroupSortKey::Key);
        assert_eq!(groups[1].key, "10.0.1.0/24");
    }

    #[test]
    fn zones_skip_excluded_names_and_report_destinations() {
        let (workloads, projects, destination) = fleet();
        let classifier = Classifier::new(&projects, &destination);
        let exclusions = ExclusionPolicy::default().matchers_for("iad_private", &mut Vec::new());
        let equivalents = BTreeMap::from([("az1".to_string(), "new-az1".to_string())]);

        let zones = aggregate_zones(&workloads, &classifier, &exclusions, &equivalents);

        assert_eq!(zones.len(), 2);
        assert_eq!(zones[0].zone, "az1");
        assert_eq!(zones[0].member_count, 3);
        assert_eq!(zones[0].migrated, 1);
        assert_eq!(zones[0].unlinked, 1);
        assert_eq!(zones[0].hypervisor_count, 2);
        assert_eq!(zones[0].destination_zones, vec!["new-az1"]);
        assert_eq!(zones[0].accounted_in_destination, 1);
        assert_eq!(zones[1].zone, "az2");
        assert_eq!(zones[1].to_be_migrated, 1);
        assert!(zones.iter().all(|zone| zone.zone != "gen-az"));
    }

    #[test]
    fn confirmed_move_outranks_do_not_migrate_within_a_subnet() {
        let workloads = vec![
            workload("w1", "p-open", "ACTIVE", "10.0.0.10", "hv1", "az1", &[]),
            workload(
                "w2",
                "p-frozen",
                "ACTIVE",
                "10.0.0.11",
                "hv1",
                "az1",
                &[("migration_dst", "d1")],
            ),
        ];
        let projects = vec![
            project("p-open", None),
            project("p-frozen", Some("do_not_migrate")),
        ];
        let destination = vec![workload(
            "d1",
            "q",
            "ACTIVE",
            "10.9.0.1",
            "dhv",
            "new-az1",
            &[("migration_src", "w2")],
        )];
        let classifier = Classifier::new(&projects, &destination);
        let exclusions = ExclusionPolicy::default().matchers_for("iad_private", &mut Vec::new());

        let aggregation = aggregate_subnets(
            &subnets(),
            &workloads,
            &networks(),
            &classifier,
            &exclusions,
            OverlapStrategy::MostSpecific,
            None,
        );
        let app = &aggregation.groups[0];

        assert_eq!(app.key, "10.0.0.0/24");
        assert_eq!(app.active_count, 2);
        assert_eq!(app.migrated, 1);
        assert_eq!(app.do_not_migrate, 0);
        assert_eq!(app.unlinked, 1);
        assert_eq!(app.to_be_migrated, 0);
        assert_eq!(aggregation.groups[1].member_count, 0);
    }

    #[test]
    fn owning_group_view_lists_only_matching_workloads() {
        let (mut workloads, _, _) = fleet();
        workloads[0]
            .metadata
            .insert("owning_group".to_string(), "Acme - Storage".to_string());
        workloads[3]
            .metadata
            .insert("owning_group".to_string(), "acme - storage ops".to_string());
        workloads[1]
            .metadata
            .insert("owning_group".to_string(), "Acme - Web".to_string());
        let mut all_subnets = subnets();
        all_subnets.push(Subnet {
            id: "s-float".to_string(),
            name: "floating-pool".to_string(),
            cidr: "10.0.2.0/24".to_string(),
            network_id: "n1".to_string(),
        });

        let found = aggregate_owning_group(
            &all_subnets,
            &workloads,
            &networks(),
            "STORAGE",
            OverlapStrategy::MostSpecific,
        );

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].key, "10.0.0.0/24");
        assert_eq!(found[0].workloads.len(), 1);
        assert_eq!(found[0].workloads[0].id, "w1");
        assert_eq!(found[0].workloads[0].owning_group, "Storage");
        assert_eq!(found[1].subnet_id, "s-db");
        assert_eq!(found[1].workloads[0].owning_group, "storage ops");
    }
}
