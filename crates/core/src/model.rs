use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

pub const REPORT_VERSION: &str = "1.0.0";

pub const STATUS_ACTIVE: &str = "ACTIVE";
pub const META_MIGRATION_DST: &str = "migration_dst";
pub const META_MIGRATION_SRC: &str = "migration_src";
pub const META_OWNING_GROUP: &str = "owning_group";
pub const META_MIGRATE_TO: &str = "migrate_to";
pub const DO_NOT_MIGRATE: &str = "do_not_migrate";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workload {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default, alias = "tenant_id")]
    pub project_id: String,
    #[serde(
        default,
        alias = "hypervisor_hostname",
        alias = "OS-EXT-SRV-ATTR:hypervisor_hostname"
    )]
    pub host: Option<String>,
    #[serde(default, deserialize_with = "deserialize_address_groups")]
    pub addresses: Vec<AddressGroup>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default, alias = "OS-EXT-AZ:availability_zone")]
    pub availability_zone: Option<String>,
}

fn default_status() -> String {
    "UNKNOWN".to_string()
}

impl Workload {
    pub fn is_active(&self) -> bool {
        self.status == STATUS_ACTIVE
    }

    pub fn primary_address(&self) -> Option<&str> {
        self.addresses
            .first()
            .and_then(|group| group.entries.first())
            .map(|entry| entry.addr.as_str())
    }

    pub fn migration_dst(&self) -> Option<&str> {
        non_empty_meta(&self.metadata, META_MIGRATION_DST)
    }

    pub fn carries_migration_src(&self) -> bool {
        self.metadata.contains_key(META_MIGRATION_SRC)
    }

    pub fn owning_group(&self) -> Option<&str> {
        self.metadata.get(META_OWNING_GROUP).map(String::as_str)
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref().filter(|host| !host.trim().is_empty())
    }

    pub fn zone(&self) -> Option<&str> {
        self.availability_zone
            .as_deref()
            .filter(|zone| !zone.trim().is_empty())
    }
}

fn non_empty_meta<'a>(meta: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    meta.get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AddressGroup {
    pub network: String,
    pub entries: Vec<AddressEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AddressEntry {
    pub addr: String,
    #[serde(default, alias = "OS-EXT-IPS:type", alias = "type")]
    pub addr_type: Option<String>,
}

// Accepts both the canonical list form and the OpenStack object form
// (`{"net-a": [{"addr": ...}]}`), keeping the object's document order.
fn deserialize_address_groups<'de, D>(deserializer: D) -> Result<Vec<AddressGroup>, D::Error>
where
    D: Deserializer<'de>,
{
    struct AddressGroupsVisitor;

    impl<'de> Visitor<'de> for AddressGroupsVisitor {
        type Value = Vec<AddressGroup>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a list of address groups or a map of network name to addresses")
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Vec::new())
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: SeqAccess<'de>,
        {
            let mut groups = Vec::new();
            while let Some(group) = seq.next_element::<AddressGroup>()? {
                groups.push(group);
            }
            Ok(groups)
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut groups = Vec::new();
            while let Some((network, entries)) = map.next_entry::<String, Vec<AddressEntry>>()? {
                groups.push(AddressGroup { network, entries });
            }
            Ok(groups)
        }
    }

    deserializer.deserialize_any(AddressGroupsVisitor)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "metadata")]
    pub meta: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationPolicy {
    Unlinked,
    DoNotMigrate,
    MigrateTo(String),
}

impl Project {
    pub fn policy(&self) -> MigrationPolicy {
        match self.meta.get(META_MIGRATE_TO) {
            None => MigrationPolicy::Unlinked,
            Some(value) if value == DO_NOT_MIGRATE => MigrationPolicy::DoNotMigrate,
            Some(value) => MigrationPolicy::MigrateTo(value.clone()),
        }
    }

    pub fn owning_group(&self) -> Option<&str> {
        self.meta.get(META_OWNING_GROUP).map(String::as_str)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subnet {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub cidr: String,
    #[serde(default)]
    pub network_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Network {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Hypervisor {
    #[serde(default)]
    pub id: String,
    #[serde(alias = "hypervisor_hostname")]
    pub name: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub running_vms: Option<u64>,
    #[serde(default)]
    pub local_disk_size_gb: Option<u64>,
    #[serde(default)]
    pub local_disk_used_gb: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionPair {
    pub source: String,
    pub destination: String,
}

impl RegionPair {
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Migrated,
    DoNotMigrate,
    Unlinked,
    Pending,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverlapStrategy {
    #[default]
    MostSpecific,
    FirstListed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UsageScope {
    #[default]
    Pending,
    Active,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UsageStrategy {
    #[default]
    Batched,
    PerGroup,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GroupSortKey {
    #[default]
    MemberCount,
    ToBeMigrated,
    Usage,
    Key,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ClassificationCounts {
    #[serde(default)]
    pub active: u64,
    #[serde(default)]
    pub migrated: u64,
    #[serde(default)]
    pub do_not_migrate: u64,
    #[serde(default)]
    pub unlinked: u64,
    #[serde(default)]
    pub to_be_migrated: u64,
    #[serde(default)]
    pub migrated_inactive: u64,
}

impl ClassificationCounts {
    pub fn from_buckets(
        active: u64,
        migrated: u64,
        do_not_migrate: u64,
        unlinked: u64,
        migrated_inactive: u64,
    ) -> Self {
        Self {
            active,
            migrated,
            do_not_migrate,
            unlinked,
            to_be_migrated: active
                .saturating_sub(migrated)
                .saturating_sub(do_not_migrate)
                .saturating_sub(unlinked),
            migrated_inactive,
        }
    }

    pub fn is_partitioned(&self) -> bool {
        self.migrated + self.do_not_migrate + self.unlinked + self.to_be_migrated == self.active
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupReport {
    pub key: String,
    pub display_name: String,
    #[serde(default)]
    pub subnet_id: Option<String>,
    #[serde(default)]
    pub network_name: Option<String>,
    pub member_count: u64,
    pub active_count: u64,
    pub migrated: u64,
    #[serde(default)]
    pub migrated_inactive: u64,
    pub do_not_migrate: u64,
    pub unlinked: u64,
    pub to_be_migrated: u64,
    pub hypervisor_count: u64,
    #[serde(default)]
    pub hypervisors: Vec<String>,
    pub zones: Vec<String>,
    #[serde(default)]
    pub total_usage: Option<String>,
    #[serde(default)]
    pub total_usage_gb: Option<f64>,
}

impl GroupReport {
    pub fn counts(&self) -> ClassificationCounts {
        ClassificationCounts {
            active: self.active_count,
            migrated: self.migrated,
            do_not_migrate: self.do_not_migrate,
            unlinked: self.unlinked,
            to_be_migrated: self.to_be_migrated,
            migrated_inactive: self.migrated_inactive,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ZoneReport {
    pub zone: String,
    pub member_count: u64,
    pub active_count: u64,
    pub migrated: u64,
    #[serde(default)]
    pub migrated_inactive: u64,
    pub do_not_migrate: u64,
    pub unlinked: u64,
    pub to_be_migrated: u64,
    pub hypervisor_count: u64,
    #[serde(default)]
    pub destination_zones: Vec<String>,
    #[serde(default)]
    pub accounted_in_destination: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ProjectFindings {
    #[serde(default)]
    pub dangling_links: Vec<DanglingProjectLink>,
    #[serde(default)]
    pub unlinked_projects: Vec<UnlinkedProject>,
    #[serde(default)]
    pub empty_projects: Vec<ProjectSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DanglingProjectLink {
    pub project_id: String,
    pub project_name: String,
    pub owning_group: String,
    pub migrate_to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnlinkedProject {
    pub project_id: String,
    pub project_name: String,
    pub owning_group: String,
    pub workloads: Vec<WorkloadRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkloadRef {
    pub id: String,
    pub name: String,
    pub host: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OwnedWorkloadRef {
    pub id: String,
    pub name: String,
    pub owning_group: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OwningGroupSubnet {
    pub key: String,
    pub subnet_id: String,
    pub network_name: String,
    pub workloads: Vec<OwnedWorkloadRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HypervisorUsage {
    pub name: String,
    #[serde(default)]
    pub state: Option<String>,
    pub disk_size_gb: u64,
    pub disk_used_gb: u64,
    pub disk_free_gb: u64,
    pub use_percent: f64,
    #[serde(default)]
    pub running_vms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct HypervisorCapacity {
    #[serde(default)]
    pub hypervisor_count: u64,
    #[serde(default)]
    pub idle_count: u64,
    #[serde(default)]
    pub disk_size_gb: u64,
    #[serde(default)]
    pub disk_used_gb: u64,
    #[serde(default)]
    pub disk_free_gb: u64,
    #[serde(default)]
    pub hypervisors: Vec<HypervisorUsage>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectSummary {
    pub project_id: String,
    pub project_name: String,
    pub owning_group: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RegionMetrics {
    #[serde(default)]
    pub elapsed_ms: u64,
    #[serde(default)]
    pub workloads: u64,
    #[serde(default)]
    pub active_workloads: u64,
    #[serde(default)]
    pub unplaced_workloads: u64,
    #[serde(default)]
    pub projects: u64,
    #[serde(default)]
    pub subnet_groups: u64,
    #[serde(default)]
    pub excluded_subnets: u64,
    #[serde(default)]
    pub destination_workloads: u64,
    #[serde(default)]
    pub probe_calls: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegionReport {
    pub region: String,
    pub destination_region: String,
    #[serde(default)]
    pub metrics: RegionMetrics,
    pub totals: ClassificationCounts,
    pub subnets: Vec<GroupReport>,
    #[serde(default)]
    pub zones: Vec<ZoneReport>,
    #[serde(default)]
    pub projects: ProjectFindings,
    #[serde(default)]
    pub idle_hypervisors: Vec<String>,
    #[serde(default)]
    pub drained_hypervisors: Vec<String>,
    #[serde(default)]
    pub capacity: HypervisorCapacity,
    #[serde(default)]
    pub owning_group_subnets: Vec<OwningGroupSubnet>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegionFailure {
    pub region: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditMetadata {
    pub regions: Vec<String>,
    pub include_usage: bool,
    #[serde(default)]
    pub usage_scope: UsageScope,
    #[serde(default)]
    pub usage_strategy: UsageStrategy,
    #[serde(default)]
    pub overlap_strategy: OverlapStrategy,
    #[serde(default)]
    pub sort_key: GroupSortKey,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditReport {
    pub report_version: String,
    pub generated_at: String,
    #[serde(default = "default_audit_id")]
    pub audit_id: String,
    pub audit: AuditMetadata,
    pub regions: Vec<RegionReport>,
    #[serde(default)]
    pub failures: Vec<RegionFailure>,
    #[serde(default)]
    pub progress_summary: AuditProgressSummary,
    #[serde(default)]
    pub warnings: Vec<String>,
}

fn default_audit_id() -> String {
    "unknown".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AuditPhase {
    LoadingInventory,
    Classifying,
    GroupingSubnets,
    GroupingZones,
    ProbingUsage,
    ValidatingProjects,
    Done,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditProgressEvent {
    pub seq: u64,
    pub audit_id: String,
    pub phase: AuditPhase,
    pub region: Option<String>,
    pub completed_regions: u64,
    pub total_regions: u64,
    pub errors: u64,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AuditProgressSummary {
    #[serde(default)]
    pub total_events: u64,
    #[serde(default)]
    pub phase_counts: Vec<AuditPhaseCount>,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditPhaseCount {
    pub phase: AuditPhase,
    pub events: u64,
}

#[cfg(test)]
mod tests {
    use super::{MigrationPolicy, Project, Workload};

    #[test]
    fn parses_openstack_server_shape_in_document_order() {
        let raw = r#"{
            "id": "w1",
            "name": "app-01",
            "status": "ACTIVE",
            "tenant_id": "p1",
            "OS-EXT-SRV-ATTR:hypervisor_hostname": "hv-03",
            "OS-EXT-AZ:availability_zone": "az-2",
            "addresses": {
                "zeta-net": [{"addr": "10.0.0.5", "OS-EXT-IPS:type": "fixed"}],
                "alpha-net": [{"addr": "192.168.1.4", "OS-EXT-IPS:type": "fixed"}]
            },
            "metadata": {"migration_dst": "  "}
        }"#;
        let workload: Workload = serde_json::from_str(raw).expect("server parses");

        assert_eq!(workload.project_id, "p1");
        assert_eq!(workload.host(), Some("hv-03"));
        assert_eq!(workload.zone(), Some("az-2"));
        assert_eq!(workload.addresses[0].network, "zeta-net");
        assert_eq!(workload.primary_address(), Some("10.0.0.5"));
        assert_eq!(workload.migration_dst(), None);
        assert!(workload.is_active());
    }

    #[test]
    fn parses_canonical_address_list_and_missing_fields() {
        let raw = r#"{"id": "w2", "addresses": [{"network": "n", "entries": []}]}"#;
        let workload: Workload = serde_json::from_str(raw).expect("server parses");
        assert_eq!(workload.status, "UNKNOWN");
        assert_eq!(workload.primary_address(), None);

        let bare: Workload =
            serde_json::from_str(r#"{"id": "w3", "addresses": null}"#).expect("null addresses");
        assert!(bare.addresses.is_empty());
    }

    #[test]
    fn project_policy_distinguishes_absent_sentinel_and_target() {
        let mut project = Project {
            id: "p".to_string(),
            name: "p".to_string(),
            meta: Default::default(),
        };
        assert_eq!(project.policy(), MigrationPolicy::Unlinked);

        project
            .meta
            .insert("migrate_to".to_string(), "do_not_migrate".to_string());
        assert_eq!(project.policy(), MigrationPolicy::DoNotMigrate);

        project
            .meta
            .insert("migrate_to".to_string(), "team-new".to_string());
        assert_eq!(
            project.policy(),
            MigrationPolicy::MigrateTo("team-new".to_string())
        );
    }
}
