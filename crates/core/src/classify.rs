use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::error::AuditError;
use crate::inventory::RegionContext;
use crate::model::{
    Classification, ClassificationCounts, MigrationPolicy, Project, RegionPair, Workload,
};

#[derive(Debug, Clone, Default)]
pub struct ProjectPolicyIndex {
    do_not_migrate_ids: HashSet<String>,
    unlinked_ids: HashSet<String>,
}

impl ProjectPolicyIndex {
    pub fn build(projects: &[Project]) -> Self {
        let mut index = Self::default();
        for project in projects {
            match project.policy() {
                MigrationPolicy::DoNotMigrate => {
                    index.do_not_migrate_ids.insert(project.id.clone());
                }
                MigrationPolicy::Unlinked => {
                    index.unlinked_ids.insert(project.id.clone());
                }
                MigrationPolicy::MigrateTo(_) => {}
            }
        }
        index
    }

    pub fn is_do_not_migrate(&self, project_id: &str) -> bool {
        self.do_not_migrate_ids.contains(project_id)
    }

    pub fn is_unlinked(&self, project_id: &str) -> bool {
        self.unlinked_ids.contains(project_id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DestinationIndex {
    confirmed: HashMap<String, Option<String>>,
}

impl DestinationIndex {
    pub fn build(destination_workloads: &[Workload]) -> Self {
        let confirmed = destination_workloads
            .iter()
            .filter(|workload| workload.carries_migration_src())
            .map(|workload| {
                (
                    workload.id.clone(),
                    workload.zone().map(ToString::to_string),
                )
            })
            .collect();
        Self { confirmed }
    }

    pub fn is_confirmed(&self, destination_id: &str) -> bool {
        self.confirmed.contains_key(destination_id)
    }

    pub fn destination_zone(&self, destination_id: &str) -> Option<&str> {
        self.confirmed
            .get(destination_id)
            .and_then(|zone| zone.as_deref())
    }

    pub fn len(&self) -> usize {
        self.confirmed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.confirmed.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Classifier {
    projects: ProjectPolicyIndex,
    destination: DestinationIndex,
}

impl Classifier {
    pub fn new(projects: &[Project], destination_workloads: &[Workload]) -> Self {
        Self {
            projects: ProjectPolicyIndex::build(projects),
            destination: DestinationIndex::build(destination_workloads),
        }
    }

    pub fn for_context(context: &RegionContext) -> Self {
        Self::new(&context.source.projects, &context.destination_servers)
    }

    pub fn destination(&self) -> &DestinationIndex {
        &self.destination
    }

    pub fn confirmed_destination<'w>(&self, workload: &'w Workload) -> Option<&'w str> {
        workload
            .migration_dst()
            .filter(|destination_id| self.destination.is_confirmed(destination_id))
    }

    pub fn is_migrated(&self, workload: &Workload) -> bool {
        self.confirmed_destination(workload).is_some()
    }

    /// Migrated outranks project policy: once the move is confirmed the source
    /// project's tag no longer matters.
    pub fn classify_one(&self, workload: &Workload) -> Classification {
        if self.is_migrated(workload) {
            Classification::Migrated
        } else if self.projects.is_do_not_migrate(&workload.project_id) {
            Classification::DoNotMigrate
        } else if self.projects.is_unlinked(&workload.project_id) {
            Classification::Unlinked
        } else {
            Classification::Pending
        }
    }

    pub fn partition<'a, I>(&self, workloads: I) -> ClassificationSets<'a>
    where
        I: IntoIterator<Item = &'a Workload>,
    {
        let mut sets = ClassificationSets::default();
        for workload in workloads {
            if !workload.is_active() {
                if self.is_migrated(workload) {
                    sets.migrated_inactive.push(workload);
                }
                sets.skipped_inactive += 1;
                continue;
            }
            match self.classify_one(workload) {
                Classification::Migrated => sets.migrated.push(workload),
                Classification::DoNotMigrate => sets.do_not_migrate.push(workload),
                Classification::Unlinked => sets.unlinked.push(workload),
                Classification::Pending => sets.pending.push(workload),
            }
        }
        sets
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClassificationSets<'a> {
    pub migrated: Vec<&'a Workload>,
    pub do_not_migrate: Vec<&'a Workload>,
    pub unlinked: Vec<&'a Workload>,
    pub pending: Vec<&'a Workload>,
    pub migrated_inactive: Vec<&'a Workload>,
    pub skipped_inactive: u64,
}

impl<'a> ClassificationSets<'a> {
    pub fn active_count(&self) -> u64 {
        (self.migrated.len() + self.do_not_migrate.len() + self.unlinked.len() + self.pending.len())
            as u64
    }

    pub fn counts(&self) -> ClassificationCounts {
        ClassificationCounts::from_buckets(
            self.active_count(),
            self.migrated.len() as u64,
            self.do_not_migrate.len() as u64,
            self.unlinked.len() as u64,
            self.migrated_inactive.len() as u64,
        )
    }

    pub fn active(&self) -> impl Iterator<Item = &'a Workload> + '_ {
        self.migrated
            .iter()
            .chain(&self.do_not_migrate)
            .chain(&self.unlinked)
            .chain(&self.pending)
            .copied()
    }
}

pub fn classify<'a>(
    workloads: &'a [Workload],
    projects: &[Project],
    destination_workloads: &[Workload],
    region_pair: &RegionPair,
) -> Result<ClassificationSets<'a>, AuditError> {
    if region_pair.destination.trim().is_empty() || region_pair.destination == region_pair.source
    {
        return Err(AuditError::UnmappedRegion {
            region: region_pair.source.clone(),
        });
    }

    let classifier = Classifier::new(projects, destination_workloads);
    let sets = classifier.partition(workloads);
    debug!(
        region = %region_pair.source,
        destination = %region_pair.destination,
        confirmed = classifier.destination().len(),
        migrated = sets.migrated.len(),
        pending = sets.pending.len(),
        "classified region workloads"
    );
    Ok(sets)
}

pub fn classify_region(context: &RegionContext) -> Result<ClassificationSets<'_>, AuditError> {
    classify(
        &context.source.servers,
        &context.source.projects,
        &context.destination_servers,
        &context.pair,
    )
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{classify, Classifier};
    use crate::error::AuditError;
    use crate::model::{Classification, Project, RegionPair, Workload};

    fn project(id: &str, migrate_to: Option<&str>) -> Project {
        let mut meta = BTreeMap::new();
        if let Some(value) = migrate_to {
            meta.insert("migrate_to".to_string(), value.to_string());
        }
        Project {
            id: id.to_string(),
            name: id.to_string(),
            meta,
        }
    }

    fn workload(id: &str, project_id: &str, status: &str, meta: &[(&str, &str)]) -> Workload {
        Workload {
            id: id.to_string(),
            name: id.to_string(),
            status: status.to_string(),
            project_id: project_id.to_string(),
            host: None,
            addresses: Vec::new(),
            metadata: meta
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
            availability_zone: None,
        }
    }

    fn projects() -> Vec<Project> {
        vec![
            project("p-unlinked", None),
            project("p-dnm", Some("do_not_migrate")),
            project("p-target", Some("team-new")),
        ]
    }

    #[test]
    fn confirmed_migration_outranks_do_not_migrate() {
        let workloads = vec![workload(
            "w2",
            "p-dnm",
            "ACTIVE",
            &[("migration_dst", "d1")],
        )];
        let destination = vec![workload("d1", "x", "ACTIVE", &[("migration_src", "w2")])];

        let sets = classify(
            &workloads,
            &projects(),
            &destination,
            &RegionPair::new("src", "dst"),
        )
        .expect("classifies");
        assert_eq!(sets.migrated.len(), 1);
        assert!(sets.do_not_migrate.is_empty());
    }

    #[test]
    fn unconfirmed_migration_falls_back_to_project_policy() {
        let classifier = Classifier::new(
            &projects(),
            &[workload("d9", "x", "ACTIVE", &[("owning_group", "ops")])],
        );

        let unconfirmed = workload("a", "p-target", "ACTIVE", &[("migration_dst", "d9")]);
        assert_eq!(classifier.classify_one(&unconfirmed), Classification::Pending);

        let dangling = workload("b", "p-unlinked", "ACTIVE", &[("migration_dst", "nope")]);
        assert_eq!(classifier.classify_one(&dangling), Classification::Unlinked);

        let blank = workload("c", "p-dnm", "ACTIVE", &[("migration_dst", "")]);
        assert_eq!(classifier.classify_one(&blank), Classification::DoNotMigrate);
    }

    #[test]
    fn unknown_project_is_pending() {
        let classifier = Classifier::new(&projects(), &[]);
        let orphan = workload("o", "p-missing", "ACTIVE", &[]);
        assert_eq!(classifier.classify_one(&orphan), Classification::Pending);
    }

    #[test]
    fn partition_is_exhaustive_over_active_workloads() {
        let workloads = vec![
            workload("a", "p-unlinked", "ACTIVE", &[]),
            workload("b", "p-dnm", "ACTIVE", &[]),
            workload("c", "p-target", "ACTIVE", &[]),
            workload("d", "p-target", "ACTIVE", &[("migration_dst", "d1")]),
            workload("e", "p-target", "SHUTOFF", &[("migration_dst", "d2")]),
            workload("f", "p-target", "ERROR", &[]),
        ];
        let destination = vec![
            workload("d1", "x", "ACTIVE", &[("migration_src", "d")]),
            workload("d2", "x", "ACTIVE", &[("migration_src", "e")]),
        ];

        let sets = classify(
            &workloads,
            &projects(),
            &destination,
            &RegionPair::new("src", "dst"),
        )
        .expect("classifies");
        let counts = sets.counts();

        assert_eq!(counts.active, 4);
        assert_eq!(counts.migrated, 1);
        assert_eq!(counts.do_not_migrate, 1);
        assert_eq!(counts.unlinked, 1);
        assert_eq!(counts.to_be_migrated, 1);
        assert_eq!(counts.migrated_inactive, 1);
        assert_eq!(sets.skipped_inactive, 2);
        assert!(counts.is_partitioned());
        assert_eq!(sets.active().count(), 4);
    }

    #[test]
    fn empty_input_partitions_to_zero() {
        let sets = classify(&[], &[], &[], &RegionPair::new("src", "dst")).expect("classifies");
        let counts = sets.counts();
        assert_eq!(counts.active, 0);
        assert!(counts.is_partitioned());
    }

    #[test]
    fn self_mapped_pair_is_treated_as_unmapped() {
        let err = classify(&[], &[], &[], &RegionPair::new("src", "src")).expect_err("unmapped");
        assert!(matches!(err, AuditError::UnmappedRegion { .. }));
    }
}
