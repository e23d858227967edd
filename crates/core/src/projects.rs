use std::collections::{HashMap, HashSet};

use crate::model::{
    DanglingProjectLink, MigrationPolicy, Project, ProjectFindings, ProjectSummary,
    UnlinkedProject, Workload, WorkloadRef,
};

pub const UNKNOWN_GROUP: &str = "Unknown";

pub fn format_owning_group(raw: Option<&str>) -> String {
    let raw = raw.unwrap_or(UNKNOWN_GROUP);
    raw.split(" - ").nth(1).unwrap_or(raw).to_string()
}

pub fn dangling_links(
    projects: &[Project],
    destination_projects: &[Project],
) -> Vec<DanglingProjectLink> {
    let known = destination_projects
        .iter()
        .flat_map(|project| [project.id.as_str(), project.name.as_str()])
        .filter(|value| !value.is_empty())
        .collect::<HashSet<_>>();

    projects
        .iter()
        .filter_map(|project| match project.policy() {
            MigrationPolicy::MigrateTo(target)
                if !target.is_empty() && !known.contains(target.as_str()) =>
            {
                Some(DanglingProjectLink {
                    project_id: project.id.clone(),
                    project_name: project.name.clone(),
                    owning_group: format_owning_group(project.owning_group()),
                    migrate_to: target,
                })
            }
            _ => None,
        })
        .collect()
}

fn workloads_by_project(workloads: &[Workload]) -> HashMap<&str, Vec<&Workload>> {
    let mut by_project: HashMap<&str, Vec<&Workload>> = HashMap::new();
    for workload in workloads {
        by_project
            .entry(workload.project_id.as_str())
            .or_default()
            .push(workload);
    }
    by_project
}

pub fn unlinked_projects(projects: &[Project], workloads: &[Workload]) -> Vec<UnlinkedProject> {
    let by_project = workloads_by_project(workloads);
    let mut unlinked = projects
        .iter()
        .filter(|project| project.policy() == MigrationPolicy::Unlinked)
        .filter_map(|project| {
            let members = by_project.get(project.id.as_str())?;
            Some(UnlinkedProject {
                project_id: project.id.clone(),
                project_name: project.name.clone(),
                owning_group: format_owning_group(project.owning_group()),
                workloads: members
                    .iter()
                    .map(|workload| WorkloadRef {
                        id: workload.id.clone(),
                        name: workload.name.clone(),
                        host: workload.host().map(ToString::to_string),
                    })
                    .collect(),
            })
        })
        .collect::<Vec<_>>();

    unlinked.sort_by(|left, right| {
        right
            .workloads
            .len()
            .cmp(&left.workloads.len())
            .then_with(|| left.project_name.cmp(&right.project_name))
    });
    unlinked
}

pub fn empty_projects(projects: &[Project], workloads: &[Workload]) -> Vec<ProjectSummary> {
    let occupied = workloads
        .iter()
        .map(|workload| workload.project_id.as_str())
        .collect::<HashSet<_>>();

    projects
        .iter()
        .filter(|project| !occupied.contains(project.id.as_str()))
        .map(|project| ProjectSummary {
            project_id: project.id.clone(),
            project_name: project.name.clone(),
            owning_group: format_owning_group(project.owning_group()),
        })
        .collect()
}

pub fn validate_projects(
    projects: &[Project],
    workloads: &[Workload],
    destination_projects: &[Project],
) -> ProjectFindings {
    ProjectFindings {
        dangling_links: dangling_links(projects, destination_projects),
        unlinked_projects: unlinked_projects(projects, workloads),
        empty_projects: empty_projects(projects, workloads),
    }
}
