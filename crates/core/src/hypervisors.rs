use std::cmp::Ordering;
use std::collections::HashMap;

use crate::classify::Classifier;
use crate::model::{Hypervisor, HypervisorCapacity, HypervisorUsage, Workload};
use crate::usage::round_one_decimal;

pub fn idle_hypervisors(hypervisors: &[Hypervisor]) -> Vec<String> {
    let mut idle = hypervisors
        .iter()
        .filter(|hypervisor| hypervisor.running_vms == Some(0))
        .map(|hypervisor| hypervisor.name.clone())
        .collect::<Vec<_>>();
    idle.sort();
    idle.dedup();
    idle
}

pub fn drained_hypervisors(
    hypervisors: &[Hypervisor],
    workloads: &[Workload],
    classifier: &Classifier,
) -> Vec<String> {
    // host -> (hosted, migrated)
    let mut hosted: HashMap<&str, (u64, u64)> = HashMap::new();
    for workload in workloads {
        let Some(host) = workload.host() else {
            continue;
        };
        let entry = hosted.entry(host).or_default();
        entry.0 += 1;
        if classifier.is_migrated(workload) {
            entry.1 += 1;
        }
    }

    let mut drained = hypervisors
        .iter()
        .filter(|hypervisor| {
            hosted
                .get(hypervisor.name.as_str())
                .is_some_and(|(total, migrated)| *total > 0 && total == migrated)
        })
        .map(|hypervisor| hypervisor.name.clone())
        .collect::<Vec<_>>();
    drained.sort();
    drained.dedup();
    drained
}

pub fn hypervisor_capacity(hypervisors: &[Hypervisor]) -> HypervisorCapacity {
    let mut usage = hypervisors
        .iter()
        .filter_map(|hypervisor| {
            let size = hypervisor.local_disk_size_gb?;
            let used = hypervisor.local_disk_used_gb?;
            let use_percent = if size == 0 {
                0.0
            } else {
                round_one_decimal(used as f64 / size as f64 * 100.0)
            };
            Some(HypervisorUsage {
                name: hypervisor.name.clone(),
                state: hypervisor.state.clone(),
                disk_size_gb: size,
                disk_used_gb: used,
                disk_free_gb: size.saturating_sub(used),
                use_percent,
                running_vms: hypervisor.running_vms,
            })
        })
        .collect::<Vec<_>>();

    usage.sort_by(|left, right| {
        right
            .use_percent
            .partial_cmp(&left.use_percent)
            .unwrap_or(Ordering::Equal)
            .then_with(|| left.name.cmp(&right.name))
    });

    HypervisorCapacity {
        hypervisor_count: hypervisors.len() as u64,
        idle_count: idle_hypervisors(hypervisors).len() as u64,
        disk_size_gb: usage.iter().map(|hv| hv.disk_size_gb).sum(),
        disk_used_gb: usage.iter().map(|hv| hv.disk_used_gb).sum(),
        disk_free_gb: usage.iter().map(|hv| hv.disk_free_gb).sum(),
        hypervisors: usage,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{drained_hypervisors, hypervisor_capacity, idle_hypervisors};
    use crate::classify::Classifier;
    use crate::model::{Hypervisor, Workload};

    fn hypervisor(name: &str, running_vms: Option<u64>, disk: Option<(u64, u64)>) -> Hypervisor {
        Hypervisor {
            id: name.to_string(),
            name: name.to_string(),
            state: Some("up".to_string()),
            status: Some("enabled".to_string()),
            running_vms,
            local_disk_size_gb: disk.map(|(size, _)| size),
            local_disk_used_gb: disk.map(|(_, used)| used),
        }
    }

    fn workload(id: &str, status: &str, host: &str, meta: &[(&str, &str)]) -> Workload {
        Workload {
            id: id.to_string(),
            name: id.to_string(),
            status: status.to_string(),
            project_id: "p1".to_string(),
            host: Some(host.to_string()),
            addresses: Vec::new(),
            metadata: meta
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect::<BTreeMap<_, _>>(),
            availability_zone: None,
        }
    }

    #[test]
    fn idle_hypervisors_require_a_reported_zero() {
        let idle = idle_hypervisors(&[
            hypervisor("hv-b", Some(0), None),
            hypervisor("hv-a", Some(0), None),
            hypervisor("hv-c", Some(4), None),
            hypervisor("hv-d", None, None),
        ]);
        assert_eq!(idle, vec!["hv-a", "hv-b"]);
    }

    #[test]
    fn drained_hypervisors_host_only_confirmed_workloads() {
        let hypervisors = vec![
            hypervisor("hv1", Some(2), None),
            hypervisor("hv2", Some(2), None),
            hypervisor("hv3", Some(0), None),
        ];
        let workloads = vec![
            workload("a", "ACTIVE", "hv1", &[("migration_dst", "d-a")]),
            workload("b", "SHUTOFF", "hv1", &[("migration_dst", "d-b")]),
            workload("c", "ACTIVE", "hv2", &[("migration_dst", "d-c")]),
            workload("e", "ACTIVE", "hv2", &[("migration_dst", "d-unconfirmed")]),
        ];
        let destination = vec![
            workload("d-a", "ACTIVE", "dhv", &[("migration_src", "a")]),
            workload("d-b", "SHUTOFF", "dhv", &[("migration_src", "b")]),
            workload("d-c", "ACTIVE", "dhv", &[("migration_src", "c")]),
            workload("d-unconfirmed", "ACTIVE", "dhv", &[]),
        ];
        let classifier = Classifier::new(&[], &destination);

        let drained = drained_hypervisors(&hypervisors, &workloads, &classifier);

        assert_eq!(drained, vec!["hv1"]);
    }

    #[test]
    fn capacity_sums_reporting_hypervisors() {
        let capacity = hypervisor_capacity(&[
            hypervisor("hv1", Some(3), Some((1000, 250))),
            hypervisor("hv2", Some(0), Some((500, 400))),
            hypervisor("hv3", Some(1), None),
            hypervisor("hv4", Some(0), Some((0, 0))),
        ]);

        assert_eq!(capacity.hypervisor_count, 4);
        assert_eq!(capacity.idle_count, 2);
        assert_eq!(capacity.disk_size_gb, 1500);
        assert_eq!(capacity.disk_used_gb, 650);
        assert_eq!(capacity.disk_free_gb, 850);
        let names = capacity
            .hypervisors
            .iter()
            .map(|hv| hv.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["hv2", "hv1", "hv4"]);
        assert_eq!(capacity.hypervisors[0].use_percent, 80.0);
        assert_eq!(capacity.hypervisors[1].use_percent, 25.0);
    }
}
