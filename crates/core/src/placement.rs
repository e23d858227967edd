use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;

use ipnetwork::IpNetwork;
use tracing::{debug, warn};

use crate::config::RegionExclusions;
use crate::error::AuditError;
use crate::model::{Network, OverlapStrategy, Subnet, Workload};

#[derive(Debug, Clone)]
pub struct SubnetGroup<'a> {
    pub key: String,
    pub network: IpNetwork,
    pub name: String,
    pub subnet_id: String,
    pub network_name: String,
    pub merged_subnets: usize,
    pub members: Vec<&'a Workload>,
}

#[derive(Debug, Clone, Default)]
pub struct Placement<'a> {
    pub groups: Vec<SubnetGroup<'a>>,
    pub unplaced: Vec<&'a Workload>,
    pub excluded_subnets: u64,
}

fn network_index(networks: &[Network]) -> HashMap<&str, &str> {
    networks
        .iter()
        .map(|network| (network.id.as_str(), network.name.as_str()))
        .collect()
}

pub fn lookup_network_name<'n>(
    index: &HashMap<&str, &'n str>,
    network_id: &str,
) -> Result<&'n str, AuditError> {
    index
        .get(network_id)
        .copied()
        .ok_or_else(|| AuditError::not_found("network", network_id))
}

pub fn parse_cidr(cidr: &str) -> Result<IpNetwork, AuditError> {
    cidr.trim()
        .parse::<IpNetwork>()
        .map_err(|err| AuditError::InvalidCidr {
            cidr: cidr.to_string(),
            reason: err.to_string(),
        })
}

fn canonical_key(network: &IpNetwork) -> String {
    format!("{}/{}", network.network(), network.prefix())
}

pub fn build_subnet_groups<'a>(
    subnets: &[Subnet],
    networks: &[Network],
    exclusions: &RegionExclusions,
    warnings: &mut Vec<String>,
) -> (Vec<SubnetGroup<'a>>, u64) {
    let names = network_index(networks);
    let mut missing_networks = BTreeSet::new();
    let mut groups: Vec<SubnetGroup<'a>> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut excluded = 0_u64;

    for subnet in subnets {
        let network_name = match lookup_network_name(&names, &subnet.network_id) {
            Ok(name) => name,
            Err(err) => {
                if missing_networks.insert(subnet.network_id.clone()) {
                    warn!(subnet = %subnet.id, error = %err, "subnet references unknown network");
                    warnings.push(format!(
                        "subnet {} references unknown network {}; network name left empty.",
                        subnet.id, subnet.network_id
                    ));
                }
                ""
            }
        };

        if exclusions.excludes_subnet(&subnet.name, network_name) {
            debug!(subnet = %subnet.name, network = network_name, "subnet excluded");
            excluded += 1;
            continue;
        }

        let network = match parse_cidr(&subnet.cidr) {
            Ok(network) => network,
            Err(err) => {
                warnings.push(format!("skipping subnet {}: {err}.", subnet.id));
                continue;
            }
        };

        let key = canonical_key(&network);
        if let Some(&position) = positions.get(&key) {
            groups[position].merged_subnets += 1;
            continue;
        }
        positions.insert(key.clone(), groups.len());
        groups.push(SubnetGroup {
            key,
            network,
            name: subnet.name.clone(),
            subnet_id: subnet.id.clone(),
            network_name: network_name.to_string(),
            merged_subnets: 1,
            members: Vec::new(),
        });
    }

    (groups, excluded)
}

/// Index of the group an address belongs to. Overlapping CIDRs resolve to
/// the longest prefix (ties go to the earlier group) unless `FirstListed`.
pub fn locate(groups: &[SubnetGroup<'_>], address: IpAddr, strategy: OverlapStrategy) -> Option<usize> {
    let mut candidates = groups
        .iter()
        .enumerate()
        .filter(|(_, group)| group.network.contains(address));

    match strategy {
        OverlapStrategy::FirstListed => candidates.next().map(|(position, _)| position),
        OverlapStrategy::MostSpecific => candidates
            .fold(None::<(usize, u8)>, |best, (position, group)| {
                let prefix = group.network.prefix();
                match best {
                    Some((_, best_prefix)) if best_prefix >= prefix => best,
                    _ => Some((position, prefix)),
                }
            })
            .map(|(position, _)| position),
    }
}

pub fn place_workloads<'a, I>(
    groups: &mut [SubnetGroup<'a>],
    workloads: I,
    strategy: OverlapStrategy,
) -> Vec<&'a Workload>
where
    I: IntoIterator<Item = &'a Workload>,
{
    let mut unplaced = Vec::new();
    for workload in workloads {
        let address = workload
            .primary_address()
            .and_then(|raw| raw.trim().parse::<IpAddr>().ok());
        match address.and_then(|address| locate(groups, address, strategy)) {
            Some(position) => groups[position].members.push(workload),
            None => unplaced.push(workload),
        }
    }
    unplaced
}

pub fn place<'a>(
    subnets: &[Subnet],
    networks: &[Network],
    workloads: &'a [Workload],
    exclusions: &RegionExclusions,
    strategy: OverlapStrategy,
    warnings: &mut Vec<String>,
) -> Placement<'a> {
    let (mut groups, excluded_subnets) =
        build_subnet_groups(subnets, networks, exclusions, warnings);
    let unplaced = place_workloads(&mut groups, workloads, strategy);
    debug!(
        groups = groups.len(),
        unplaced = unplaced.len(),
        excluded_subnets,
        "placed workloads into subnet groups"
    );
    Placement {
        groups,
        unplaced,
        excluded_subnets,
    }
}
