use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::AuditError;
use crate::model::{Hypervisor, Network, Project, RegionPair, Subnet, Workload};

pub trait InventoryGateway {
    fn list_servers(&self, region: &str) -> Result<Vec<Workload>>;
    fn list_projects(&self, region: &str) -> Result<Vec<Project>>;
    fn list_subnets(&self, region: &str) -> Result<Vec<Subnet>>;
    fn list_networks(&self, region: &str) -> Result<Vec<Network>>;
    fn list_hypervisors(&self, region: &str) -> Result<Vec<Hypervisor>>;
}

#[derive(Debug, Clone)]
pub struct RegionSnapshot {
    pub region: String,
    pub servers: Vec<Workload>,
    pub projects: Vec<Project>,
    pub subnets: Vec<Subnet>,
    pub networks: Vec<Network>,
    pub hypervisors: Vec<Hypervisor>,
}

#[derive(Debug, Clone)]
pub struct RegionContext {
    pub pair: RegionPair,
    pub source: RegionSnapshot,
    pub destination_servers: Vec<Workload>,
    pub destination_projects: Vec<Project>,
}

impl RegionContext {
    pub fn region(&self) -> &str {
        &self.pair.source
    }
}

pub fn fetch_region_context(
    gateway: &dyn InventoryGateway,
    pair: &RegionPair,
    project_retry_delay: Duration,
    warnings: &mut Vec<String>,
) -> Result<RegionContext, AuditError> {
    let region = pair.source.as_str();
    info!(region, destination = %pair.destination, "loading region inventory");

    let servers = gateway
        .list_servers(region)
        .map_err(|source| inventory_error(region, "servers", source))?;
    let projects = list_with_retry(region, project_retry_delay, warnings, || {
        gateway.list_projects(region)
    })?;
    let subnets = gateway
        .list_subnets(region)
        .map_err(|source| inventory_error(region, "subnets", source))?;
    let networks = gateway
        .list_networks(region)
        .map_err(|source| inventory_error(region, "networks", source))?;
    let hypervisors = gateway
        .list_hypervisors(region)
        .map_err(|source| inventory_error(region, "hypervisors", source))?;

    let destination = pair.destination.as_str();
    let destination_servers = gateway
        .list_servers(destination)
        .map_err(|source| inventory_error(destination, "servers", source))?;
    let destination_projects = list_with_retry(destination, project_retry_delay, warnings, || {
        gateway.list_projects(destination)
    })?;

    Ok(RegionContext {
        pair: pair.clone(),
        source: RegionSnapshot {
            region: region.to_string(),
            servers,
            projects,
            subnets,
            networks,
            hypervisors,
        },
        destination_servers,
        destination_projects,
    })
}

// Project listing fails intermittently on some regions; one retry after a pause.
fn list_with_retry<T, F>(
    region: &str,
    delay: Duration,
    warnings: &mut Vec<String>,
    mut list: F,
) -> Result<Vec<T>, AuditError>
where
    F: FnMut() -> Result<Vec<T>>,
{
    match list() {
        Ok(items) => Ok(items),
        Err(first) => {
            warn!(region, error = %first, "project listing failed; retrying once");
            warnings.push(format!(
                "listing projects from {region} failed ({first}); retried once."
            ));
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            list().map_err(|source| inventory_error(region, "projects", source))
        }
    }
}

fn inventory_error(region: &str, resource: &'static str, source: anyhow::Error) -> AuditError {
    AuditError::Inventory {
        region: region.to_string(),
        resource,
        source,
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotInventory {
    root: PathBuf,
}

impl SnapshotInventory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resource_path(&self, region: &str, resource: &str) -> PathBuf {
        self.root.join(region).join(format!("{resource}.json"))
    }

    // Listings are either a bare array or an API response that wraps the
    // array under the resource name, next to keys such as `links`.
    fn read_listing<T: DeserializeOwned>(&self, region: &str, resource: &str) -> Result<Vec<T>> {
        let path = self.resource_path(region, resource);
        let data = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let listing: Value = serde_json::from_str(&data)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        let items = match listing {
            Value::Array(items) => Value::Array(items),
            Value::Object(mut map) => map.remove(resource).ok_or_else(|| {
                anyhow!("{} has no \"{resource}\" listing", path.display())
            })?,
            _ => bail!("{} is neither a list nor a wrapped listing", path.display()),
        };
        serde_json::from_value(items)
            .with_context(|| format!("failed to parse {} entries in {}", resource, path.display()))
    }
}

impl InventoryGateway for SnapshotInventory {
    fn list_servers(&self, region: &str) -> Result<Vec<Workload>> {
        self.read_listing(region, "servers")
    }

    fn list_projects(&self, region: &str) -> Result<Vec<Project>> {
        self.read_listing(region, "projects")
    }

    fn list_subnets(&self, region: &str) -> Result<Vec<Subnet>> {
        self.read_listing(region, "subnets")
    }

    fn list_networks(&self, region: &str) -> Result<Vec<Network>> {
        self.read_listing(region, "networks")
    }

    // Hypervisor exports are optional.
    fn list_hypervisors(&self, region: &str) -> Result<Vec<Hypervisor>> {
        if !self.resource_path(region, "hypervisors").exists() {
            return Ok(Vec::new());
        }
        self.read_listing(region, "hypervisors")
    }
}
