use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::error::AuditError;

/// Remote disk-usage lookup: hypervisor hostnames in, workload id -> usage
/// string (`"12G"`, `"512M"`) out. Workloads without a footprint are absent.
pub trait DiskUsageProber {
    fn usage(&self, hypervisors: &BTreeSet<String>) -> Result<HashMap<String, String>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopUsageProber;

impl DiskUsageProber for NoopUsageProber {
    fn usage(&self, _hypervisors: &BTreeSet<String>) -> Result<HashMap<String, String>> {
        Ok(HashMap::new())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SnapshotUsageProber {
    by_host: BTreeMap<String, BTreeMap<String, String>>,
}

impl SnapshotUsageProber {
    pub fn new(by_host: BTreeMap<String, BTreeMap<String, String>>) -> Self {
        Self { by_host }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read usage snapshot {}", path.display()))?;
        let by_host = serde_json::from_str(&data)
            .with_context(|| format!("failed to parse usage snapshot {}", path.display()))?;
        Ok(Self { by_host })
    }
}

impl DiskUsageProber for SnapshotUsageProber {
    fn usage(&self, hypervisors: &BTreeSet<String>) -> Result<HashMap<String, String>> {
        let mut usage = HashMap::new();
        for host in hypervisors {
            if let Some(entries) = self.by_host.get(host) {
                usage.extend(
                    entries
                        .iter()
                        .map(|(id, value)| (id.clone(), value.clone())),
                );
            }
        }
        Ok(usage)
    }
}

/// Parses `<number>G` or `<number>M` into gigabytes (M / 1024).
pub fn parse_usage_gb(raw: &str) -> Option<f64> {
    let value = raw.trim();
    let (number, divisor) = if let Some(number) = value.strip_suffix('G') {
        (number, 1.0)
    } else if let Some(number) = value.strip_suffix('M') {
        (number, 1024.0)
    } else {
        return None;
    };

    if !is_plain_decimal(number) {
        return None;
    }
    number.parse::<f64>().ok().map(|parsed| parsed / divisor)
}

fn is_plain_decimal(value: &str) -> bool {
    let mut parts = value.splitn(2, '.');
    let whole = parts.next().unwrap_or_default();
    let fraction = parts.next();
    !whole.is_empty()
        && whole.chars().all(|ch| ch.is_ascii_digit())
        && fraction.map_or(true, |fraction| {
            !fraction.is_empty() && fraction.chars().all(|ch| ch.is_ascii_digit())
        })
}

pub fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub fn format_usage_gb(gigabytes: f64) -> String {
    // `+ 0.0` folds a negative zero into "0.0G".
    format!("{:.1}G", round_one_decimal(gigabytes) + 0.0)
}

pub fn rollup_usage_gb<'a, I>(values: I) -> f64
where
    I: IntoIterator<Item = &'a str>,
{
    let total = values
        .into_iter()
        .filter_map(parse_usage_gb)
        .fold(0.0_f64, |sum, gigabytes| sum + gigabytes);
    round_one_decimal(total)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageRollup {
    pub total_gb: f64,
    pub counted: u64,
    pub missing: u64,
    pub unparsable: u64,
}

impl UsageRollup {
    pub fn display(&self) -> String {
        format_usage_gb(self.total_gb)
    }
}

#[derive(Debug, Clone, Default)]
pub struct UsageIndex {
    usage: HashMap<String, String>,
    calls: u64,
}

impl UsageIndex {
    pub fn calls(&self) -> u64 {
        self.calls
    }

    pub fn len(&self) -> usize {
        self.usage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.usage.is_empty()
    }

    pub fn merge(&mut self, usage: HashMap<String, String>) {
        self.calls += 1;
        self.usage.extend(usage);
    }

    pub fn rollup<'a, I>(&self, workload_ids: I) -> UsageRollup
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut rollup = UsageRollup::default();
        let mut total = 0.0_f64;
        for id in workload_ids {
            match self.usage.get(id) {
                Some(raw) => match parse_usage_gb(raw) {
                    Some(gigabytes) => {
                        total += gigabytes;
                        rollup.counted += 1;
                    }
                    None => rollup.unparsable += 1,
                },
                None => rollup.missing += 1,
            }
        }
        rollup.total_gb = round_one_decimal(total);
        rollup
    }
}

pub fn probe_union<'a, I>(
    prober: &dyn DiskUsageProber,
    host_sets: I,
) -> Result<UsageIndex, AuditError>
where
    I: IntoIterator<Item = &'a BTreeSet<String>>,
{
    let union = host_sets
        .into_iter()
        .flat_map(|hosts| hosts.iter().cloned())
        .collect::<BTreeSet<_>>();

    let mut index = UsageIndex::default();
    if union.is_empty() {
        return Ok(index);
    }

    info!(hypervisors = union.len(), "probing disk usage");
    let usage = prober.usage(&union).map_err(|source| AuditError::Probe {
        host_count: union.len(),
        source,
    })?;
    debug!(entries = usage.len(), "disk usage probe returned");
    index.merge(usage);
    Ok(index)
}

pub fn probe_each<'a, I>(
    prober: &dyn DiskUsageProber,
    host_sets: I,
) -> Result<Vec<UsageIndex>, AuditError>
where
    I: IntoIterator<Item = &'a BTreeSet<String>>,
{
    host_sets
        .into_iter()
        .map(|hosts| {
            let mut index = UsageIndex::default();
            if hosts.is_empty() {
                return Ok(index);
            }
            let usage = prober.usage(hosts).map_err(|source| AuditError::Probe {
                host_count: hosts.len(),
                source,
            })?;
            index.merge(usage);
            Ok(index)
        })
        .collect()
}
