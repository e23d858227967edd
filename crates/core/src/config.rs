use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::AuditError;
use crate::matcher::NameMatcher;
use crate::model::{OverlapStrategy, RegionPair, UsageScope, UsageStrategy};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditConfig {
    #[serde(default = "default_region_pairs")]
    pub region_pairs: BTreeMap<String, String>,
    #[serde(default)]
    pub source_regions: Vec<String>,
    #[serde(default)]
    pub exclusions: ExclusionPolicy,
    #[serde(default)]
    pub zone_equivalents: BTreeMap<String, String>,
    #[serde(default)]
    pub overlap_strategy: OverlapStrategy,
    #[serde(default)]
    pub usage_scope: UsageScope,
    #[serde(default)]
    pub usage_strategy: UsageStrategy,
    #[serde(default = "default_project_retry_delay_ms")]
    pub project_retry_delay_ms: u64,
}

fn default_region_pairs() -> BTreeMap<String, String> {
    [
        ("iad_private", "iad_osng"),
        ("phx_private", "phx_osng"),
        ("sin_private", "sin_osng"),
    ]
    .into_iter()
    .map(|(source, destination)| (source.to_string(), destination.to_string()))
    .collect()
}

fn default_project_retry_delay_ms() -> u64 {
    10_000
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            region_pairs: default_region_pairs(),
            source_regions: Vec::new(),
            exclusions: ExclusionPolicy::default(),
            zone_equivalents: BTreeMap::new(),
            overlap_strategy: OverlapStrategy::default(),
            usage_scope: UsageScope::default(),
            usage_strategy: UsageStrategy::default(),
            project_retry_delay_ms: default_project_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExclusionPolicy {
    #[serde(default = "default_subnet_name_patterns")]
    pub subnet_name_patterns: Vec<String>,
    #[serde(default = "default_network_name_patterns")]
    pub network_name_patterns: Vec<String>,
    #[serde(default = "default_region_network_patterns")]
    pub region_network_patterns: BTreeMap<String, Vec<String>>,
}

fn default_subnet_name_patterns() -> Vec<String> {
    vec!["floating".to_string(), "lbaas".to_string()]
}

fn default_network_name_patterns() -> Vec<String> {
    vec!["gen".to_string()]
}

fn default_region_network_patterns() -> BTreeMap<String, Vec<String>> {
    BTreeMap::from([("sin_private".to_string(), vec!["prd".to_string()])])
}

impl Default for ExclusionPolicy {
    fn default() -> Self {
        Self {
            subnet_name_patterns: default_subnet_name_patterns(),
            network_name_patterns: default_network_name_patterns(),
            region_network_patterns: default_region_network_patterns(),
        }
    }
}

impl ExclusionPolicy {
    pub fn matchers_for(&self, region: &str, warnings: &mut Vec<String>) -> RegionExclusions {
        let mut network_patterns = self.network_name_patterns.clone();
        if let Some(extra) = self.region_network_patterns.get(region) {
            network_patterns.extend(extra.iter().cloned());
        }

        RegionExclusions {
            subnet_names: NameMatcher::new(&self.subnet_name_patterns, warnings),
            network_names: NameMatcher::new(&network_patterns, warnings),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RegionExclusions {
    pub subnet_names: NameMatcher,
    pub network_names: NameMatcher,
}

impl RegionExclusions {
    pub fn excludes_subnet(&self, subnet_name: &str, network_name: &str) -> bool {
        self.subnet_names.is_match(subnet_name) || self.network_names.is_match(network_name)
    }

    pub fn excludes_zone(&self, zone: &str) -> bool {
        self.network_names.is_match(zone)
    }
}

impl AuditConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read audit config {}", path.display()))?;
        let config: AuditConfig = serde_json::from_str(&data)
            .with_context(|| format!("failed to parse audit config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AuditError> {
        if self.region_pairs.is_empty() {
            return Err(AuditError::InvalidConfig(
                "region_pairs must map at least one source region".to_string(),
            ));
        }
        for (source, destination) in &self.region_pairs {
            if source.trim().is_empty() || destination.trim().is_empty() {
                return Err(AuditError::InvalidConfig(
                    "region_pairs entries must not be empty".to_string(),
                ));
            }
            if source == destination {
                return Err(AuditError::InvalidConfig(format!(
                    "region {source} cannot be its own migration destination"
                )));
            }
        }
        for region in &self.source_regions {
            if !self.region_pairs.contains_key(region) {
                return Err(AuditError::InvalidConfig(format!(
                    "source region {region} is not listed in region_pairs"
                )));
            }
        }
        Ok(())
    }

    pub fn region_pair(&self, region: &str) -> Result<RegionPair, AuditError> {
        self.region_pairs
            .get(region)
            .map(|destination| RegionPair::new(region, destination.clone()))
            .ok_or_else(|| AuditError::UnmappedRegion {
                region: region.to_string(),
            })
    }

    pub fn audited_regions(&self) -> Vec<String> {
        if self.source_regions.is_empty() {
            self.region_pairs.keys().cloned().collect()
        } else {
            self.source_regions.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::AuditConfig;
    use crate::error::AuditError;

    #[test]
    fn default_config_maps_campaign_regions() {
        let config = AuditConfig::default();
        assert!(config.validate().is_ok());
        let pair = config.region_pair("sin_private").expect("mapped");
        assert_eq!(pair.destination, "sin_osng");
        assert_eq!(config.audited_regions().len(), 3);
    }

    #[test]
    fn unmapped_region_is_an_error() {
        let config = AuditConfig::default();
        let err = config.region_pair("ams_private").expect_err("unmapped");
        assert!(matches!(err, AuditError::UnmappedRegion { .. }));
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: AuditConfig =
            serde_json::from_str(r#"{"region_pairs": {"a": "b"}, "usage_scope": "active"}"#)
                .expect("config parses");
        assert_eq!(config.exclusions.network_name_patterns, vec!["gen"]);
        assert_eq!(config.project_retry_delay_ms, 10_000);
        assert_eq!(config.usage_scope, crate::model::UsageScope::Active);
    }

    #[test]
    fn rejects_self_mapping_and_unknown_source_regions() {
        let mut config: AuditConfig =
            serde_json::from_str(r#"{"region_pairs": {"a": "a"}}"#).expect("config parses");
        assert!(config.validate().is_err());

        config.region_pairs.insert("a".to_string(), "b".to_string());
        config.source_regions = vec!["c".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn region_override_adds_network_patterns() {
        let config = AuditConfig::default();
        let mut warnings = Vec::new();
        let sin = config.exclusions.matchers_for("sin_private", &mut warnings);
        let iad = config.exclusions.matchers_for("iad_private", &mut warnings);

        assert!(sin.excludes_subnet("app-subnet", "prd-net"));
        assert!(!iad.excludes_subnet("app-subnet", "prd-net"));
        assert!(iad.excludes_subnet("floating-pool", "public"));
        assert!(iad.excludes_subnet("app", "gen-overlay"));
    }
}
