use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("region {region} has no destination mapping configured")]
    UnmappedRegion { region: String },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("invalid CIDR {cidr}: {reason}")]
    InvalidCidr { cidr: String, reason: String },

    #[error("invalid audit configuration: {0}")]
    InvalidConfig(String),

    #[error("inventory listing of {resource} failed for region {region}")]
    Inventory {
        region: String,
        resource: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("disk usage probe failed for {host_count} hypervisor(s)")]
    Probe {
        host_count: usize,
        #[source]
        source: anyhow::Error,
    },
}

impl AuditError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}
