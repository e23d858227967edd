use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::thread;

use anyhow::{anyhow, bail, Context, Result};
use fleet_audit_core::{
    run_audit_with_callback, AuditConfig, AuditOptions, AuditProgressEvent, AuditReport,
    DiskUsageProber, GroupSortKey, NoopUsageProber, SnapshotInventory, SnapshotUsageProber,
};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRequest {
    #[serde(default)]
    pub audit_id: Option<String>,
    #[serde(default)]
    pub config_path: Option<PathBuf>,
    pub snapshot_root: PathBuf,
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default)]
    pub include_usage: bool,
    #[serde(default)]
    pub usage_file: Option<PathBuf>,
    #[serde(default)]
    pub sort_key: GroupSortKey,
    #[serde(default)]
    pub output: Option<PathBuf>,
    #[serde(default = "default_emit_progress_events")]
    pub emit_progress_events: bool,
    #[serde(default)]
    pub owning_group: Option<String>,
}

fn default_emit_progress_events() -> bool {
    true
}

impl Default for AuditRequest {
    fn default() -> Self {
        Self {
            audit_id: None,
            config_path: None,
            snapshot_root: PathBuf::from("snapshots"),
            regions: Vec::new(),
            include_usage: false,
            usage_file: None,
            sort_key: GroupSortKey::default(),
            output: None,
            emit_progress_events: default_emit_progress_events(),
            owning_group: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditSessionStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSessionSnapshot {
    pub audit_id: String,
    pub status: AuditSessionStatus,
    pub report_path: Option<PathBuf>,
    pub error: Option<String>,
    pub total_events: u64,
    pub audited_regions: u64,
    pub failed_regions: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelAuditResponse {
    pub audit_id: String,
    pub status: AuditSessionStatus,
}

#[derive(Debug, Clone)]
struct AuditSession {
    status: AuditSessionStatus,
    report_path: Option<PathBuf>,
    report: Option<AuditReport>,
    error: Option<String>,
    events: Vec<AuditProgressEvent>,
    cancel_flag: Arc<AtomicBool>,
}

static SESSIONS: Lazy<Mutex<HashMap<String, AuditSession>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

pub fn start_audit(request: AuditRequest) -> Result<String> {
    let audit_id = request
        .audit_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let cancel_flag = Arc::new(AtomicBool::new(false));

    {
        let mut sessions = lock_sessions()?;
        if sessions
            .get(&audit_id)
            .is_some_and(|session| session.status == AuditSessionStatus::Running)
        {
            return Err(anyhow!("audit session already running: {audit_id}"));
        }
        sessions.insert(
            audit_id.clone(),
            AuditSession {
                status: AuditSessionStatus::Running,
                report_path: request.output.clone(),
                report: None,
                error: None,
                events: Vec::new(),
                cancel_flag: Arc::clone(&cancel_flag),
            },
        );
    }

    let thread_audit_id = audit_id.clone();
    thread::spawn(move || {
        let run_result = execute_audit(&request, &thread_audit_id, &cancel_flag);

        match run_result {
            Ok(report) => {
                if let Ok(mut sessions) = lock_sessions() {
                    if let Some(session) = sessions.get_mut(&thread_audit_id) {
                        session.report = Some(report);
                        session.status = if cancel_flag.load(Ordering::Relaxed) {
                            AuditSessionStatus::Cancelled
                        } else {
                            AuditSessionStatus::Completed
                        };
                        session.error = None;
                    }
                }
                info!(audit_id = %thread_audit_id, "audit session finished");
            }
            Err(err) => {
                warn!(audit_id = %thread_audit_id, error = %err, "audit session failed");
                if let Ok(mut sessions) = lock_sessions() {
                    if let Some(session) = sessions.get_mut(&thread_audit_id) {
                        session.status = AuditSessionStatus::Failed;
                        session.error = Some(format!("{err:#}"));
                    }
                }
            }
        }
    });

    Ok(audit_id)
}

fn execute_audit(
    request: &AuditRequest,
    audit_id: &str,
    cancel_flag: &Arc<AtomicBool>,
) -> Result<AuditReport> {
    let config = match &request.config_path {
        Some(path) => AuditConfig::load(path)?,
        None => AuditConfig::default(),
    };
    let inventory = SnapshotInventory::new(&request.snapshot_root);
    let prober: Box<dyn DiskUsageProber> = match &request.usage_file {
        Some(path) => Box::new(SnapshotUsageProber::load(path)?),
        None if request.include_usage => bail!("include_usage requires a usage_file"),
        None => Box::new(NoopUsageProber),
    };

    let options = AuditOptions {
        regions: request.regions.clone(),
        include_usage: request.include_usage,
        sort_key: request.sort_key,
        audit_id: Some(audit_id.to_string()),
        emit_progress_events: request.emit_progress_events,
        cancel_flag: Some(Arc::clone(cancel_flag)),
        owning_group: request.owning_group.clone(),
    };

    let report = run_audit_with_callback(&config, &inventory, &*prober, &options, |event| {
        if let Ok(mut sessions) = lock_sessions() {
            if let Some(session) = sessions.get_mut(audit_id) {
                session.events.push(event);
            }
        }
    })?;

    if let Some(path) = &request.output {
        let payload =
            serde_json::to_string_pretty(&report).context("failed to serialize audit report")?;
        fs::write(path, payload)
            .with_context(|| format!("failed to write audit report to {}", path.display()))?;
    }

    Ok(report)
}

pub fn poll_audit_events(audit_id: &str, from_seq: u64) -> Result<Vec<AuditProgressEvent>> {
    let sessions = lock_sessions()?;
    let session = sessions
        .get(audit_id)
        .ok_or_else(|| anyhow!("audit session not found: {audit_id}"))?;

    Ok(session
        .events
        .iter()
        .filter(|event| event.seq > from_seq)
        .cloned()
        .collect())
}

pub fn cancel_audit(audit_id: &str) -> Result<CancelAuditResponse> {
    let mut sessions = lock_sessions()?;
    let session = sessions
        .get_mut(audit_id)
        .ok_or_else(|| anyhow!("audit session not found: {audit_id}"))?;

    session.cancel_flag.store(true, Ordering::Relaxed);
    if session.status == AuditSessionStatus::Running {
        session.status = AuditSessionStatus::Cancelled;
    }

    Ok(CancelAuditResponse {
        audit_id: audit_id.to_string(),
        status: session.status.clone(),
    })
}

pub fn get_audit_session(audit_id: &str) -> Result<AuditSessionSnapshot> {
    let sessions = lock_sessions()?;
    let session = sessions
        .get(audit_id)
        .ok_or_else(|| anyhow!("audit session not found: {audit_id}"))?;

    Ok(AuditSessionSnapshot {
        audit_id: audit_id.to_string(),
        status: session.status.clone(),
        report_path: session.report_path.clone(),
        error: session.error.clone(),
        total_events: session.events.len() as u64,
        audited_regions: session
            .report
            .as_ref()
            .map_or(0, |report| report.regions.len() as u64),
        failed_regions: session
            .report
            .as_ref()
            .map_or(0, |report| report.failures.len() as u64),
    })
}

pub fn get_audit_report(audit_id: &str) -> Result<AuditReport> {
    let sessions = lock_sessions()?;
    let session = sessions
        .get(audit_id)
        .ok_or_else(|| anyhow!("audit session not found: {audit_id}"))?;
    session
        .report
        .clone()
        .ok_or_else(|| anyhow!("audit session {audit_id} has no report yet"))
}

pub fn load_report(path: impl AsRef<Path>) -> Result<AuditReport> {
    let path = path.as_ref();
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read report {}", path.display()))?;
    let report: AuditReport = serde_json::from_str(&data)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(report)
}

pub fn validate_config_file(path: impl AsRef<Path>) -> Result<AuditConfig> {
    AuditConfig::load(path.as_ref())
}

fn lock_sessions() -> Result<std::sync::MutexGuard<'static, HashMap<String, AuditSession>>> {
    SESSIONS
        .lock()
        .map_err(|_| anyhow!("audit session registry lock poisoned"))
}
