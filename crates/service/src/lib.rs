pub mod service;

pub use service::{
    cancel_audit, get_audit_report, get_audit_session, load_report, poll_audit_events,
    start_audit, validate_config_file, AuditRequest, AuditSessionSnapshot, AuditSessionStatus,
    CancelAuditResponse,
};
