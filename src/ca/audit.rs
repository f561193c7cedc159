//! Audit logging of issuance decisions.

use log::{error, info, warn};

use crate::constants::AUDIT_LOG_TARGET;


//------------ AuditLogger ---------------------------------------------------

/// Receives audit events from the certificate authority.
pub trait AuditLogger: Send + Sync {
    /// Normal progress.
    fn notice(&self, msg: &str);

    /// Something went wrong but nothing was issued.
    fn warning(&self, msg: &str);

    /// A decision that must be reviewed.
    fn audit_err(&self, msg: &str);
}


//------------ LogAuditLogger ------------------------------------------------

/// Writes audit events to the log under the `audit` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogAuditLogger;

impl AuditLogger for LogAuditLogger {
    fn notice(&self, msg: &str) {
        info!(target: AUDIT_LOG_TARGET, "{msg}");
    }

    fn warning(&self, msg: &str) {
        warn!(target: AUDIT_LOG_TARGET, "{msg}");
    }

    fn audit_err(&self, msg: &str) {
        error!(target: AUDIT_LOG_TARGET, "[AUDIT] {msg}");
    }
}
