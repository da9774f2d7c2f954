use chrono::Utc;
use tracing::{error, info};

/// Target of the operator audit log. Enabled alongside the crate's own logs.
pub const AUDIT_TARGET: &str = "audit";

/// Creates an info entry in the audit log.
pub fn log_info(title: &str, mut fields: Vec<(&str, String)>) {
    fields.push(("Happened at", Utc::now().to_rfc3339()));

    info!(target: AUDIT_TARGET, "ℹ️ {}\n\n{:#?}", title, fields);
}

/// Creates an error entry in the audit log.
pub fn log_error(title: &str, mut fields: Vec<(&str, String)>) {
    fields.push(("Seen at", Utc::now().to_rfc3339()));

    error!(
        target: AUDIT_TARGET,
        "⚠️ An error occured in a command!\n{}\n\n{:#?}", title, fields
    );
}
