use practice_core::{AuditEntry, AuditLog};
use tracing::warn;

// Declare sub-modules within the application layer
pub mod commands;
pub mod events;
pub mod middleware;
pub mod query;
pub mod sessions;

/// Appends to the audit trail; failures never reach the caller.
pub async fn record_audit(audit: &dyn AuditLog, entry: AuditEntry) {
    if let Err(e) = audit.append(&entry).await {
        warn!("Audit entry '{}' was not recorded: {}", entry.action, e);
    }
}
