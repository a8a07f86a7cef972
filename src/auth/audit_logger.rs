// Audit trail for state-changing actions

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::core::models::{HouseholdId, NewAuditLog, UserId};
use crate::store::{Store, StoreError};

/// Audit logger for household actions
pub struct AuditLogger {
    store: Arc<dyn Store>,
    write_timeout: Duration,
}

impl AuditLogger {
    pub fn new(store: Arc<dyn Store>, write_timeout: Duration) -> Self {
        Self { store, write_timeout }
    }

    /// Record an action.
    ///
    /// This is fire-and-forget: the write runs in its own task and its own
    /// transaction, after the triggering operation has committed. Failures are
    /// logged and dropped. The returned handle may be ignored.
    pub fn log_action(
        &self,
        household_id: HouseholdId,
        user_id: UserId,
        action: &str,
        details: Value,
    ) -> JoinHandle<()> {
        let store = self.store.clone();
        let write_timeout = self.write_timeout;
        let entry = NewAuditLog {
            household_id,
            user_id,
            action: action.to_string(),
            details,
        };

        tokio::spawn(async move {
            info!(
                household_id,
                user_id,
                action = %entry.action,
                "Audit event"
            );

            let action = entry.action.clone();
            let result = tokio::time::timeout(write_timeout, persist(store.as_ref(), entry)).await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(error = %e, action = %action, "Failed to write audit log");
                }
                Err(_) => {
                    warn!(action = %action, "Audit log write timed out");
                }
            }
        })
    }
}

async fn persist(store: &dyn Store, entry: NewAuditLog) -> Result<(), StoreError> {
    let mut tx = store.begin().await?;
    tx.insert_audit_log(entry).await?;
    tx.commit().await
}
