//! Batch completion guard.

use tracing::{debug, info};

use crate::db::{batch_repo, Database};
use crate::error::PipelineError;
use crate::events::{EventBus, PipelineEvent};
use crate::tenant::TenantId;

/// Watches member files reaching a terminal status.
///
/// The guard itself is the conditional update in
/// [`batch_repo::try_complete`]; this type only decides when to evaluate it
/// and announces the one successful transition.
pub struct BatchTracker {
    db: Database,
    events: EventBus,
}

impl BatchTracker {
    pub fn new(db: Database, events: EventBus) -> Self {
        Self { db, events }
    }

    /// Called after `file_id` became `scored` or `error`.
    ///
    /// Returns true for the single call that completed the batch. Safe to
    /// call any number of times, concurrently, for any member.
    pub fn on_file_terminal(&self, tenant: &TenantId, file_id: &str) -> Result<bool, PipelineError> {
        let file = self
            .db
            .with_conn(|conn| crate::db::file_repo::get(conn, tenant, file_id))?;
        let Some(batch_id) = file.batch_id else {
            return Ok(false);
        };
        self.evaluate(tenant, &batch_id)
    }

    /// Evaluates the guard for `batch_id` directly.
    pub fn evaluate(&self, tenant: &TenantId, batch_id: &str) -> Result<bool, PipelineError> {
        let completed = self
            .db
            .with_conn(|conn| batch_repo::try_complete(conn, tenant, batch_id))?;
        if !completed {
            debug!(batch_id, "Batch not complete yet");
            return Ok(false);
        }

        let batch = self.db.with_conn(|conn| batch_repo::get(conn, tenant, batch_id))?;
        info!(
            tenant = %tenant,
            batch_id,
            files = batch.file_ids.len(),
            "Batch completed"
        );
        self.events.publish(PipelineEvent::BatchCompleted {
            batch_id: batch.id,
            project_id: batch.project_id,
            tenant_id: tenant.clone(),
            file_ids: batch.file_ids,
        });
        Ok(true)
    }
}
