//! Manual correction of an existing ledger row.
//!
//! The operator supplies the four slot values; the row is reclassified
//! against its stored schedule text so that the code stays consistent with
//! the punches shown next to it.

use crate::classify::classify;
use crate::error::{EngineError, EngineResult};
use crate::model::{DayLedgerEntry, DaySlots};
use crate::reconcile::DayReconciler;
use chrono::Utc;
use tokio::time::timeout;
use tracing::{info, instrument};

/// Operator input for [`DayReconciler::edit_entry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryEdit {
    pub slots: DaySlots,
    /// `false` locks the row against later batch runs.
    pub updatable: bool,
    pub edited_by: String,
}

impl DayReconciler {
    #[instrument(skip(self, edit), fields(updatable = edit.updatable))]
    pub async fn edit_entry(&self, entry_id: i64, edit: EntryEdit) -> EngineResult<DayLedgerEntry> {
        let sources = self.sources();
        let mut entry = self
            .lookup("ledger lookup", sources.ledger.get_entry(entry_id))
            .await?
            .ok_or(EngineError::EntryNotFound(entry_id))?;

        let worker = self
            .lookup("worker lookup", sources.workers.worker(entry.worker_id))
            .await?
            .ok_or(EngineError::WorkerNotFound(entry.worker_id))?;
        let leave = self
            .lookup("leave lookup", sources.leaves.leave_for(entry.worker_id, entry.date))
            .await?;

        let result = classify(
            self.rules(),
            &edit.slots,
            &entry.schedule_text,
            worker.category.as_deref(),
            leave.as_ref(),
        );
        entry.slots = edit.slots;
        entry.apply(result);
        entry.leave_id = leave.as_ref().map(|l| l.id);
        entry.updatable = edit.updatable;
        entry.processed_at = Utc::now();
        entry.processed_by = edit.edited_by;
        entry.validate().map_err(|reason| EngineError::InvalidEntry {
            worker_id: entry.worker_id,
            date: entry.date,
            reason,
        })?;

        match timeout(self.call_timeout(), sources.ledger.replace_entry(&entry)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(EngineError::Persistence(err)),
            Err(_) => {
                return Err(EngineError::Timeout {
                    what: "ledger replace",
                    after: self.call_timeout(),
                })
            }
        }

        info!(
            worker_id = entry.worker_id,
            date = %entry.date,
            code = %entry.code,
            by = %entry.processed_by,
            "ledger entry edited"
        );
        Ok(entry)
    }
}
