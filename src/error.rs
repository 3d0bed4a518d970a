//! Per-day failure taxonomy of the reconciliation engine.
//!
//! None of these abort a batch: the runner records them in
//! `RunStats::errors` and moves on to the next day.

use chrono::NaiveDate;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A collaborator lookup failed (database, network).
    #[error("{what} unavailable: {source:#}")]
    InputUnavailable {
        what: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("{what} timed out after {after:?}")]
    Timeout { what: &'static str, after: Duration },

    #[error("worker {0} not found")]
    WorkerNotFound(i64),

    #[error("worker {worker_id} has no schedule assignment on {date}")]
    MissingSchedule { worker_id: i64, date: NaiveDate },

    #[error("invalid ledger entry for worker {worker_id} on {date}: {reason}")]
    InvalidEntry {
        worker_id: i64,
        date: NaiveDate,
        reason: &'static str,
    },

    /// The ledger upsert itself failed (constraint violation, I/O).
    #[error("ledger persistence failed: {0:#}")]
    Persistence(#[source] anyhow::Error),

    #[error("ledger entry {0} not found")]
    EntryNotFound(i64),
}

pub type EngineResult<T> = Result<T, EngineError>;
