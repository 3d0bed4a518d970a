//! Collaborator interfaces consumed and fed by the engine.
//!
//! Implementations own their own retries and timeouts; the reconciler adds a
//! bound of its own and treats any failure as a per-day error.

use crate::model::{
    ActiveSchedule, DayLedgerEntry, IncidenceCode, LeaveRecord, PunchEvent, UpsertOutcome,
    WorkerProfile,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;

#[async_trait]
pub trait PunchSource: Send + Sync {
    /// Punches of one worker-day, ascending by time.
    async fn list_punches(&self, worker_id: i64, date: NaiveDate) -> Result<Vec<PunchEvent>>;
}

#[async_trait]
pub trait ScheduleSource: Send + Sync {
    /// Schedule assignment in effect on `date`, expanded to its weekday.
    /// `None` when the worker has no assignment covering the date.
    async fn active_schedule(&self, worker_id: i64, date: NaiveDate)
        -> Result<Option<ActiveSchedule>>;
}

#[async_trait]
pub trait LeaveSource: Send + Sync {
    async fn leave_for(&self, worker_id: i64, date: NaiveDate) -> Result<Option<LeaveRecord>>;
}

#[async_trait]
pub trait WorkerDirectory: Send + Sync {
    async fn worker(&self, worker_id: i64) -> Result<Option<WorkerProfile>>;

    async fn list_active_workers(&self) -> Result<Vec<i64>>;
}

/// Filters for [`LedgerStore::list`]; `None` means no restriction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerFilter {
    pub worker_id: Option<i64>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub code: Option<IncidenceCode>,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert or update the row keyed by `(worker_id, date)`. Rows with
    /// `updatable = false` are left as they are.
    async fn upsert(&self, entry: &DayLedgerEntry) -> Result<UpsertOutcome>;

    async fn get_entry(&self, id: i64) -> Result<Option<DayLedgerEntry>>;

    /// Overwrite the row `entry.id` regardless of its lock.
    async fn replace_entry(&self, entry: &DayLedgerEntry) -> Result<()>;

    /// Ordered by date descending, then worker id.
    async fn list(&self, filter: &LedgerFilter) -> Result<Vec<DayLedgerEntry>>;
}

/// The collaborators one engine instance works with.
#[derive(Clone)]
pub struct Sources {
    pub punches: Arc<dyn PunchSource>,
    pub schedules: Arc<dyn ScheduleSource>,
    pub leaves: Arc<dyn LeaveSource>,
    pub workers: Arc<dyn WorkerDirectory>,
    pub ledger: Arc<dyn LedgerStore>,
}

impl Sources {
    /// Use one backend for every collaborator.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: PunchSource + ScheduleSource + LeaveSource + WorkerDirectory + LedgerStore + 'static,
    {
        Self {
            punches: store.clone(),
            schedules: store.clone(),
            leaves: store.clone(),
            workers: store.clone(),
            ledger: store,
        }
    }
}
