use super::repo::{self, Pool};
use crate::model::{
    ActiveSchedule, DayLedgerEntry, LeaveRecord, PunchEvent, UpsertOutcome, WorkerProfile,
};
use crate::sources::{
    LedgerFilter, LedgerStore, LeaveSource, PunchSource, ScheduleSource, WorkerDirectory,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

/// Every engine collaborator served from one SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PunchSource for SqliteStore {
    async fn list_punches(&self, worker_id: i64, date: NaiveDate) -> Result<Vec<PunchEvent>> {
        repo::list_punches(&self.pool, worker_id, date).await
    }
}

#[async_trait]
impl ScheduleSource for SqliteStore {
    async fn active_schedule(
        &self,
        worker_id: i64,
        date: NaiveDate,
    ) -> Result<Option<ActiveSchedule>> {
        repo::active_schedule(&self.pool, worker_id, date).await
    }
}

#[async_trait]
impl LeaveSource for SqliteStore {
    async fn leave_for(&self, worker_id: i64, date: NaiveDate) -> Result<Option<LeaveRecord>> {
        repo::leave_for(&self.pool, worker_id, date).await
    }
}

#[async_trait]
impl WorkerDirectory for SqliteStore {
    async fn worker(&self, worker_id: i64) -> Result<Option<WorkerProfile>> {
        repo::get_worker(&self.pool, worker_id).await
    }

    async fn list_active_workers(&self) -> Result<Vec<i64>> {
        repo::list_active_workers(&self.pool).await
    }
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn upsert(&self, entry: &DayLedgerEntry) -> Result<UpsertOutcome> {
        repo::upsert_entry(&self.pool, entry).await
    }

    async fn get_entry(&self, id: i64) -> Result<Option<DayLedgerEntry>> {
        repo::get_entry(&self.pool, id).await
    }

    async fn replace_entry(&self, entry: &DayLedgerEntry) -> Result<()> {
        repo::replace_entry(&self.pool, entry).await
    }

    async fn list(&self, filter: &LedgerFilter) -> Result<Vec<DayLedgerEntry>> {
        repo::list_entries(&self.pool, filter).await
    }
}
