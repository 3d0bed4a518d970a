//! One worker-day: lookups, dedup, slot assignment, classification, upsert.

use crate::classify::classify;
use crate::config::{Config, Rules};
use crate::dedup::Deduplicator;
use crate::error::{EngineError, EngineResult};
use crate::model::{DayLedgerEntry, UpsertOutcome};
use crate::schedule;
use crate::slots;
use crate::sources::Sources;
use chrono::{NaiveDate, NaiveTime, Utc};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, instrument};

/// Result of reconciling one day that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DayOutcome {
    Written {
        outcome: UpsertOutcome,
        entry: DayLedgerEntry,
    },
    /// Rest day with no punches and no leave; nothing was written.
    SkippedRestDay,
}

#[derive(Clone)]
pub struct DayReconciler {
    sources: Sources,
    rules: Rules,
    call_timeout: Duration,
    processed_by: String,
}

impl DayReconciler {
    pub fn new(
        sources: Sources,
        rules: Rules,
        call_timeout: Duration,
        processed_by: impl Into<String>,
    ) -> Self {
        Self {
            sources,
            rules,
            call_timeout,
            processed_by: processed_by.into(),
        }
    }

    pub fn from_config(sources: Sources, cfg: &Config) -> Self {
        Self::new(
            sources,
            cfg.rules.clone(),
            cfg.app.lookup_timeout(),
            cfg.app.processed_by.clone(),
        )
    }

    pub fn sources(&self) -> &Sources {
        &self.sources
    }

    pub fn rules(&self) -> &Rules {
        &self.rules
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    #[instrument(skip(self))]
    pub async fn reconcile(&self, worker_id: i64, date: NaiveDate) -> EngineResult<DayOutcome> {
        let active = self
            .lookup("schedule lookup", self.sources.schedules.active_schedule(worker_id, date))
            .await?;
        let leave = self
            .lookup("leave lookup", self.sources.leaves.leave_for(worker_id, date))
            .await?;
        let punches = self
            .lookup("punch lookup", self.sources.punches.list_punches(worker_id, date))
            .await?;

        let schedule_text = match &active {
            Some(active) => schedule::render(&active.blocks),
            None if leave.is_some() => String::new(),
            None => return Err(EngineError::MissingSchedule { worker_id, date }),
        };
        let rest_day = active.as_ref().is_some_and(|a| a.is_rest_day());
        if rest_day && leave.is_none() && punches.is_empty() {
            debug!("rest day without punches or leave; skipped");
            return Ok(DayOutcome::SkippedRestDay);
        }

        let worker = self
            .lookup("worker lookup", self.sources.workers.worker(worker_id))
            .await?
            .ok_or(EngineError::WorkerNotFound(worker_id))?;

        let mut times: Vec<NaiveTime> = punches.iter().map(|p| p.time).collect();
        times.sort_unstable();
        let deduped = Deduplicator::from_rules(&self.rules).dedup(&times);
        debug!(raw = times.len(), kept = deduped.len(), "punches deduplicated");

        let slots = slots::assign(&deduped, Some(schedule_text.as_str()).filter(|t| !t.is_empty()));
        let result = classify(
            &self.rules,
            &slots,
            &schedule_text,
            worker.category.as_deref(),
            leave.as_ref(),
        );

        let entry = DayLedgerEntry {
            id: None,
            worker_id,
            date,
            worker_name: worker.name,
            department: worker.department,
            template_id: active.as_ref().map(|a| a.template_id),
            schedule_text,
            code: result.code,
            sub_type: result.sub_type,
            leave_id: leave.as_ref().map(|l| l.id),
            slots,
            minutes_late: result.minutes_late,
            hours_worked: result.hours_worked,
            description: result.description,
            updatable: true,
            processed_at: Utc::now(),
            processed_by: self.processed_by.clone(),
        };
        entry
            .validate()
            .map_err(|reason| EngineError::InvalidEntry { worker_id, date, reason })?;

        let outcome = match timeout(self.call_timeout, self.sources.ledger.upsert(&entry)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => return Err(EngineError::Persistence(err)),
            Err(_) => {
                return Err(EngineError::Timeout {
                    what: "ledger upsert",
                    after: self.call_timeout,
                })
            }
        };

        info!(
            code = %entry.code,
            outcome = outcome.as_str(),
            description = %entry.description,
            "day reconciled"
        );
        Ok(DayOutcome::Written { outcome, entry })
    }

    pub(crate) async fn lookup<T, F>(&self, what: &'static str, fut: F) -> EngineResult<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match timeout(self.call_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(EngineError::InputUnavailable { what, source }),
            Err(_) => Err(EngineError::Timeout {
                what,
                after: self.call_timeout,
            }),
        }
    }
}
