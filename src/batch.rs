//! Date-range batch over a set of workers.
//!
//! Workers run concurrently (bounded); the days of one worker run in
//! chronological order. Day failures are counted, never propagated. The only
//! way to stop early is the [`CancelSignal`], checked before each day.

use crate::config::Config;
use crate::model::RunStats;
use crate::reconcile::{DayOutcome, DayReconciler};
use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Cooperative cancellation shared between the trigger and the runner.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of one worker over the whole range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    pub worker_id: i64,
    /// Snapshot name from the last written row; `None` if nothing was written.
    pub worker_name: Option<String>,
    /// No day of this worker failed.
    pub ok: bool,
    pub stats: RunStats,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub totals: RunStats,
    pub workers: Vec<WorkerReport>,
    pub cancelled: bool,
}

#[derive(Clone)]
pub struct BatchRunner {
    reconciler: DayReconciler,
    concurrency: usize,
}

impl BatchRunner {
    pub fn new(reconciler: DayReconciler, concurrency: usize) -> Self {
        Self {
            reconciler,
            concurrency: concurrency.max(1),
        }
    }

    pub fn from_config(reconciler: DayReconciler, cfg: &Config) -> Self {
        Self::new(reconciler, cfg.app.concurrency)
    }

    /// Reconcile every day in `[from, to]` for each worker and return the
    /// aggregate counters. An empty `worker_ids` means every active worker.
    pub async fn run(
        &self,
        worker_ids: &[i64],
        from: NaiveDate,
        to: NaiveDate,
        cancel: &CancelSignal,
    ) -> RunStats {
        self.run_report(worker_ids, from, to, cancel).await.totals
    }

    pub async fn run_report(
        &self,
        worker_ids: &[i64],
        from: NaiveDate,
        to: NaiveDate,
        cancel: &CancelSignal,
    ) -> BatchReport {
        let run_id = Uuid::new_v4();
        let span = info_span!("batch", %run_id, %from, %to);
        async move {
            let mut report = BatchReport {
                run_id,
                totals: RunStats::default(),
                workers: Vec::new(),
                cancelled: false,
            };

            let workers = match self.resolve_workers(worker_ids).await {
                Some(workers) => workers,
                None => {
                    report.totals.errors += 1;
                    return report;
                }
            };
            info!(workers = workers.len(), concurrency = self.concurrency, "batch started");

            let results: Vec<(WorkerReport, bool)> = stream::iter(workers)
                .map(|worker_id| self.process_worker(worker_id, from, to, cancel))
                .buffered(self.concurrency)
                .collect()
                .await;

            for (worker, cancelled) in results {
                report.totals += worker.stats;
                report.cancelled |= cancelled;
                report.workers.push(worker);
            }

            let t = &report.totals;
            info!(
                inserted = t.inserted,
                updated = t.updated,
                skipped_rest_days = t.skipped_rest_days,
                locked = t.locked,
                errors = t.errors,
                cancelled = report.cancelled,
                "batch finished"
            );
            report
        }
        .instrument(span)
        .await
    }

    async fn resolve_workers(&self, worker_ids: &[i64]) -> Option<Vec<i64>> {
        if !worker_ids.is_empty() {
            let mut seen = HashSet::new();
            let mut ids = worker_ids.to_vec();
            ids.retain(|id| seen.insert(*id));
            return Some(ids);
        }
        let directory = &self.reconciler.sources().workers;
        match timeout(self.reconciler.call_timeout(), directory.list_active_workers()).await {
            Ok(Ok(ids)) => Some(ids),
            Ok(Err(err)) => {
                error!(error = %err, "failed to list active workers");
                None
            }
            Err(_) => {
                error!("listing active workers timed out");
                None
            }
        }
    }

    async fn process_worker(
        &self,
        worker_id: i64,
        from: NaiveDate,
        to: NaiveDate,
        cancel: &CancelSignal,
    ) -> (WorkerReport, bool) {
        let mut stats = RunStats::default();
        let mut worker_name = None;
        let mut cancelled = false;
        let mut date = from;
        while date <= to {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            match self.reconciler.reconcile(worker_id, date).await {
                Ok(DayOutcome::Written { outcome, entry }) => {
                    stats.record(outcome);
                    worker_name = Some(entry.worker_name);
                }
                Ok(DayOutcome::SkippedRestDay) => stats.skipped_rest_days += 1,
                Err(err) => {
                    warn!(worker_id, %date, error = %err, "day failed");
                    stats.errors += 1;
                }
            }
            date = match date.succ_opt() {
                Some(next) => next,
                None => break,
            };
        }
        let report = WorkerReport {
            worker_id,
            worker_name,
            ok: stats.errors == 0,
            stats,
        };
        (report, cancelled)
    }
}
