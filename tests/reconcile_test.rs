use anyhow::{anyhow, Result};
use attendance_ledger::batch::{BatchRunner, CancelSignal};
use attendance_ledger::config::Rules;
use attendance_ledger::error::EngineError;
use attendance_ledger::model::{
    ActiveSchedule, DayLedgerEntry, DaySlots, IncidenceCode, LeaveLetter, LeaveRecord,
    PunchEvent, ScheduleBlock, SubType, UpsertOutcome, WorkerProfile,
};
use attendance_ledger::reconcile::{DayOutcome, DayReconciler};
use attendance_ledger::sources::{
    LedgerFilter, LedgerStore, LeaveSource, PunchSource, ScheduleSource, Sources,
    WorkerDirectory,
};
use chrono::{Datelike, NaiveDate, NaiveTime, Utc};
use rust_decimal_macros::dec;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

fn d(day: u32) -> NaiveDate {
    // 2025-03-03 is a Monday.
    NaiveDate::from_ymd_opt(2025, 3, day).unwrap()
}

fn t(h: u32, m: u32, s: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, s).unwrap()
}

fn office_week() -> Vec<ScheduleBlock> {
    (0..5)
        .map(|wd| ScheduleBlock::new(wd, t(9, 0, 0), t(17, 0, 0)))
        .collect()
}

#[derive(Default)]
struct State {
    workers: Vec<WorkerProfile>,
    schedules: HashMap<i64, Vec<ScheduleBlock>>,
    punches: Vec<PunchEvent>,
    leaves: Vec<LeaveRecord>,
    ledger: BTreeMap<(i64, NaiveDate), DayLedgerEntry>,
    next_id: i64,
    failing_days: HashSet<(i64, NaiveDate)>,
    slow_workers: HashSet<i64>,
    cancel_on_upsert: Option<CancelSignal>,
    upserts: Vec<(i64, NaiveDate)>,
}

/// In-memory backend that records what the engine asked of it.
#[derive(Clone, Default)]
struct Recording {
    state: Arc<Mutex<State>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    lookup_delay: Option<Duration>,
}

impl Recording {
    async fn with_worker(self, id: i64, category: Option<&str>) -> Self {
        {
            let mut s = self.state.lock().await;
            s.workers.push(WorkerProfile {
                worker_id: id,
                name: format!("Worker {id}"),
                department: Some("Finance".into()),
                category: category.map(str::to_string),
            });
            s.schedules.insert(id, office_week());
        }
        self
    }

    async fn punch(&self, worker_id: i64, date: NaiveDate, times: &[NaiveTime]) {
        let mut s = self.state.lock().await;
        for time in times {
            s.punches.push(PunchEvent {
                worker_id,
                date,
                time: *time,
            });
        }
    }

    async fn leave(&self, worker_id: i64, from: NaiveDate, to: NaiveDate, letter: LeaveLetter) {
        let mut s = self.state.lock().await;
        let id = s.leaves.len() as i64 + 1;
        s.leaves.push(LeaveRecord {
            id,
            worker_id,
            date_from: from,
            date_to: to,
            letter,
            nomenclature: "MED01".into(),
            display_name: "Medical leave".into(),
        });
    }

    async fn rows(&self) -> Vec<DayLedgerEntry> {
        self.state.lock().await.ledger.values().cloned().collect()
    }

    async fn row(&self, worker_id: i64, date: NaiveDate) -> Option<DayLedgerEntry> {
        self.state.lock().await.ledger.get(&(worker_id, date)).cloned()
    }

    fn sources(&self) -> Sources {
        Sources::from_store(Arc::new(self.clone()))
    }

    fn reconciler(&self) -> DayReconciler {
        DayReconciler::new(
            self.sources(),
            Rules::default(),
            Duration::from_millis(250),
            "test",
        )
    }
}

#[async_trait::async_trait]
impl PunchSource for Recording {
    async fn list_punches(&self, worker_id: i64, date: NaiveDate) -> Result<Vec<PunchEvent>> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let (fail, slow) = {
            let s = self.state.lock().await;
            (
                s.failing_days.contains(&(worker_id, date)),
                s.slow_workers.contains(&worker_id),
            )
        };
        if slow {
            tokio::time::sleep(Duration::from_secs(2)).await;
        } else if let Some(delay) = self.lookup_delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if fail {
            return Err(anyhow!("device sync table unavailable"));
        }
        let s = self.state.lock().await;
        let mut punches: Vec<PunchEvent> = s
            .punches
            .iter()
            .filter(|p| p.worker_id == worker_id && p.date == date)
            .copied()
            .collect();
        punches.sort_by_key(|p| p.time);
        Ok(punches)
    }
}

#[async_trait::async_trait]
impl ScheduleSource for Recording {
    async fn active_schedule(
        &self,
        worker_id: i64,
        date: NaiveDate,
    ) -> Result<Option<ActiveSchedule>> {
        let s = self.state.lock().await;
        let weekday = date.weekday().num_days_from_monday() as u8;
        Ok(s.schedules.get(&worker_id).map(|week| ActiveSchedule {
            template_id: 7,
            template_name: "Office".into(),
            blocks: week.iter().filter(|b| b.weekday == weekday).copied().collect(),
        }))
    }
}

#[async_trait::async_trait]
impl LeaveSource for Recording {
    async fn leave_for(&self, worker_id: i64, date: NaiveDate) -> Result<Option<LeaveRecord>> {
        let s = self.state.lock().await;
        Ok(s
            .leaves
            .iter()
            .find(|l| l.worker_id == worker_id && l.covers(date))
            .cloned())
    }
}

#[async_trait::async_trait]
impl WorkerDirectory for Recording {
    async fn worker(&self, worker_id: i64) -> Result<Option<WorkerProfile>> {
        let s = self.state.lock().await;
        Ok(s.workers.iter().find(|w| w.worker_id == worker_id).cloned())
    }

    async fn list_active_workers(&self) -> Result<Vec<i64>> {
        let s = self.state.lock().await;
        Ok(s.workers.iter().map(|w| w.worker_id).collect())
    }
}

#[async_trait::async_trait]
impl LedgerStore for Recording {
    async fn upsert(&self, entry: &DayLedgerEntry) -> Result<UpsertOutcome> {
        let mut s = self.state.lock().await;
        let key = (entry.worker_id, entry.date);
        s.upserts.push(key);
        if let Some(cancel) = &s.cancel_on_upsert {
            cancel.cancel();
        }
        let outcome = match s.ledger.get(&key) {
            Some(existing) if !existing.updatable => return Ok(UpsertOutcome::Locked),
            Some(existing) => {
                let mut row = entry.clone();
                row.id = existing.id;
                s.ledger.insert(key, row);
                UpsertOutcome::Updated
            }
            None => {
                s.next_id += 1;
                let mut row = entry.clone();
                row.id = Some(s.next_id);
                s.ledger.insert(key, row);
                UpsertOutcome::Inserted
            }
        };
        Ok(outcome)
    }

    async fn get_entry(&self, id: i64) -> Result<Option<DayLedgerEntry>> {
        let s = self.state.lock().await;
        Ok(s.ledger.values().find(|e| e.id == Some(id)).cloned())
    }

    async fn replace_entry(&self, entry: &DayLedgerEntry) -> Result<()> {
        let mut s = self.state.lock().await;
        s.ledger.insert((entry.worker_id, entry.date), entry.clone());
        Ok(())
    }

    async fn list(&self, _filter: &LedgerFilter) -> Result<Vec<DayLedgerEntry>> {
        Ok(self.state.lock().await.ledger.values().cloned().collect())
    }
}

#[tokio::test]
async fn reprocessing_a_day_updates_the_same_row() {
    let backend = Recording::default().with_worker(1, None).await;
    backend.punch(1, d(3), &[t(8, 55, 0), t(17, 2, 0)]).await;
    let runner = BatchRunner::new(backend.reconciler(), 2);
    let cancel = CancelSignal::new();

    let first = runner.run(&[1], d(3), d(3), &cancel).await;
    assert_eq!(first.inserted, 1);
    assert_eq!(first.updated, 0);

    let second = runner.run(&[1], d(3), d(3), &cancel).await;
    assert_eq!(second.inserted, 0);
    assert_eq!(second.updated, 1);

    let rows = backend.rows().await;
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.code, IncidenceCode::A);
    assert_eq!(row.schedule_text, "09:00-17:00");
    assert_eq!(row.hours_worked, dec!(8.12));
    assert_eq!(row.worker_name, "Worker 1");
    assert_eq!(row.processed_by, "test");
    assert_eq!(row.id, Some(1));
}

#[tokio::test]
async fn week_without_punches_skips_the_weekend() {
    let backend = Recording::default().with_worker(1, None).await;
    let runner = BatchRunner::new(backend.reconciler(), 1);

    let stats = runner.run(&[1], d(3), d(9), &CancelSignal::new()).await;
    assert_eq!(stats.inserted, 5);
    assert_eq!(stats.skipped_rest_days, 2);
    assert_eq!(stats.errors, 0);

    for row in backend.rows().await {
        assert_eq!(row.code, IncidenceCode::F);
        assert_eq!(row.sub_type, Some(SubType::NoShow));
    }
    assert!(backend.row(1, d(8)).await.is_none());
}

#[tokio::test]
async fn leave_takes_precedence_and_keeps_punches_for_display() {
    let backend = Recording::default().with_worker(1, None).await;
    backend.punch(1, d(4), &[t(9, 40, 0), t(15, 0, 0)]).await;
    backend.leave(1, d(4), d(4), LeaveLetter::L).await;

    let outcome = backend.reconciler().reconcile(1, d(4)).await.unwrap();
    let DayOutcome::Written { outcome, entry } = outcome else {
        panic!("expected a written row");
    };
    assert_eq!(outcome, UpsertOutcome::Inserted);
    assert_eq!(entry.code, IncidenceCode::L);
    assert_eq!(entry.sub_type, Some(SubType::Leave("MED01".into())));
    assert_eq!(entry.description, "Medical leave");
    assert_eq!(entry.minutes_late, 0);
    assert_eq!(entry.hours_worked, dec!(0));
    assert_eq!(entry.leave_id, Some(1));
    assert_eq!(entry.slots.entry1, Some(t(9, 40, 0)));
    assert_eq!(entry.slots.exit1, Some(t(15, 0, 0)));
}

#[tokio::test]
async fn rest_day_with_leave_or_punches_is_written() {
    let backend = Recording::default().with_worker(1, None).await;
    backend.leave(1, d(8), d(8), LeaveLetter::A).await;
    backend.punch(1, d(9), &[t(10, 0, 0), t(12, 0, 0)]).await;

    let stats = BatchRunner::new(backend.reconciler(), 1)
        .run(&[1], d(8), d(9), &CancelSignal::new())
        .await;
    assert_eq!(stats.inserted, 2);
    assert_eq!(stats.skipped_rest_days, 0);

    let saturday = backend.row(1, d(8)).await.unwrap();
    assert_eq!(saturday.code, IncidenceCode::J);
    assert_eq!(saturday.schedule_text, "DESCANSO");

    let sunday = backend.row(1, d(9)).await.unwrap();
    assert_eq!(sunday.code, IncidenceCode::O);
    assert_eq!(sunday.sub_type, Some(SubType::RestDay));
}

#[tokio::test]
async fn failed_day_is_counted_and_the_batch_continues() {
    let backend = Recording::default().with_worker(1, None).await;
    backend.state.lock().await.failing_days.insert((1, d(4)));

    let stats = BatchRunner::new(backend.reconciler(), 1)
        .run(&[1], d(3), d(5), &CancelSignal::new())
        .await;
    assert_eq!(stats.inserted, 2);
    assert_eq!(stats.errors, 1);
    assert!(backend.row(1, d(4)).await.is_none());
    assert!(backend.row(1, d(5)).await.is_some());
}

#[tokio::test]
async fn lookup_failures_map_to_engine_errors() {
    let backend = Recording::default().with_worker(1, None).await;
    backend.state.lock().await.failing_days.insert((1, d(4)));
    // Worker 2 is in the directory without a schedule; worker 3 has a
    // schedule but no directory entry.
    backend.state.lock().await.workers.push(WorkerProfile {
        worker_id: 2,
        name: "Worker 2".into(),
        department: None,
        category: None,
    });
    backend.state.lock().await.schedules.insert(3, office_week());

    let reconciler = backend.reconciler();
    let err = reconciler.reconcile(1, d(4)).await.unwrap_err();
    assert!(matches!(err, EngineError::InputUnavailable { what: "punch lookup", .. }));

    let err = reconciler.reconcile(2, d(4)).await.unwrap_err();
    assert!(matches!(err, EngineError::MissingSchedule { worker_id: 2, .. }));

    let err = reconciler.reconcile(3, d(4)).await.unwrap_err();
    assert!(matches!(err, EngineError::WorkerNotFound(3)));

    assert!(backend.state.lock().await.upserts.is_empty());
}

#[tokio::test]
async fn missing_schedule_with_leave_still_writes_a_row() {
    let backend = Recording::default();
    backend.state.lock().await.workers.push(WorkerProfile {
        worker_id: 4,
        name: "Worker 4".into(),
        department: None,
        category: None,
    });
    backend.leave(4, d(3), d(7), LeaveLetter::J).await;

    let outcome = backend.reconciler().reconcile(4, d(5)).await.unwrap();
    let DayOutcome::Written { entry, .. } = outcome else {
        panic!("expected a written row");
    };
    assert_eq!(entry.code, IncidenceCode::J);
    assert_eq!(entry.schedule_text, "");
    assert_eq!(entry.template_id, None);
}

#[tokio::test]
async fn slow_lookup_times_out() {
    let backend = Recording::default().with_worker(1, None).await;
    backend.state.lock().await.slow_workers.insert(1);
    let reconciler = DayReconciler::new(
        backend.sources(),
        Rules::default(),
        Duration::from_millis(20),
        "test",
    );

    let err = reconciler.reconcile(1, d(3)).await.unwrap_err();
    assert!(matches!(err, EngineError::Timeout { what: "punch lookup", .. }));
}

#[tokio::test]
async fn locked_rows_are_left_untouched() {
    let backend = Recording::default().with_worker(1, None).await;
    backend.punch(1, d(3), &[t(9, 0, 0), t(17, 0, 0)]).await;
    let runner = BatchRunner::new(backend.reconciler(), 1);
    let cancel = CancelSignal::new();
    runner.run(&[1], d(3), d(3), &cancel).await;

    {
        let mut s = backend.state.lock().await;
        let row = s.ledger.get_mut(&(1, d(3))).unwrap();
        row.updatable = false;
        row.description = "checked by HR".into();
    }

    let stats = runner.run(&[1], d(3), d(3), &cancel).await;
    assert_eq!(stats.locked, 1);
    assert_eq!(stats.updated, 0);
    assert_eq!(stats.processed(), 0);
    assert_eq!(backend.row(1, d(3)).await.unwrap().description, "checked by HR");
}

#[tokio::test]
async fn empty_worker_list_processes_every_active_worker() {
    let backend = Recording::default()
        .with_worker(1, None)
        .await
        .with_worker(2, Some("DOCENTE"))
        .await;

    let report = BatchRunner::new(backend.reconciler(), 4)
        .run_report(&[], d(3), d(3), &CancelSignal::new())
        .await;
    assert_eq!(report.totals.inserted, 2);
    let ids: Vec<i64> = report.workers.iter().map(|w| w.worker_id).collect();
    assert_eq!(ids, vec![1, 2]);
    let names: Vec<Option<&str>> = report
        .workers
        .iter()
        .map(|w| w.worker_name.as_deref())
        .collect();
    assert_eq!(names, vec![Some("Worker 1"), Some("Worker 2")]);
    assert!(report.workers.iter().all(|w| w.ok));
    assert!(!report.cancelled);
}

#[tokio::test]
async fn worker_report_flags_the_worker_with_a_failed_day() {
    let backend = Recording::default()
        .with_worker(1, None)
        .await
        .with_worker(2, None)
        .await;
    backend.state.lock().await.failing_days.insert((2, d(4)));

    let report = BatchRunner::new(backend.reconciler(), 2)
        .run_report(&[1, 2], d(3), d(4), &CancelSignal::new())
        .await;
    let first = &report.workers[0];
    assert!(first.ok);
    assert_eq!(first.stats.inserted, 2);
    let second = &report.workers[1];
    assert!(!second.ok);
    assert_eq!(second.worker_name.as_deref(), Some("Worker 2"));
    assert_eq!(second.stats.errors, 1);
    assert_eq!(report.totals.errors, 1);

    // Nothing was written for a worker whose only day failed.
    backend.state.lock().await.failing_days.insert((1, d(5)));
    let report = BatchRunner::new(backend.reconciler(), 1)
        .run_report(&[1], d(5), d(5), &CancelSignal::new())
        .await;
    assert!(!report.workers[0].ok);
    assert_eq!(report.workers[0].worker_name, None);
}

#[tokio::test]
async fn explicit_worker_list_is_deduplicated() {
    let backend = Recording::default().with_worker(1, None).await;
    let report = BatchRunner::new(backend.reconciler(), 2)
        .run_report(&[1, 1], d(3), d(3), &CancelSignal::new())
        .await;
    assert_eq!(report.workers.len(), 1);
    assert_eq!(report.totals.inserted, 1);
}

#[tokio::test]
async fn worker_concurrency_is_bounded() {
    let mut backend = Recording::default();
    backend.lookup_delay = Some(Duration::from_millis(20));
    for id in 1..=5 {
        backend = backend.with_worker(id, None).await;
    }

    let stats = BatchRunner::new(backend.reconciler(), 2)
        .run(&[], d(3), d(4), &CancelSignal::new())
        .await;
    assert_eq!(stats.inserted, 10);
    assert_eq!(backend.max_in_flight.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn cancellation_stops_before_the_next_day() {
    let backend = Recording::default().with_worker(1, None).await;
    let cancel = CancelSignal::new();
    backend.state.lock().await.cancel_on_upsert = Some(cancel.clone());

    let report = BatchRunner::new(backend.reconciler(), 1)
        .run_report(&[1], d(3), d(7), &cancel)
        .await;
    assert!(report.cancelled);
    assert_eq!(report.totals.inserted, 1);
    assert_eq!(backend.state.lock().await.upserts, vec![(1, d(3))]);
}

#[tokio::test]
async fn cancelled_before_start_writes_nothing() {
    let backend = Recording::default().with_worker(1, None).await;
    let cancel = CancelSignal::new();
    cancel.cancel();

    let report = BatchRunner::new(backend.reconciler(), 1)
        .run_report(&[1], d(3), d(7), &cancel)
        .await;
    assert!(report.cancelled);
    assert_eq!(report.totals.processed(), 0);
    assert!(backend.rows().await.is_empty());
}

#[tokio::test]
async fn scan_bursts_are_reduced_before_slot_assignment() {
    let backend = Recording::default().with_worker(1, None).await;
    backend
        .punch(1, d(3), &[t(17, 1, 0), t(8, 58, 0), t(8, 58, 10), t(8, 58, 56)])
        .await;

    let outcome = backend.reconciler().reconcile(1, d(3)).await.unwrap();
    let DayOutcome::Written { entry, .. } = outcome else {
        panic!("expected a written row");
    };
    // The burst keeps its boundary scans; the middle one is dropped.
    assert_eq!(
        entry.slots,
        DaySlots {
            entry1: Some(t(8, 58, 0)),
            exit1: Some(t(17, 1, 0)),
            entry2: Some(t(8, 58, 56)),
            exit2: None,
        }
    );
    assert_eq!(entry.code, IncidenceCode::A);
}

#[tokio::test]
async fn manual_edit_reclassifies_and_locks() {
    let backend = Recording::default().with_worker(1, Some("docente")).await;
    backend.reconciler().reconcile(1, d(3)).await.unwrap();
    let id = backend.row(1, d(3)).await.unwrap().id.unwrap();

    let edited = backend
        .reconciler()
        .edit_entry(
            id,
            attendance_ledger::edit::EntryEdit {
                slots: DaySlots {
                    entry1: Some(t(9, 0, 0)),
                    exit1: Some(t(16, 58, 0)),
                    ..Default::default()
                },
                updatable: false,
                edited_by: "supervisor".into(),
            },
        )
        .await
        .unwrap();
    // Instructional staff have no early-exit tolerance.
    assert_eq!(edited.code, IncidenceCode::ST);
    assert!(!edited.updatable);
    assert_eq!(edited.processed_by, "supervisor");
    assert!(edited.processed_at <= Utc::now());

    let stored = backend.row(1, d(3)).await.unwrap();
    assert_eq!(stored.code, IncidenceCode::ST);

    let err = backend
        .reconciler()
        .edit_entry(
            999,
            attendance_ledger::edit::EntryEdit {
                slots: DaySlots::default(),
                updatable: true,
                edited_by: "supervisor".into(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::EntryNotFound(999)));
}
