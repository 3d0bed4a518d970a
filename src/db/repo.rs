use super::model::{entry_from_row, format_time, parse_time, slot_texts, BlockRow, LEDGER_COLUMNS};
use crate::model::{
    ActiveSchedule, DayLedgerEntry, LeaveLetter, LeaveRecord, PunchEvent, ScheduleBlock,
    UpsertOutcome, WorkerProfile,
};
use crate::sources::LedgerFilter;
use anyhow::{anyhow, Context, Result};
use chrono::{Datelike, NaiveDate};
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::query::Query;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid database url {normalized}"))?
        .create_if_missing(true)
        // WAL journal, fsync on every commit.
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .busy_timeout(Duration::from_secs(5));
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    Ok(pool)
}

/// Expand a leading `~/` in a file-backed SQLite URL and create its parent
/// directory. In-memory and non-sqlite URLs pass through.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }

    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path.is_empty() {
        return url.to_string();
    }

    let path = match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path.to_string(),
    };
    if let Some(parent) = std::path::Path::new(&path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query {
        Some(q) => format!("sqlite://{path}?{q}"),
        None => format!("sqlite://{path}"),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Read side: punches, schedules, leave, workers.
// ---------------------------------------------------------------------------

#[instrument(skip_all)]
pub async fn list_punches(pool: &Pool, worker_id: i64, date: NaiveDate) -> Result<Vec<PunchEvent>> {
    let rows = sqlx::query(
        "SELECT time FROM punches WHERE worker_id = ? AND date = ? ORDER BY time ASC, id ASC",
    )
    .bind(worker_id)
    .bind(date)
    .fetch_all(pool)
    .await?;

    let mut punches = Vec::with_capacity(rows.len());
    for row in rows {
        let time: String = row.try_get("time")?;
        punches.push(PunchEvent {
            worker_id,
            date,
            time: parse_time(&time)?,
        });
    }
    Ok(punches)
}

/// Latest active assignment covering `date`, with the blocks of that date's
/// weekday.
#[instrument(skip_all)]
pub async fn active_schedule(
    pool: &Pool,
    worker_id: i64,
    date: NaiveDate,
) -> Result<Option<ActiveSchedule>> {
    let assignment = sqlx::query(
        "SELECT a.template_id, t.name FROM schedule_assignments a \
         JOIN schedule_templates t ON t.id = a.template_id \
         WHERE a.worker_id = ? AND a.active = 1 AND a.start_date <= ? \
           AND (a.end_date IS NULL OR a.end_date >= ?) \
         ORDER BY a.start_date DESC, a.id DESC LIMIT 1",
    )
    .bind(worker_id)
    .bind(date)
    .bind(date)
    .fetch_optional(pool)
    .await?;
    let Some(assignment) = assignment else {
        return Ok(None);
    };
    let template_id: i64 = assignment.try_get("template_id")?;
    let template_name: String = assignment.try_get("name")?;

    let weekday = i64::from(date.weekday().num_days_from_monday());
    let rows = sqlx::query(
        "SELECT weekday, entry, exit FROM schedule_template_blocks \
         WHERE template_id = ? AND weekday = ? ORDER BY position ASC",
    )
    .bind(template_id)
    .bind(weekday)
    .fetch_all(pool)
    .await?;

    let mut blocks = Vec::with_capacity(rows.len());
    for row in rows {
        let block = BlockRow {
            weekday: row.try_get("weekday")?,
            entry: row.try_get("entry")?,
            exit: row.try_get("exit")?,
        };
        blocks.push(block.into_block()?);
    }

    Ok(Some(ActiveSchedule {
        template_id,
        template_name,
        blocks,
    }))
}

#[instrument(skip_all)]
pub async fn leave_for(pool: &Pool, worker_id: i64, date: NaiveDate) -> Result<Option<LeaveRecord>> {
    let row = sqlx::query(
        "SELECT l.id, l.start_date, l.end_date, t.letter, t.nomenclature, t.name \
         FROM leaves l JOIN leave_types t ON t.id = l.leave_type_id \
         WHERE l.worker_id = ? AND l.start_date <= ? AND l.end_date >= ? \
         ORDER BY l.start_date DESC, l.id DESC LIMIT 1",
    )
    .bind(worker_id)
    .bind(date)
    .bind(date)
    .fetch_optional(pool)
    .await?;
    let Some(row) = row else {
        return Ok(None);
    };

    let letter: String = row.try_get("letter")?;
    Ok(Some(LeaveRecord {
        id: row.try_get("id")?,
        worker_id,
        date_from: row.try_get("start_date")?,
        date_to: row.try_get("end_date")?,
        letter: LeaveLetter::parse_letter(&letter)
            .ok_or_else(|| anyhow!("unknown leave letter {letter:?}"))?,
        nomenclature: row.try_get("nomenclature")?,
        display_name: row.try_get("name")?,
    }))
}

#[instrument(skip_all)]
pub async fn get_worker(pool: &Pool, worker_id: i64) -> Result<Option<WorkerProfile>> {
    let row = sqlx::query("SELECT id, name, department, category FROM workers WHERE id = ?")
        .bind(worker_id)
        .fetch_optional(pool)
        .await?;
    row.map(|row| -> Result<WorkerProfile> {
        Ok(WorkerProfile {
            worker_id: row.try_get("id")?,
            name: row.try_get("name")?,
            department: row.try_get("department")?,
            category: row.try_get("category")?,
        })
    })
    .transpose()
}

#[instrument(skip_all)]
pub async fn list_active_workers(pool: &Pool) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar::<_, i64>("SELECT id FROM workers WHERE active = 1 ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(ids)
}

// ---------------------------------------------------------------------------
// Ledger.
// ---------------------------------------------------------------------------

fn bind_entry<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    e: &DayLedgerEntry,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    let [entry1, exit1, entry2, exit2] = slot_texts(&e.slots);
    query
        .bind(e.worker_id)
        .bind(e.date)
        .bind(e.worker_name.clone())
        .bind(e.department.clone())
        .bind(e.template_id)
        .bind(e.schedule_text.clone())
        .bind(e.code.as_str())
        .bind(e.sub_type.as_ref().map(|s| s.as_str().to_string()))
        .bind(e.leave_id)
        .bind(entry1)
        .bind(exit1)
        .bind(entry2)
        .bind(exit2)
        .bind(e.minutes_late)
        .bind(e.hours_worked.to_string())
        .bind(e.description.clone())
        .bind(e.updatable)
        .bind(e.processed_at)
        .bind(e.processed_by.clone())
}

/// Write the row for `(worker_id, date)` in one statement. A locked row is
/// left as it is; the outcome comes from what the statement did.
#[instrument(skip_all, fields(worker_id = entry.worker_id, date = %entry.date))]
pub async fn upsert_entry(pool: &Pool, entry: &DayLedgerEntry) -> Result<UpsertOutcome> {
    let sql = format!(
        "INSERT INTO ledger ({LEDGER_COLUMNS}) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(worker_id, date) DO UPDATE SET \
           worker_name = excluded.worker_name, department = excluded.department, \
           template_id = excluded.template_id, schedule_text = excluded.schedule_text, \
           code = excluded.code, sub_type = excluded.sub_type, leave_id = excluded.leave_id, \
           entry1 = excluded.entry1, exit1 = excluded.exit1, \
           entry2 = excluded.entry2, exit2 = excluded.exit2, \
           minutes_late = excluded.minutes_late, hours_worked = excluded.hours_worked, \
           description = excluded.description, processed_at = excluded.processed_at, \
           processed_by = excluded.processed_by, revision = ledger.revision + 1, \
           updated_at = CURRENT_TIMESTAMP \
         WHERE ledger.updatable = 1 \
         RETURNING revision"
    );
    let revision: Option<i64> = bind_entry(sqlx::query(&sql), entry)
        .fetch_optional(pool)
        .await
        .context("ledger upsert")?
        .map(|row| row.try_get("revision"))
        .transpose()?;
    Ok(match revision {
        None => UpsertOutcome::Locked,
        Some(0) => UpsertOutcome::Inserted,
        Some(_) => UpsertOutcome::Updated,
    })
}

#[instrument(skip_all)]
pub async fn get_entry(pool: &Pool, id: i64) -> Result<Option<DayLedgerEntry>> {
    let sql = format!("SELECT id, {LEDGER_COLUMNS} FROM ledger WHERE id = ?");
    let row = sqlx::query(&sql).bind(id).fetch_optional(pool).await?;
    row.as_ref().map(entry_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn find_entry(
    pool: &Pool,
    worker_id: i64,
    date: NaiveDate,
) -> Result<Option<DayLedgerEntry>> {
    let sql = format!("SELECT id, {LEDGER_COLUMNS} FROM ledger WHERE worker_id = ? AND date = ?");
    let row = sqlx::query(&sql)
        .bind(worker_id)
        .bind(date)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(entry_from_row).transpose()
}

/// Overwrite classification, slots, lock flag and actor of row `entry.id`.
#[instrument(skip_all)]
pub async fn replace_entry(pool: &Pool, entry: &DayLedgerEntry) -> Result<()> {
    let id = entry.id.ok_or_else(|| anyhow!("ledger entry has no id"))?;
    let [entry1, exit1, entry2, exit2] = slot_texts(&entry.slots);
    let res = sqlx::query(
        "UPDATE ledger SET code = ?, sub_type = ?, leave_id = ?, \
           entry1 = ?, exit1 = ?, entry2 = ?, exit2 = ?, \
           minutes_late = ?, hours_worked = ?, description = ?, updatable = ?, \
           processed_at = ?, processed_by = ?, updated_at = CURRENT_TIMESTAMP \
         WHERE id = ?",
    )
    .bind(entry.code.as_str())
    .bind(entry.sub_type.as_ref().map(|s| s.as_str().to_string()))
    .bind(entry.leave_id)
    .bind(entry1)
    .bind(exit1)
    .bind(entry2)
    .bind(exit2)
    .bind(entry.minutes_late)
    .bind(entry.hours_worked.to_string())
    .bind(&entry.description)
    .bind(entry.updatable)
    .bind(entry.processed_at)
    .bind(&entry.processed_by)
    .bind(id)
    .execute(pool)
    .await?;
    if res.rows_affected() == 0 {
        return Err(anyhow!("ledger entry {id} does not exist"));
    }
    Ok(())
}

/// Rows matching `filter`, newest date first, then by worker.
#[instrument(skip_all)]
pub async fn list_entries(pool: &Pool, filter: &LedgerFilter) -> Result<Vec<DayLedgerEntry>> {
    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT id, {LEDGER_COLUMNS} FROM ledger WHERE 1 = 1"));
    if let Some(worker_id) = filter.worker_id {
        qb.push(" AND worker_id = ").push_bind(worker_id);
    }
    if let Some(from) = filter.date_from {
        qb.push(" AND date >= ").push_bind(from);
    }
    if let Some(to) = filter.date_to {
        qb.push(" AND date <= ").push_bind(to);
    }
    if let Some(code) = filter.code {
        qb.push(" AND code = ").push_bind(code.as_str());
    }
    qb.push(" ORDER BY date DESC, worker_id ASC");

    let rows = qb.build().fetch_all(pool).await?;
    rows.iter().map(entry_from_row).collect()
}

// ---------------------------------------------------------------------------
// Seeding helpers for the administrative tables.
// ---------------------------------------------------------------------------

#[instrument(skip_all)]
pub async fn insert_worker(
    pool: &Pool,
    worker: &WorkerProfile,
    active: bool,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO workers (id, name, department, category, active) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(worker.worker_id)
    .bind(&worker.name)
    .bind(&worker.department)
    .bind(&worker.category)
    .bind(active)
    .execute(pool)
    .await?;
    Ok(())
}

/// Create a template from its blocks; blocks sharing a weekday take positions
/// in the order given.
#[instrument(skip_all)]
pub async fn insert_schedule_template(
    pool: &Pool,
    name: &str,
    blocks: &[ScheduleBlock],
) -> Result<i64> {
    let mut tx = pool.begin().await?;
    let template_id: i64 =
        sqlx::query_scalar("INSERT INTO schedule_templates (name) VALUES (?) RETURNING id")
            .bind(name)
            .fetch_one(&mut *tx)
            .await?;

    let mut positions = [0_i64; 7];
    for block in blocks {
        let day = usize::from(block.weekday);
        let position = positions
            .get_mut(day)
            .ok_or_else(|| anyhow!("weekday {} out of range", block.weekday))?;
        sqlx::query(
            "INSERT INTO schedule_template_blocks (template_id, weekday, position, entry, exit) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(template_id)
        .bind(i64::from(block.weekday))
        .bind(*position)
        .bind(block.entry.map(format_time))
        .bind(block.exit.map(format_time))
        .execute(&mut *tx)
        .await?;
        *position += 1;
    }
    tx.commit().await?;
    Ok(template_id)
}

#[instrument(skip_all)]
pub async fn assign_schedule(
    pool: &Pool,
    worker_id: i64,
    template_id: i64,
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
) -> Result<i64> {
    let id = sqlx::query_scalar(
        "INSERT INTO schedule_assignments (worker_id, template_id, start_date, end_date) \
         VALUES (?, ?, ?, ?) RETURNING id",
    )
    .bind(worker_id)
    .bind(template_id)
    .bind(start_date)
    .bind(end_date)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

#[instrument(skip_all)]
pub async fn insert_punch(pool: &Pool, punch: &PunchEvent) -> Result<()> {
    sqlx::query("INSERT INTO punches (worker_id, date, time) VALUES (?, ?, ?)")
        .bind(punch.worker_id)
        .bind(punch.date)
        .bind(format_time(punch.time))
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn insert_leave_type(
    pool: &Pool,
    nomenclature: &str,
    name: &str,
    letter: LeaveLetter,
) -> Result<i64> {
    let id = sqlx::query_scalar(
        "INSERT INTO leave_types (nomenclature, name, letter) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(nomenclature)
    .bind(name)
    .bind(letter.as_str())
    .fetch_one(pool)
    .await?;
    Ok(id)
}

#[instrument(skip_all)]
pub async fn insert_leave(
    pool: &Pool,
    worker_id: i64,
    leave_type_id: i64,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> Result<i64> {
    let id = sqlx::query_scalar(
        "INSERT INTO leaves (worker_id, leave_type_id, start_date, end_date) \
         VALUES (?, ?, ?, ?) RETURNING id",
    )
    .bind(worker_id)
    .bind(leave_type_id)
    .bind(start_date)
    .bind(end_date)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

/// Lock or unlock a row against reprocessing.
#[instrument(skip_all)]
pub async fn set_updatable(pool: &Pool, id: i64, updatable: bool) -> Result<()> {
    sqlx::query("UPDATE ledger SET updatable = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?")
        .bind(updatable)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}
