//! Row shapes and text codecs for the SQLite tables.
//!
//! Times are stored as `HH:MM:SS` text and hours as decimal text; the
//! helpers here are the only place that knows that.

use crate::model::{DayLedgerEntry, DaySlots, IncidenceCode, ScheduleBlock, SubType};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::str::FromStr;

/// Column list shared by the ledger INSERT and SELECT statements.
pub const LEDGER_COLUMNS: &str = "worker_id, date, worker_name, department, template_id, \
     schedule_text, code, sub_type, leave_id, entry1, exit1, entry2, exit2, minutes_late, \
     hours_worked, description, updatable, processed_at, processed_by";

/// One row of `schedule_template_blocks`.
#[derive(Debug, Clone)]
pub struct BlockRow {
    pub weekday: i64,
    pub entry: Option<String>,
    pub exit: Option<String>,
}

impl BlockRow {
    pub fn into_block(self) -> Result<ScheduleBlock> {
        let weekday = u8::try_from(self.weekday).context("weekday out of range")?;
        Ok(ScheduleBlock {
            weekday,
            entry: self.entry.as_deref().map(parse_time).transpose()?,
            exit: self.exit.as_deref().map(parse_time).transpose()?,
        })
    }
}

pub fn format_time(t: NaiveTime) -> String {
    t.format("%H:%M:%S").to_string()
}

/// Accepts `HH:MM:SS` and `HH:MM`.
pub fn parse_time(s: &str) -> Result<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .with_context(|| format!("invalid time {s:?}"))
}

fn opt_time(row: &SqliteRow, col: &str) -> Result<Option<NaiveTime>> {
    let raw: Option<String> = row.try_get(col)?;
    raw.as_deref().map(parse_time).transpose()
}

/// Slot values in ledger column order.
pub fn slot_texts(slots: &DaySlots) -> [Option<String>; 4] {
    slots.as_array().map(|t| t.map(format_time))
}

/// Decode a full ledger row, including its `id`.
pub fn entry_from_row(row: &SqliteRow) -> Result<DayLedgerEntry> {
    let code_text: String = row.try_get("code")?;
    let code = IncidenceCode::parse_code(&code_text)
        .ok_or_else(|| anyhow!("unknown incidence code {code_text:?}"))?;
    let sub_type: Option<String> = row.try_get("sub_type")?;
    let hours_text: String = row.try_get("hours_worked")?;
    let hours_worked = Decimal::from_str(&hours_text)
        .with_context(|| format!("invalid hours_worked {hours_text:?}"))?;
    let date: NaiveDate = row.try_get("date")?;
    let processed_at: DateTime<Utc> = row.try_get("processed_at")?;

    Ok(DayLedgerEntry {
        id: Some(row.try_get("id")?),
        worker_id: row.try_get("worker_id")?,
        date,
        worker_name: row.try_get("worker_name")?,
        department: row.try_get("department")?,
        template_id: row.try_get("template_id")?,
        schedule_text: row.try_get("schedule_text")?,
        code,
        sub_type: sub_type.as_deref().map(SubType::parse_sub_type),
        leave_id: row.try_get("leave_id")?,
        slots: DaySlots {
            entry1: opt_time(row, "entry1")?,
            exit1: opt_time(row, "exit1")?,
            entry2: opt_time(row, "entry2")?,
            exit2: opt_time(row, "exit2")?,
        },
        minutes_late: row.try_get("minutes_late")?,
        hours_worked,
        description: row.try_get("description")?,
        updatable: row.try_get("updatable")?,
        processed_at,
        processed_by: row.try_get("processed_by")?,
    })
}
