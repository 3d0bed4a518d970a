//! Day schedule text: `"08:00-16:00"`, `"08:00-12:00,14:00-16:00"` or `"DESCANSO"`.
//!
//! The text form is what the ledger stores and what the classifier reads, so a
//! manually edited row is classified exactly like a freshly reconciled one.

use crate::model::ScheduleBlock;
use chrono::{NaiveTime, Timelike};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Marker stored for a weekday without expected attendance.
pub const REST_DAY: &str = "DESCANSO";

static BLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(\d{1,2}):(\d{2})\s*-\s*(\d{1,2}):(\d{2})\s*$").expect("static regex")
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("empty schedule")]
    Empty,
    #[error("rest day has no blocks")]
    RestDay,
    #[error("malformed block '{0}'")]
    Malformed(String),
    #[error("expected 1 or 2 blocks, got {0}")]
    BlockCount(usize),
}

/// Expected (entry, exit) pair of one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpectedBlock {
    pub entry: NaiveTime,
    pub exit: NaiveTime,
}

/// Whole minutes since midnight; seconds are ignored.
pub fn minute_of_day(t: NaiveTime) -> i64 {
    i64::from(t.hour()) * 60 + i64::from(t.minute())
}

pub fn is_rest_day(text: &str) -> bool {
    text.trim().eq_ignore_ascii_case(REST_DAY)
}

/// Parse schedule text into one (simple) or two (mixed) blocks.
pub fn parse(text: &str) -> Result<Vec<ExpectedBlock>, ScheduleError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ScheduleError::Empty);
    }
    if is_rest_day(trimmed) {
        return Err(ScheduleError::RestDay);
    }

    let blocks = trimmed
        .split(',')
        .map(parse_block)
        .collect::<Result<Vec<_>, _>>()?;

    match blocks.len() {
        1 | 2 => Ok(blocks),
        n => Err(ScheduleError::BlockCount(n)),
    }
}

fn parse_block(raw: &str) -> Result<ExpectedBlock, ScheduleError> {
    let malformed = || ScheduleError::Malformed(raw.trim().to_string());
    let caps = BLOCK_RE.captures(raw).ok_or_else(malformed)?;
    let num = |i: usize| caps[i].parse::<u32>().map_err(|_| malformed());
    let entry = NaiveTime::from_hms_opt(num(1)?, num(2)?, 0).ok_or_else(malformed)?;
    let exit = NaiveTime::from_hms_opt(num(3)?, num(4)?, 0).ok_or_else(malformed)?;
    Ok(ExpectedBlock { entry, exit })
}

/// Render the blocks of one weekday. Blocks lacking both sides are ignored;
/// a block with only one side keeps an empty half so it fails to parse later.
pub fn render(blocks: &[ScheduleBlock]) -> String {
    let parts: Vec<String> = blocks
        .iter()
        .filter(|b| !b.is_empty())
        .map(|b| format!("{}-{}", hhmm(b.entry), hhmm(b.exit)))
        .collect();
    if parts.is_empty() {
        REST_DAY.to_string()
    } else {
        parts.join(",")
    }
}

fn hhmm(t: Option<NaiveTime>) -> String {
    t.map(|t| t.format("%H:%M").to_string()).unwrap_or_default()
}
