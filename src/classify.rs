//! Incidence classification of one worker-day.
//!
//! Evaluation order: leave, no punches, schedule parsing, then each schedule
//! block on its own. Blocks are merged by keeping the most severe code
//! (`F > O > R+ > ST > R- > A`) and summing late minutes and worked hours.
//! All thresholds come from [`Rules`]; minute arithmetic ignores seconds.

use crate::config::Rules;
use crate::model::{DaySlots, IncidenceCode, IncidenceResult, LeaveRecord, SubType};
use crate::schedule::{self, minute_of_day, ExpectedBlock};
use chrono::NaiveTime;
use rust_decimal::Decimal;

/// Classify a day. Pure: the same inputs always give the same result.
pub fn classify(
    rules: &Rules,
    slots: &DaySlots,
    schedule_text: &str,
    category: Option<&str>,
    leave: Option<&LeaveRecord>,
) -> IncidenceResult {
    if let Some(leave) = leave {
        return IncidenceResult {
            code: leave.letter.incidence_code(),
            sub_type: Some(SubType::Leave(leave.nomenclature.clone())),
            minutes_late: 0,
            hours_worked: Decimal::ZERO,
            description: leave.display_name.clone(),
        };
    }

    let rest_day = schedule::is_rest_day(schedule_text);
    if slots.is_empty() {
        return if rest_day {
            flat(IncidenceCode::O, SubType::RestDay, "Omission: rest day without attendance")
        } else {
            flat(IncidenceCode::F, SubType::NoShow, "Fault: no attendance recorded")
        };
    }
    if rest_day {
        return flat(IncidenceCode::O, SubType::RestDay, "Omission: punches on a rest day");
    }

    let blocks = match schedule::parse(schedule_text) {
        Ok(blocks) => blocks,
        Err(_) => {
            return flat(IncidenceCode::O, SubType::InvalidSchedule, "Omission: invalid schedule")
        }
    };

    let exempt = rules.is_exempt(category);
    let outcomes: Vec<BlockOutcome> = blocks
        .iter()
        .enumerate()
        .map(|(i, expected)| {
            let (entry, exit) = slots.block(i);
            evaluate_block(rules, exempt, expected, entry, exit)
        })
        .collect();

    merge(outcomes)
}

fn flat(code: IncidenceCode, sub_type: SubType, description: &str) -> IncidenceResult {
    IncidenceResult {
        code,
        sub_type: Some(sub_type),
        minutes_late: 0,
        hours_worked: Decimal::ZERO,
        description: description.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct BlockOutcome {
    code: IncidenceCode,
    sub_type: Option<SubType>,
    minutes_late: i64,
    minutes_worked: i64,
    narrative: String,
}

impl BlockOutcome {
    fn fault(sub_type: SubType, minutes_late: i64, narrative: String) -> Self {
        Self {
            code: IncidenceCode::F,
            sub_type: Some(sub_type),
            minutes_late,
            minutes_worked: 0,
            narrative,
        }
    }
}

fn evaluate_block(
    rules: &Rules,
    exempt: bool,
    expected: &ExpectedBlock,
    entry: Option<NaiveTime>,
    exit: Option<NaiveTime>,
) -> BlockOutcome {
    let Some(entry) = entry else {
        return BlockOutcome::fault(SubType::NoEntry, 0, "Fault: no entry punch".into());
    };

    let delta_entry = minute_of_day(entry) - minute_of_day(expected.entry);
    if delta_entry < 0 && -delta_entry > rules.early_arrival_allowance_min {
        return BlockOutcome::fault(
            SubType::TooEarly,
            0,
            format!("Fault: entry {} min before schedule", -delta_entry),
        );
    }

    let late = delta_entry.max(0);
    let (entry_code, entry_sub, entry_narrative) = if late <= rules.on_time_tolerance_min {
        (IncidenceCode::A, None, "On time".to_string())
    } else if late <= rules.minor_late_max_min {
        (IncidenceCode::MinorLate, None, format!("Minor late ({late} min)"))
    } else if late <= rules.major_late_max_min {
        (IncidenceCode::MajorLate, None, format!("Major late ({late} min)"))
    } else {
        (
            IncidenceCode::F,
            Some(SubType::ExcessLate),
            format!("Fault: {late} min late (limit {})", rules.major_late_max_min),
        )
    };

    let Some(exit) = exit else {
        if entry_code == IncidenceCode::F {
            return BlockOutcome::fault(SubType::ExcessLate, late, entry_narrative);
        }
        return BlockOutcome {
            code: IncidenceCode::O,
            sub_type: Some(SubType::NoExit),
            minutes_late: late,
            minutes_worked: 0,
            narrative: format!("{entry_narrative}. Omission: no exit punch"),
        };
    };

    let delta_exit = minute_of_day(exit) - minute_of_day(expected.exit);
    let early_exit_allowance = if exempt { 0 } else { rules.early_exit_allowance_min };
    let (exit_code, exit_sub, exit_narrative) = if delta_exit > rules.late_exit_max_min {
        (
            IncidenceCode::F,
            Some(SubType::LateExit),
            Some(format!(
                "Fault: exit {delta_exit} min after schedule (limit {})",
                rules.late_exit_max_min
            )),
        )
    } else if delta_exit < 0 && -delta_exit > early_exit_allowance {
        (
            IncidenceCode::ST,
            None,
            Some(format!("Early exit ({} min before schedule)", -delta_exit)),
        )
    } else {
        (IncidenceCode::A, None, None)
    };

    let (code, sub_type) = if exit_code.severity() > entry_code.severity() {
        (exit_code, exit_sub)
    } else {
        (entry_code, entry_sub)
    };
    let narrative = match exit_narrative {
        Some(exit_narrative) => format!("{entry_narrative}. {exit_narrative}"),
        None => entry_narrative,
    };

    BlockOutcome {
        code,
        sub_type,
        minutes_late: late,
        minutes_worked: (minute_of_day(exit) - minute_of_day(entry)).max(0),
        narrative,
    }
}

fn merge(outcomes: Vec<BlockOutcome>) -> IncidenceResult {
    let mut worst: Option<&BlockOutcome> = None;
    for outcome in &outcomes {
        if worst.map_or(true, |w| outcome.code.severity() > w.code.severity()) {
            worst = Some(outcome);
        }
    }
    let (code, sub_type) = worst
        .map(|w| (w.code, w.sub_type.clone()))
        .unwrap_or((IncidenceCode::O, Some(SubType::InvalidSchedule)));

    let minutes_late = outcomes.iter().map(|o| o.minutes_late).sum();
    let minutes_worked: i64 = outcomes.iter().map(|o| o.minutes_worked).sum();
    let description = if outcomes.len() == 1 {
        outcomes[0].narrative.clone()
    } else {
        outcomes
            .iter()
            .enumerate()
            .map(|(i, o)| format!("Block {}: {}", i + 1, o.narrative))
            .collect::<Vec<_>>()
            .join("; ")
    };

    IncidenceResult {
        code,
        sub_type,
        minutes_late,
        hours_worked: minutes_to_hours(minutes_worked),
        description,
    }
}

/// Minutes as hours rounded to two decimals.
pub fn minutes_to_hours(minutes: i64) -> Decimal {
    (Decimal::from(minutes) / Decimal::from(60)).round_dp(2)
}
