//! Place deduplicated punches into entry1/exit1/entry2/exit2.
//!
//! With three or more punches and a usable schedule, every expected anchor
//! claims the closest unused punch, so extra scans cannot push the punches
//! that match the contracted hours out of their slots.

use crate::model::DaySlots;
use crate::schedule::{self, minute_of_day, ExpectedBlock, ScheduleError};
use chrono::NaiveTime;
use tracing::{debug, warn};

/// `punches` must be ascending. `schedule_text` is the day's expected hours,
/// if any.
pub fn assign(punches: &[NaiveTime], schedule_text: Option<&str>) -> DaySlots {
    if punches.len() < 3 {
        return DaySlots::from_ordered(punches);
    }

    let Some(text) = schedule_text else {
        return DaySlots::from_ordered(punches);
    };

    match assign_by_anchor(punches, text) {
        Ok(slots) => {
            debug!(?slots, "slots assigned by nearest anchor");
            slots
        }
        Err(err) => {
            if !schedule::is_rest_day(text) {
                warn!(%err, schedule = text, "anchor assignment failed; using chronological order");
            }
            DaySlots::from_ordered(punches)
        }
    }
}

fn assign_by_anchor(punches: &[NaiveTime], text: &str) -> Result<DaySlots, ScheduleError> {
    let blocks = schedule::parse(text)?;
    let anchors = anchors(&blocks);

    let mut used = vec![false; punches.len()];
    let mut picked: [Option<NaiveTime>; 4] = [None; 4];
    for (slot, anchor) in anchors.iter().enumerate() {
        if let Some(idx) = nearest_unused(punches, &used, *anchor) {
            used[idx] = true;
            picked[slot] = Some(punches[idx]);
        }
    }

    // Leftover punches take the empty slots in chronological order.
    let mut leftovers = punches
        .iter()
        .zip(&used)
        .filter(|(_, used)| !**used)
        .map(|(p, _)| *p);
    for slot in picked.iter_mut().filter(|s| s.is_none()) {
        match leftovers.next() {
            Some(p) => *slot = Some(p),
            None => break,
        }
    }

    Ok(DaySlots {
        entry1: picked[0],
        exit1: picked[1],
        entry2: picked[2],
        exit2: picked[3],
    })
}

fn anchors(blocks: &[ExpectedBlock]) -> Vec<NaiveTime> {
    blocks.iter().flat_map(|b| [b.entry, b.exit]).collect()
}

/// Index of the unused punch closest to `anchor` in whole minutes; the
/// earliest punch wins a tie.
fn nearest_unused(punches: &[NaiveTime], used: &[bool], anchor: NaiveTime) -> Option<usize> {
    let target = minute_of_day(anchor);
    punches
        .iter()
        .enumerate()
        .filter(|(i, _)| !used[*i])
        .min_by_key(|(i, p)| ((minute_of_day(**p) - target).abs(), *i))
        .map(|(i, _)| i)
}
