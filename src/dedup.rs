//! Collapse near-simultaneous punch noise.
//!
//! Consecutive punches no more than `window` apart form a cluster. A cluster
//! keeps its first and last punch, so a double scan and a quick in/out pair
//! stay distinguishable; it shrinks to a single punch only when first and
//! last fall within `collapse` of each other.

use crate::config::Rules;
use chrono::NaiveTime;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deduplicator {
    window_secs: i64,
    collapse_secs: i64,
}

impl Deduplicator {
    pub fn new(window_secs: u32, collapse_secs: u32) -> Self {
        Self {
            window_secs: i64::from(window_secs),
            collapse_secs: i64::from(collapse_secs),
        }
    }

    pub fn from_rules(rules: &Rules) -> Self {
        Self::new(rules.duplicate_window_secs, rules.collapse_window_secs)
    }

    /// `punches` must be ascending.
    pub fn dedup(&self, punches: &[NaiveTime]) -> Vec<NaiveTime> {
        let mut kept = Vec::with_capacity(punches.len());
        let mut i = 0;
        while i < punches.len() {
            let first = punches[i];
            let mut j = i + 1;
            while j < punches.len() && gap_secs(punches[j - 1], punches[j]) <= self.window_secs {
                j += 1;
            }
            let last = punches[j - 1];

            kept.push(first);
            if j - i > 1 {
                debug!(%first, %last, size = j - i, "punch cluster");
                if gap_secs(first, last) > self.collapse_secs {
                    kept.push(last);
                }
            }
            i = j;
        }
        kept
    }
}

fn gap_secs(a: NaiveTime, b: NaiveTime) -> i64 {
    (b - a).num_seconds().abs()
}
