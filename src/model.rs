use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::AddAssign;

/// Raw clock-in/out event as stored by the device sync.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PunchEvent {
    pub worker_id: i64,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

/// One expected (entry, exit) pair on a weekday. `weekday` is 0 = Monday.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduleBlock {
    pub weekday: u8,
    pub entry: Option<NaiveTime>,
    pub exit: Option<NaiveTime>,
}

impl ScheduleBlock {
    pub fn new(weekday: u8, entry: NaiveTime, exit: NaiveTime) -> Self {
        Self {
            weekday,
            entry: Some(entry),
            exit: Some(exit),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entry.is_none() && self.exit.is_none()
    }
}

/// Schedule assignment in effect for one calendar date, expanded to that
/// date's weekday. An empty `blocks` list is a rest day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActiveSchedule {
    pub template_id: i64,
    pub template_name: String,
    pub blocks: Vec<ScheduleBlock>,
}

impl ActiveSchedule {
    pub fn is_rest_day(&self) -> bool {
        self.blocks.iter().all(ScheduleBlock::is_empty)
    }
}

/// Incidence letter configured on a leave type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LeaveLetter {
    J,
    L,
    A,
}

impl LeaveLetter {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaveLetter::J => "J",
            LeaveLetter::L => "L",
            LeaveLetter::A => "A",
        }
    }

    pub fn parse_letter(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "J" => Some(LeaveLetter::J),
            "L" => Some(LeaveLetter::L),
            "A" => Some(LeaveLetter::A),
            _ => None,
        }
    }

    /// Ledger code for a day covered by this leave. `A` has no leave code of
    /// its own and is recorded as justified.
    pub fn incidence_code(&self) -> IncidenceCode {
        match self {
            LeaveLetter::L => IncidenceCode::L,
            LeaveLetter::J | LeaveLetter::A => IncidenceCode::J,
        }
    }
}

/// Pre-authorized movement (permit, medical leave, assignment).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaveRecord {
    pub id: i64,
    pub worker_id: i64,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub letter: LeaveLetter,
    pub nomenclature: String,
    pub display_name: String,
}

impl LeaveRecord {
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.date_from <= date && date <= self.date_to
    }
}

/// Worker snapshot copied onto each ledger row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerProfile {
    pub worker_id: i64,
    pub name: String,
    pub department: Option<String>,
    pub category: Option<String>,
}

/// Punches placed into the four canonical positions of a work-day.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DaySlots {
    pub entry1: Option<NaiveTime>,
    pub exit1: Option<NaiveTime>,
    pub entry2: Option<NaiveTime>,
    pub exit2: Option<NaiveTime>,
}

impl DaySlots {
    /// Fill slots in the given order; anything past the fourth value is dropped.
    pub fn from_ordered(times: &[NaiveTime]) -> Self {
        let at = |i: usize| times.get(i).copied();
        Self {
            entry1: at(0),
            exit1: at(1),
            entry2: at(2),
            exit2: at(3),
        }
    }

    pub fn as_array(&self) -> [Option<NaiveTime>; 4] {
        [self.entry1, self.exit1, self.entry2, self.exit2]
    }

    pub fn is_empty(&self) -> bool {
        self.as_array().iter().all(Option::is_none)
    }

    /// (entry, exit) punches backing schedule block `index` (0 or 1).
    pub fn block(&self, index: usize) -> (Option<NaiveTime>, Option<NaiveTime>) {
        if index == 0 {
            (self.entry1, self.exit1)
        } else {
            (self.entry2, self.exit2)
        }
    }
}

/// Single classification of a worker-day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IncidenceCode {
    /// On time.
    A,
    /// Fault / absence.
    F,
    #[serde(rename = "R-")]
    MinorLate,
    #[serde(rename = "R+")]
    MajorLate,
    /// Omission.
    O,
    /// Early exit.
    ST,
    /// Justified.
    J,
    /// Leave.
    L,
}

impl IncidenceCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidenceCode::A => "A",
            IncidenceCode::F => "F",
            IncidenceCode::MinorLate => "R-",
            IncidenceCode::MajorLate => "R+",
            IncidenceCode::O => "O",
            IncidenceCode::ST => "ST",
            IncidenceCode::J => "J",
            IncidenceCode::L => "L",
        }
    }

    pub fn parse_code(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Some(IncidenceCode::A),
            "F" => Some(IncidenceCode::F),
            "R-" => Some(IncidenceCode::MinorLate),
            "R+" => Some(IncidenceCode::MajorLate),
            "O" => Some(IncidenceCode::O),
            "ST" => Some(IncidenceCode::ST),
            "J" => Some(IncidenceCode::J),
            "L" => Some(IncidenceCode::L),
            _ => None,
        }
    }

    /// Rank used when merging blocks: `F > O > R+ > ST > R- > A`.
    /// Leave codes never take part in a merge and rank lowest.
    pub fn severity(&self) -> u8 {
        match self {
            IncidenceCode::F => 5,
            IncidenceCode::O => 4,
            IncidenceCode::MajorLate => 3,
            IncidenceCode::ST => 2,
            IncidenceCode::MinorLate => 1,
            IncidenceCode::A | IncidenceCode::J | IncidenceCode::L => 0,
        }
    }

    pub fn is_leave(&self) -> bool {
        matches!(self, IncidenceCode::J | IncidenceCode::L)
    }
}

impl fmt::Display for IncidenceCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Qualifier stored next to the code. Leave days carry the leave nomenclature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubType {
    NoShow,
    InvalidSchedule,
    RestDay,
    NoEntry,
    TooEarly,
    ExcessLate,
    NoExit,
    LateExit,
    Leave(String),
}

impl SubType {
    pub fn as_str(&self) -> &str {
        match self {
            SubType::NoShow => "no-show",
            SubType::InvalidSchedule => "invalid-schedule",
            SubType::RestDay => "rest-day",
            SubType::NoEntry => "no-entry",
            SubType::TooEarly => "too-early",
            SubType::ExcessLate => "excess-late",
            SubType::NoExit => "no-exit",
            SubType::LateExit => "late-exit",
            SubType::Leave(nomenclature) => nomenclature,
        }
    }

    pub fn parse_sub_type(s: &str) -> Self {
        match s {
            "no-show" => SubType::NoShow,
            "invalid-schedule" => SubType::InvalidSchedule,
            "rest-day" => SubType::RestDay,
            "no-entry" => SubType::NoEntry,
            "too-early" => SubType::TooEarly,
            "excess-late" => SubType::ExcessLate,
            "no-exit" => SubType::NoExit,
            "late-exit" => SubType::LateExit,
            other => SubType::Leave(other.to_string()),
        }
    }
}

impl fmt::Display for SubType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for SubType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SubType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(SubType::parse_sub_type(&s))
    }
}

/// Output of the incidence classifier for one worker-day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidenceResult {
    pub code: IncidenceCode,
    pub sub_type: Option<SubType>,
    pub minutes_late: i64,
    pub hours_worked: Decimal,
    pub description: String,
}

/// Persistent row, one per `(worker_id, date)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayLedgerEntry {
    pub id: Option<i64>,
    pub worker_id: i64,
    pub date: NaiveDate,
    pub worker_name: String,
    pub department: Option<String>,
    pub template_id: Option<i64>,
    pub schedule_text: String,
    pub code: IncidenceCode,
    pub sub_type: Option<SubType>,
    pub leave_id: Option<i64>,
    pub slots: DaySlots,
    pub minutes_late: i64,
    pub hours_worked: Decimal,
    pub description: String,
    /// `false` locks the row against reprocessing.
    pub updatable: bool,
    pub processed_at: DateTime<Utc>,
    pub processed_by: String,
}

impl DayLedgerEntry {
    /// Apply a fresh classification to the row.
    pub fn apply(&mut self, result: IncidenceResult) {
        self.code = result.code;
        self.sub_type = result.sub_type;
        self.minutes_late = result.minutes_late;
        self.hours_worked = result.hours_worked;
        self.description = result.description;
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.code.is_leave() && self.sub_type.is_none() {
            return Err("leave codes require the leave nomenclature as sub_type");
        }
        if self.minutes_late < 0 {
            return Err("minutes_late must not be negative");
        }
        if self.hours_worked < Decimal::ZERO {
            return Err("hours_worked must not be negative");
        }
        Ok(())
    }
}

/// What the ledger store did with an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// Existing row is locked (`updatable = false`) and was left untouched.
    Locked,
}

impl UpsertOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpsertOutcome::Inserted => "inserted",
            UpsertOutcome::Updated => "updated",
            UpsertOutcome::Locked => "locked",
        }
    }
}

/// Counters accumulated over one batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub inserted: u64,
    pub updated: u64,
    pub errors: u64,
    pub skipped_rest_days: u64,
    pub locked: u64,
}

impl RunStats {
    pub fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Locked => self.locked += 1,
        }
    }

    pub fn processed(&self) -> u64 {
        self.inserted + self.updated
    }
}

impl AddAssign for RunStats {
    fn add_assign(&mut self, rhs: Self) {
        self.inserted += rhs.inserted;
        self.updated += rhs.updated;
        self.errors += rhs.errors;
        self.skipped_rest_days += rhs.skipped_rest_days;
        self.locked += rhs.locked;
    }
}
