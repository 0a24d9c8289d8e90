//! Recurrence descriptors and occurrence resolution.
//!
//! A task repeats according to a small descriptor grammar:
//!
//! ```text
//! ""  | "none"          -> no recurrence
//! "daily"               -> every day
//! "weekly[:MO,WE,...]"  -> every 7 days, due on the listed weekdays (default MO)
//! "custom:MO,TH,..."    -> on each listed weekday
//! ```
//!
//! Descriptors are validated when a task is written, so completion never has
//! to deal with a malformed one. Calendar questions ("same day", "which
//! weekday") are answered in the time zone of the timestamps handed in; the
//! caller converts to the user's zone first.

use chrono::{DateTime, Datelike, Duration, TimeZone, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while parsing a recurrence descriptor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecurrenceError {
    #[error("unknown recurrence kind '{0}'")]
    UnknownKind(String),

    #[error("unrecognized weekday token '{0}'")]
    UnknownWeekday(String),

    #[error("custom recurrence needs at least one weekday")]
    EmptyCustomSet,

    #[error("recurrence '{0}' does not take arguments")]
    UnexpectedArguments(String),
}

/// Compact set of weekdays, Monday-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    pub const EMPTY: WeekdaySet = WeekdaySet(0);

    pub fn single(day: Weekday) -> Self {
        let mut set = Self::EMPTY;
        set.insert(day);
        set
    }

    pub fn insert(&mut self, day: Weekday) {
        self.0 |= 1 << day.num_days_from_monday();
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0 & (1 << day.num_days_from_monday()) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Days in Monday..Sunday order.
    pub fn iter(&self) -> impl Iterator<Item = Weekday> + '_ {
        ALL_WEEKDAYS.into_iter().filter(move |d| self.contains(*d))
    }
}

impl FromIterator<Weekday> for WeekdaySet {
    fn from_iter<I: IntoIterator<Item = Weekday>>(iter: I) -> Self {
        let mut set = Self::EMPTY;
        for day in iter {
            set.insert(day);
        }
        set
    }
}

impl fmt::Display for WeekdaySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tokens: Vec<&str> = self.iter().map(weekday_token).collect();
        f.write_str(&tokens.join(","))
    }
}

const ALL_WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

fn weekday_token(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "MO",
        Weekday::Tue => "TU",
        Weekday::Wed => "WE",
        Weekday::Thu => "TH",
        Weekday::Fri => "FR",
        Weekday::Sat => "SA",
        Weekday::Sun => "SU",
    }
}

fn parse_weekday(token: &str) -> Result<Weekday, RecurrenceError> {
    match token.to_ascii_uppercase().as_str() {
        "MO" | "MON" | "MONDAY" => Ok(Weekday::Mon),
        "TU" | "TUE" | "TUESDAY" => Ok(Weekday::Tue),
        "WE" | "WED" | "WEDNESDAY" => Ok(Weekday::Wed),
        "TH" | "THU" | "THURSDAY" => Ok(Weekday::Thu),
        "FR" | "FRI" | "FRIDAY" => Ok(Weekday::Fri),
        "SA" | "SAT" | "SATURDAY" => Ok(Weekday::Sat),
        "SU" | "SUN" | "SUNDAY" => Ok(Weekday::Sun),
        _ => Err(RecurrenceError::UnknownWeekday(token.to_string())),
    }
}

/// Blank tokens are dropped; anything else must be a weekday.
fn parse_weekdays(list: &str) -> Result<WeekdaySet, RecurrenceError> {
    list.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(parse_weekday)
        .collect()
}

/// Coarse recurrence category used by streak and scoring rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecurrenceClass {
    None,
    Daily,
    Weekly,
    Custom,
}

/// A parsed recurrence descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Recurrence {
    #[default]
    None,
    Daily,
    Weekly(WeekdaySet),
    Custom(WeekdaySet),
}

impl Recurrence {
    /// Parse a descriptor string.
    ///
    /// # Errors
    /// Returns [`RecurrenceError`] for unknown kinds, unknown weekday tokens,
    /// or a custom descriptor without any weekday.
    pub fn parse(descriptor: &str) -> Result<Self, RecurrenceError> {
        let trimmed = descriptor.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
            return Ok(Recurrence::None);
        }

        let (kind, args) = match trimmed.split_once(':') {
            Some((kind, args)) => (kind.trim(), Some(args)),
            None => (trimmed, None),
        };

        match kind.to_ascii_lowercase().as_str() {
            "daily" => match args {
                Some(a) if !a.trim().is_empty() => {
                    Err(RecurrenceError::UnexpectedArguments("daily".into()))
                }
                _ => Ok(Recurrence::Daily),
            },
            "weekly" => {
                let days = args.map(parse_weekdays).transpose()?.unwrap_or_default();
                if days.is_empty() {
                    Ok(Recurrence::Weekly(WeekdaySet::single(Weekday::Mon)))
                } else {
                    Ok(Recurrence::Weekly(days))
                }
            }
            "custom" => {
                let days = args.map(parse_weekdays).transpose()?.unwrap_or_default();
                if days.is_empty() {
                    Err(RecurrenceError::EmptyCustomSet)
                } else {
                    Ok(Recurrence::Custom(days))
                }
            }
            other => Err(RecurrenceError::UnknownKind(other.to_string())),
        }
    }

    pub fn class(&self) -> RecurrenceClass {
        match self {
            Recurrence::None => RecurrenceClass::None,
            Recurrence::Daily => RecurrenceClass::Daily,
            Recurrence::Weekly(_) => RecurrenceClass::Weekly,
            Recurrence::Custom(_) => RecurrenceClass::Custom,
        }
    }

    pub fn is_recurring(&self) -> bool {
        !matches!(self, Recurrence::None)
    }

    /// Next occurrence strictly after `anchor`, keeping its local time of day.
    ///
    /// Daily adds one calendar day and weekly adds seven. Custom scans up to a
    /// week ahead for the first listed weekday.
    pub fn next_occurrence<Tz: TimeZone>(&self, anchor: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        match self {
            Recurrence::None => None,
            Recurrence::Daily => Some(add_calendar_days(anchor, 1)),
            Recurrence::Weekly(_) => Some(add_calendar_days(anchor, 7)),
            Recurrence::Custom(days) => (1..=7)
                .map(|offset| add_calendar_days(anchor, offset))
                .find(|candidate| days.contains(candidate.weekday())),
        }
    }

    /// Whether a task is due on the calendar date of `reference`.
    ///
    /// An explicit due date always wins over the pattern, so a manually
    /// rescheduled recurring task is judged by its due date alone.
    pub fn is_due_today<Tz: TimeZone>(
        &self,
        due_at: Option<&DateTime<Tz>>,
        reference: &DateTime<Tz>,
    ) -> bool {
        if let Some(due) = due_at {
            let local_due = due.with_timezone(&reference.timezone());
            return local_due.date_naive() == reference.date_naive();
        }
        match self {
            Recurrence::None => false,
            Recurrence::Daily => true,
            Recurrence::Weekly(days) | Recurrence::Custom(days) => days.contains(reference.weekday()),
        }
    }
}

/// `anchor` moved by `days` on the local calendar, so a daylight-saving
/// change in between keeps the wall-clock time. A wall-clock time that falls
/// into a gap moves by whole 24-hour days instead.
fn add_calendar_days<Tz: TimeZone>(anchor: &DateTime<Tz>, days: i64) -> DateTime<Tz> {
    let shifted = anchor.clone() + Duration::days(days);
    anchor
        .naive_local()
        .checked_add_signed(Duration::days(days))
        .and_then(|naive| anchor.timezone().from_local_datetime(&naive).earliest())
        .unwrap_or(shifted)
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recurrence::None => f.write_str("none"),
            Recurrence::Daily => f.write_str("daily"),
            Recurrence::Weekly(days) => write!(f, "weekly:{days}"),
            Recurrence::Custom(days) => write!(f, "custom:{days}"),
        }
    }
}

impl FromStr for Recurrence {
    type Err = RecurrenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Recurrence::parse(s)
    }
}

impl TryFrom<String> for Recurrence {
    type Error = RecurrenceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Recurrence::parse(&value)
    }
}

impl From<Recurrence> for String {
    fn from(value: Recurrence) -> Self {
        value.to_string()
    }
}
