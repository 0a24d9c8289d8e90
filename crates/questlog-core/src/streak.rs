//! Per-task completion streaks.
//!
//! A streak counts consecutive qualifying completions under the task's
//! cadence. Each recurrence class has its own continuation window:
//!
//! | Class  | No-op                 | Continue                            | Otherwise |
//! |--------|-----------------------|-------------------------------------|-----------|
//! | daily  | same calendar day     | ≤ 30h elapsed or next calendar day  | reset     |
//! | weekly | same ISO week         | following ISO week                  | reset     |
//! | custom | same calendar day     | on/before the next scheduled day    | reset     |
//! | none   | -                     | ≤ 2 days elapsed                    | reset     |
//!
//! A reset sets the streak to 1, since the completion itself still counts.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::recurrence::Recurrence;

/// Continuation windows for streak updates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreakPolicy {
    /// Elapsed hours that still continue a daily streak
    #[serde(default = "default_daily_grace_hours")]
    pub daily_grace_hours: i64,
    /// Maximum gap in days for tasks without recurrence
    #[serde(default = "default_one_off_gap_days")]
    pub one_off_gap_days: i64,
}

fn default_daily_grace_hours() -> i64 {
    30
}
fn default_one_off_gap_days() -> i64 {
    2
}

impl Default for StreakPolicy {
    fn default() -> Self {
        Self {
            daily_grace_hours: default_daily_grace_hours(),
            one_off_gap_days: default_one_off_gap_days(),
        }
    }
}

/// How a completion moved the streak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreakTransition {
    /// First completion ever
    Started,
    /// Inside the continuation window
    Continued,
    /// Window missed, back to 1
    Reset,
    /// Repeat within the same period; state untouched
    Unchanged,
}

/// Streak state persisted per task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreakState {
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_completed_at: Option<DateTime<Utc>>,
}

/// Result of [`StreakState::advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakUpdate {
    pub state: StreakState,
    pub transition: StreakTransition,
}

impl StreakUpdate {
    pub fn is_noop(&self) -> bool {
        self.transition == StreakTransition::Unchanged
    }
}

impl StreakState {
    /// Apply a completion at `completed_at`.
    ///
    /// Calendar days and ISO weeks are taken in `completed_at`'s time zone.
    pub fn advance<Tz: TimeZone>(
        &self,
        recurrence: &Recurrence,
        completed_at: &DateTime<Tz>,
        policy: &StreakPolicy,
    ) -> StreakUpdate {
        let completed_utc = completed_at.with_timezone(&Utc);
        let Some(last_utc) = self.last_completed_at else {
            return self.step(1, completed_utc, StreakTransition::Started);
        };

        let elapsed = completed_utc - last_utc;
        if elapsed < Duration::zero() {
            // Backdated completions never move the streak.
            return self.unchanged();
        }

        let today = completed_at.date_naive();
        let last_day = last_utc.with_timezone(&completed_at.timezone()).date_naive();

        let continued = match recurrence {
            Recurrence::Daily => {
                if today == last_day {
                    return self.unchanged();
                }
                elapsed <= Duration::hours(policy.daily_grace_hours)
                    || last_day.succ_opt() == Some(today)
            }
            Recurrence::Weekly(_) => match iso_weeks_between(last_day, today) {
                0 => return self.unchanged(),
                1 => true,
                _ => false,
            },
            Recurrence::Custom(days) => {
                if today == last_day {
                    return self.unchanged();
                }
                let next_scheduled = (1..=7)
                    .filter_map(|offset| last_day.checked_add_signed(Duration::days(offset)))
                    .find(|d| days.contains(d.weekday()));
                next_scheduled.is_some_and(|due| today <= due)
            }
            Recurrence::None => elapsed <= Duration::days(policy.one_off_gap_days),
        };

        if continued {
            let next = self.current_streak.saturating_add(1);
            self.step(next, completed_utc, StreakTransition::Continued)
        } else {
            self.step(1, completed_utc, StreakTransition::Reset)
        }
    }

    /// State after the user explicitly skips a task: the run is over but the
    /// record stays.
    pub fn skipped(&self) -> StreakState {
        StreakState {
            current_streak: 0,
            longest_streak: self.longest_streak,
            last_completed_at: None,
        }
    }

    fn step(&self, current: u32, at: DateTime<Utc>, transition: StreakTransition) -> StreakUpdate {
        StreakUpdate {
            state: StreakState {
                current_streak: current,
                longest_streak: self.longest_streak.max(current),
                last_completed_at: Some(at),
            },
            transition,
        }
    }

    fn unchanged(&self) -> StreakUpdate {
        StreakUpdate {
            state: *self,
            transition: StreakTransition::Unchanged,
        }
    }
}

fn week_start(day: NaiveDate) -> NaiveDate {
    day - Duration::days(i64::from(day.weekday().num_days_from_monday()))
}

/// Whole ISO weeks from `from`'s week to `to`'s week.
fn iso_weeks_between(from: NaiveDate, to: NaiveDate) -> i64 {
    (week_start(to) - week_start(from)).num_days() / 7
}
