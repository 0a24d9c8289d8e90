//! Statistics module for questlog
//!
//! Read-only aggregations over tasks, completions and streaks: the daily
//! digest, the weekly review, a windowed stats snapshot and the streak
//! overview. Builders here are pure; the engine gathers their inputs.

mod digest;
mod snapshot;
mod streaks;

pub use digest::{DailyDigest, DigestEntry, WeeklyReview};
pub use snapshot::{DomainXp, StatsSnapshot, UNSORTED_DOMAIN};
pub use streaks::{StreakEntry, StreakOverview, AT_RISK_AFTER_DAYS};
