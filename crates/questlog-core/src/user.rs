//! The user record: XP, cached level and preferences.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

pub type UserId = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    /// Never decreases
    pub xp_total: f64,
    /// Derived from `xp_total`, cached
    pub level: u32,
    /// IANA zone used for every calendar question about this user
    pub timezone: Tz,
    pub notifications_enabled: bool,
    /// Local hour (0-23) the daily digest goes out
    pub digest_hour: u8,
    pub last_daily_digest: Option<DateTime<Utc>>,
    pub last_weekly_digest: Option<DateTime<Utc>>,
}

impl User {
    pub fn tz(&self) -> Tz {
        self.timezone
    }

    /// `instant` seen in the user's local time.
    pub fn local(&self, instant: DateTime<Utc>) -> DateTime<Tz> {
        instant.with_timezone(&self.timezone)
    }
}

/// Profile fields for a new user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub timezone: Tz,
    pub notifications_enabled: bool,
    pub digest_hour: u8,
}

impl Default for NewUser {
    fn default() -> Self {
        Self {
            name: "player".into(),
            timezone: Tz::UTC,
            notifications_enabled: true,
            digest_hour: 8,
        }
    }
}
