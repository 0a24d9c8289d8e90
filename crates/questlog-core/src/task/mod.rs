//! Task types and task-level operations.
//!
//! A task moves through a small lifecycle:
//!
//!   ACTIVE ──complete──> ACTIVE (recurring: new due date)
//!     │  ^                 │
//!     │  └──── WAITING     └──complete──> ARCHIVED (one-off, terminal)
//!
//! Archived tasks accept no further completions. Subtasks are owned by the
//! task and live in [`subtask`].

pub mod subtask;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::DomainId;
use crate::error::{Result, ValidationError};
use crate::recurrence::Recurrence;
use crate::user::UserId;

pub use subtask::{Subtask, SubtaskId};

pub type TaskId = i64;

macro_rules! token_enum {
    ($(#[$meta:meta])* $name:ident, $field:literal, { $($variant:ident => $token:literal),+ $(,)? }, default = $default:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $token),+
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name::$default
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($token => Ok($name::$variant),)+
                    _ => Err(ValidationError::InvalidValue {
                        field: $field.to_string(),
                        value: s.to_string(),
                    }),
                }
            }
        }
    };
}

token_enum!(
    /// How far out the task sits in the user's planning horizon.
    TimeHorizon, "time_horizon",
    { Now => "now", Short => "short", Mid => "mid", Long => "long" },
    default = Short
);

token_enum!(
    /// Effort the task demands.
    EnergyLevel, "energy",
    { Low => "low", Medium => "medium", High => "high" },
    default = Medium
);

token_enum!(
    /// MoSCoW-style priority.
    Priority, "priority",
    { Must => "must", Should => "should", Nice => "nice" },
    default = Should
);

token_enum!(
    /// Lifecycle status. `Archived` is terminal.
    TaskStatus, "status",
    { Active => "active", Waiting => "waiting", Archived => "archived" },
    default = Active
);

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Archived)
    }
}

/// A persisted task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub user_id: UserId,
    pub title: String,
    pub description: Option<String>,
    pub domain_id: Option<DomainId>,
    pub time_horizon: TimeHorizon,
    pub energy: EnergyLevel,
    pub priority: Priority,
    /// Unscaled XP weight, always positive
    pub base_weight: u32,
    pub recurrence: Recurrence,
    pub due_at: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    /// Grants a one-time bonus on the first-ever completion
    pub novelty_bonus: bool,
    /// Ordered by `order_idx`
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn is_active(&self) -> bool {
        self.status == TaskStatus::Active
    }

    /// Overdue means an explicit due date strictly before `reference`.
    pub fn is_overdue(&self, reference: DateTime<Utc>) -> bool {
        self.due_at.is_some_and(|due| due < reference)
    }

    /// Due on `reference`'s calendar date, in `reference`'s zone.
    pub fn is_due_today<Tz: TimeZone>(&self, reference: &DateTime<Tz>) -> bool {
        let local_due = self.due_at.map(|d| d.with_timezone(&reference.timezone()));
        self.recurrence.is_due_today(local_due.as_ref(), reference)
    }

    /// Push the due date out by `days`, starting from the current due date
    /// or `now` when the task has none.
    pub fn snoozed_due_at(&self, days: i64, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        if days < 1 {
            return Err(ValidationError::OutOfRange {
                field: "days".into(),
                message: format!("snooze needs at least one day, got {days}"),
            }
            .into());
        }
        Ok(self.due_at.unwrap_or(now) + Duration::days(days))
    }
}

/// Input for creating a task. Validated before it reaches storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub domain_id: Option<DomainId>,
    #[serde(default)]
    pub time_horizon: TimeHorizon,
    #[serde(default)]
    pub energy: EnergyLevel,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "default_base_weight")]
    pub base_weight: u32,
    #[serde(default)]
    pub recurrence: Recurrence,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub novelty_bonus: bool,
}

fn default_base_weight() -> u32 {
    1
}

impl NewTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            domain_id: None,
            time_horizon: TimeHorizon::default(),
            energy: EnergyLevel::default(),
            priority: Priority::default(),
            base_weight: default_base_weight(),
            recurrence: Recurrence::None,
            due_at: None,
            novelty_bonus: false,
        }
    }

    /// Parse and attach a recurrence descriptor.
    ///
    /// # Errors
    /// Returns a recurrence error for malformed descriptors, so bad input is
    /// rejected at creation time rather than at completion time.
    pub fn with_recurrence(mut self, descriptor: &str) -> Result<Self> {
        self.recurrence = Recurrence::parse(descriptor)?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::Empty("title".into()));
        }
        if self.base_weight == 0 {
            return Err(ValidationError::OutOfRange {
                field: "base_weight".into(),
                message: "must be a positive integer".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task() -> Task {
        Task {
            id: 1,
            user_id: 1,
            title: "Water plants".into(),
            description: None,
            domain_id: None,
            time_horizon: TimeHorizon::Short,
            energy: EnergyLevel::Low,
            priority: Priority::Nice,
            base_weight: 1,
            recurrence: Recurrence::Daily,
            due_at: None,
            status: TaskStatus::Active,
            novelty_bonus: false,
            subtasks: Vec::new(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap(),
        }
    }

    #[test]
    fn enum_tokens_parse_case_insensitively() {
        assert_eq!("HIGH".parse::<EnergyLevel>().unwrap(), EnergyLevel::High);
        assert_eq!(" must ".parse::<Priority>().unwrap(), Priority::Must);
        assert_eq!("mid".parse::<TimeHorizon>().unwrap(), TimeHorizon::Mid);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn defaults_match_new_task_defaults() {
        let new = NewTask::new("x");
        assert_eq!(new.energy, EnergyLevel::Medium);
        assert_eq!(new.priority, Priority::Should);
        assert_eq!(new.time_horizon, TimeHorizon::Short);
        assert_eq!(new.base_weight, 1);
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&TaskStatus::Archived).unwrap(), "\"archived\"");
        assert!(TaskStatus::Archived.is_terminal());
        assert!(!TaskStatus::Waiting.is_terminal());
    }

    #[test]
    fn validation_rejects_empty_title_and_zero_weight() {
        assert!(NewTask::new("   ").validate().is_err());
        let mut zero = NewTask::new("ok");
        zero.base_weight = 0;
        assert!(zero.validate().is_err());
        assert!(NewTask::new("ok").validate().is_ok());
    }

    #[test]
    fn with_recurrence_rejects_bad_descriptor() {
        assert!(NewTask::new("x").with_recurrence("every other day").is_err());
        let ok = NewTask::new("x").with_recurrence("weekly:FR").unwrap();
        assert_eq!(ok.recurrence.to_string(), "weekly:FR");
    }

    #[test]
    fn due_date_drives_due_today() {
        let mut task = sample_task();
        let reference = Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap();
        assert!(task.is_due_today(&reference));
        task.due_at = Some(Utc.with_ymd_and_hms(2024, 1, 12, 9, 0, 0).unwrap());
        assert!(!task.is_due_today(&reference));
        assert!(!task.is_overdue(reference));
    }

    #[test]
    fn snooze_extends_from_due_date_or_now() {
        let mut task = sample_task();
        let now = Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap();
        assert_eq!(task.snoozed_due_at(2, now).unwrap(), now + Duration::days(2));
        let due = Utc.with_ymd_and_hms(2024, 1, 20, 9, 0, 0).unwrap();
        task.due_at = Some(due);
        assert_eq!(task.snoozed_due_at(1, now).unwrap(), due + Duration::days(1));
        assert!(task.snoozed_due_at(0, now).is_err());
    }
}
