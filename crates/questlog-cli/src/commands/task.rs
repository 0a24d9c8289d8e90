//! Task management commands for CLI.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use clap::Subcommand;
use questlog_core::{
    EnergyLevel, EngineStore, NewTask, Priority, Recurrence, TaskStatus, TimeHorizon,
};

use super::{open_session, print_json, CliResult};

#[derive(Subcommand)]
pub enum TaskAction {
    /// Create a new task
    Create {
        /// Task title
        title: String,
        /// Task description
        #[arg(long)]
        description: Option<String>,
        /// Domain name (coding, research, admin, creative, health, recreation)
        #[arg(long)]
        domain: Option<String>,
        /// Time horizon: now, short, mid or long
        #[arg(long, default_value = "short")]
        horizon: TimeHorizon,
        /// Energy needed: low, medium or high
        #[arg(long, default_value = "medium")]
        energy: EnergyLevel,
        /// Priority: must, should or nice
        #[arg(long, default_value = "should")]
        priority: Priority,
        /// Base XP weight
        #[arg(long, default_value = "1")]
        weight: u32,
        /// Recurrence: none, daily, weekly[:mon,thu] or custom:mon,wed,fri
        #[arg(long, default_value = "none")]
        recurrence: Recurrence,
        /// Due date, RFC 3339 or YYYY-MM-DD (end of that local day)
        #[arg(long)]
        due: Option<String>,
        /// Grant the novelty bonus on the first completion
        #[arg(long)]
        novelty: bool,
    },
    /// List tasks
    List {
        /// Include archived tasks
        #[arg(long)]
        all: bool,
    },
    /// Get task details
    Get {
        /// Task ID
        id: i64,
    },
    /// Complete a task
    Done {
        /// Task ID
        id: i64,
    },
    /// Show the XP a completion would earn now
    Preview {
        /// Task ID
        id: i64,
    },
    /// Push the due date out
    Snooze {
        /// Task ID
        id: i64,
        /// Days to push
        #[arg(long, default_value = "1")]
        days: i64,
    },
    /// Skip the current occurrence and end the streak
    Skip {
        /// Task ID
        id: i64,
    },
    /// Set status: active, waiting or archived (final)
    Status {
        /// Task ID
        id: i64,
        /// New status
        status: TaskStatus,
    },
    /// Add a subtask
    SubtaskAdd {
        /// Parent task ID
        task_id: i64,
        /// Subtask title
        title: String,
    },
    /// Toggle a subtask done/undone
    SubtaskToggle {
        /// Subtask ID
        id: i64,
    },
}

pub fn run(action: TaskAction) -> CliResult {
    let session = open_session()?;
    let engine = &session.engine;
    let now = Utc::now();

    match action {
        TaskAction::Create {
            title,
            description,
            domain,
            horizon,
            energy,
            priority,
            weight,
            recurrence,
            due,
            novelty,
        } => {
            let domain_id = match domain {
                Some(name) => Some(
                    engine
                        .store()
                        .domain_by_name(&name)?
                        .ok_or_else(|| format!("unknown domain: {name}"))?
                        .id,
                ),
                None => None,
            };
            let due_at = due
                .map(|raw| parse_due(&raw, &session.user.tz()))
                .transpose()?;
            let new = NewTask {
                title,
                description,
                domain_id,
                time_horizon: horizon,
                energy,
                priority,
                base_weight: weight,
                recurrence,
                due_at,
                novelty_bonus: novelty,
            };
            let task = engine.create_task(session.user.id, &new, now)?;
            print_json(&task)?;
        }
        TaskAction::List { all } => {
            let tasks = engine.tasks(session.user.id, all)?;
            print_json(&tasks)?;
        }
        TaskAction::Get { id } => {
            print_json(&engine.task(id)?)?;
        }
        TaskAction::Done { id } => {
            let report = engine.complete_task(id, now)?;
            print_json(&report)?;
        }
        TaskAction::Preview { id } => {
            print_json(&engine.preview_xp(id, now)?)?;
        }
        TaskAction::Snooze { id, days } => {
            print_json(&engine.snooze_task(id, days, now)?)?;
        }
        TaskAction::Skip { id } => {
            print_json(&engine.skip_task(id)?)?;
        }
        TaskAction::Status { id, status } => {
            print_json(&engine.set_status(id, status)?)?;
        }
        TaskAction::SubtaskAdd { task_id, title } => {
            print_json(&engine.add_subtask(task_id, &title)?)?;
        }
        TaskAction::SubtaskToggle { id } => {
            print_json(&engine.toggle_subtask(id, now)?)?;
        }
    }
    Ok(())
}

/// RFC 3339 timestamps are taken as-is; a bare date means the last second
/// of that day in the user's zone.
fn parse_due<Z: TimeZone>(raw: &str, tz: &Z) -> Result<DateTime<Utc>, String> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| format!("invalid due date: {raw} (expected RFC 3339 or YYYY-MM-DD)"))?;
    let end_of_day = NaiveTime::from_hms_opt(23, 59, 59).ok_or("invalid time of day")?;
    date.and_time(end_of_day)
        .and_local_timezone(tz.clone())
        .earliest()
        .map(|at| at.with_timezone(&Utc))
        .ok_or_else(|| format!("due date falls in a clock change gap: {raw}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Offset};

    #[test]
    fn bare_date_is_end_of_local_day() {
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let due = parse_due("2024-05-01", &offset).unwrap();
        assert_eq!(due, Utc.with_ymd_and_hms(2024, 5, 1, 21, 59, 59).unwrap());
    }

    #[test]
    fn rfc3339_is_kept() {
        let due = parse_due("2024-05-01T08:00:00Z", &Utc.fix()).unwrap();
        assert_eq!(due, Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_due("next tuesday", &Utc.fix()).is_err());
    }
}
