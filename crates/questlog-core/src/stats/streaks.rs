//! Streak leaderboard over a user's active tasks.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::streak::StreakState;
use crate::task::{Task, TaskId};

/// Days since the last completion after which a streak is at risk.
pub const AT_RISK_AFTER_DAYS: i64 = 2;

const LISTED: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreakEntry {
    pub task_id: TaskId,
    pub title: String,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreakOverview {
    pub best: Vec<StreakEntry>,
    pub weakest: Vec<StreakEntry>,
    pub at_risk: Vec<StreakEntry>,
}

impl StreakOverview {
    /// Only active tasks with a recorded streak take part.
    pub fn build(tasks: &[Task], streaks: &[(TaskId, StreakState)], reference: DateTime<Utc>) -> Self {
        let active: HashMap<TaskId, &Task> = tasks
            .iter()
            .filter(|t| t.is_active())
            .map(|t| (t.id, t))
            .collect();

        let entries: Vec<StreakEntry> = streaks
            .iter()
            .filter_map(|(task_id, state)| {
                active.get(task_id).map(|task| StreakEntry {
                    task_id: *task_id,
                    title: task.title.clone(),
                    current_streak: state.current_streak,
                    longest_streak: state.longest_streak,
                    last_completed_at: state.last_completed_at,
                })
            })
            .collect();

        let mut best = entries.clone();
        best.sort_by(|a, b| {
            b.current_streak
                .cmp(&a.current_streak)
                .then(a.task_id.cmp(&b.task_id))
        });
        best.truncate(LISTED);

        let mut weakest = entries.clone();
        weakest.sort_by_key(|e| (e.current_streak, e.task_id));
        weakest.truncate(LISTED);

        let cutoff = reference - Duration::days(AT_RISK_AFTER_DAYS);
        let at_risk = entries
            .into_iter()
            .filter(|e| e.last_completed_at.is_some_and(|last| last < cutoff))
            .take(LISTED)
            .collect();

        StreakOverview {
            best,
            weakest,
            at_risk,
        }
    }
}
