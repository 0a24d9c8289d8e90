//! Checklist items owned by a task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

use super::TaskId;

pub type SubtaskId = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: SubtaskId,
    pub task_id: TaskId,
    pub title: String,
    /// Unique within the owning task
    pub order_idx: u32,
    pub done: bool,
    pub done_at: Option<DateTime<Utc>>,
}

impl Subtask {
    /// Flip the done flag, stamping or clearing `done_at`.
    pub fn toggled(&self, now: DateTime<Utc>) -> Subtask {
        let done = !self.done;
        Subtask {
            done,
            done_at: done.then_some(now),
            ..self.clone()
        }
    }
}

/// Position for a new subtask: one past the current maximum.
pub fn next_order_idx(existing: &[Subtask]) -> u32 {
    existing
        .iter()
        .map(|s| s.order_idx)
        .max()
        .map_or(0, |max| max.saturating_add(1))
}

/// True when there is at least one subtask and every one is done.
pub fn all_done(subtasks: &[Subtask]) -> bool {
    !subtasks.is_empty() && subtasks.iter().all(|s| s.done)
}

pub fn validate_title(title: &str) -> Result<(), ValidationError> {
    if title.trim().is_empty() {
        return Err(ValidationError::Empty("subtask title".into()));
    }
    Ok(())
}
