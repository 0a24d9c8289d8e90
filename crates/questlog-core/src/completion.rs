//! Completion planning.
//!
//! Marking a task done is split in two. [`plan_completion`] is pure: given a
//! snapshot of the task, its streak, the user and recent domain totals, it
//! decides everything that should change. The engine then hands the
//! resulting [`CompletionPlan`] to the store, which applies it atomically.
//!
//! ```text
//! Active ──plan──> Completed-pending-rollover ──commit──> Active(new due)
//!                                                   └───> Archived
//! ```

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::balance::{BalancePolicy, DomainTotals};
use crate::error::{CoreError, Result};
use crate::leveling::{LevelCurve, LevelState};
use crate::recurrence::Recurrence;
use crate::scoring::{compute_xp, ScoringPolicy, XpBreakdown, XpInput};
use crate::streak::{StreakPolicy, StreakState, StreakUpdate};
use crate::task::{Task, TaskId, TaskStatus};
use crate::user::{User, UserId};

pub type CompletionId = i64;

/// Upper bound on rollover steps before jumping straight past the reference.
const MAX_ROLLOVER_STEPS: usize = 4096;

/// An append-only completion record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub id: CompletionId,
    pub task_id: TaskId,
    pub completed_at: DateTime<Utc>,
    pub xp_earned: f64,
    pub streak_after: u32,
}

/// All tunable constants the engine runs with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Policies {
    #[serde(default)]
    pub scoring: ScoringPolicy,
    #[serde(default)]
    pub streak: StreakPolicy,
    #[serde(default)]
    pub leveling: LevelCurve,
    #[serde(default)]
    pub balance: BalancePolicy,
}

/// Snapshot the planner works from.
#[derive(Debug, Clone, Copy)]
pub struct CompletionContext<'a> {
    pub task: &'a Task,
    pub user: &'a User,
    /// Streak before this completion
    pub streak: StreakState,
    /// Bias of the task's domain, 1.0 when it has none
    pub weight_bias: f64,
    pub domain_totals: &'a DomainTotals,
    /// No completion of this task has ever been recorded
    pub first_completion: bool,
    /// A completion already exists on the reference's local calendar date
    pub completed_on_reference_date: bool,
    pub policies: &'a Policies,
}

/// What happens to the task after a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "due_at", rename_all = "snake_case")]
pub enum Rollover {
    Archived,
    NextDue(DateTime<Utc>),
}

impl Rollover {
    pub fn status(&self) -> TaskStatus {
        match self {
            Rollover::Archived => TaskStatus::Archived,
            Rollover::NextDue(_) => TaskStatus::Active,
        }
    }

    pub fn due_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Rollover::Archived => None,
            Rollover::NextDue(due) => Some(*due),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelUp {
    pub level: u32,
    pub next_threshold: f64,
}

/// Every mutation one completion implies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionPlan {
    pub task_id: TaskId,
    pub user_id: UserId,
    pub completed_at: DateTime<Utc>,
    pub xp: XpBreakdown,
    pub streak: StreakUpdate,
    pub xp_total_after: f64,
    pub level_before: u32,
    pub level_after: LevelState,
    pub rollover: Rollover,
}

impl CompletionPlan {
    pub fn streak_after(&self) -> u32 {
        self.streak.state.current_streak
    }

    pub fn level_up(&self) -> Option<LevelUp> {
        (self.level_after.level > self.level_before).then_some(LevelUp {
            level: self.level_after.level,
            next_threshold: self.level_after.next_threshold,
        })
    }

    /// Caller-facing summary once the plan has been committed.
    pub fn result(&self, completion_id: CompletionId) -> CompletionResult {
        CompletionResult {
            completion_id,
            task_id: self.task_id,
            xp: self.xp.total,
            breakdown: self.xp.clone(),
            level_up: self.level_up(),
            streak_after: self.streak_after(),
            rollover: self.rollover,
        }
    }
}

/// Planner verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CompletionOutcome {
    /// Same-day repeat; nothing to apply
    AlreadyCompleted { task_id: TaskId },
    Planned(CompletionPlan),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResult {
    pub completion_id: CompletionId,
    pub task_id: TaskId,
    pub xp: f64,
    pub breakdown: XpBreakdown,
    pub level_up: Option<LevelUp>,
    pub streak_after: u32,
    pub rollover: Rollover,
}

/// What the engine reports after a completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CompletionReport {
    AlreadyCompleted { task_id: TaskId },
    Completed(CompletionResult),
}

impl CompletionReport {
    /// XP granted; zero for a same-day repeat.
    pub fn xp(&self) -> f64 {
        match self {
            CompletionReport::AlreadyCompleted { .. } => 0.0,
            CompletionReport::Completed(result) => result.xp,
        }
    }

    pub fn is_already_completed(&self) -> bool {
        matches!(self, CompletionReport::AlreadyCompleted { .. })
    }
}

/// Decide the effects of completing `context.task` at `reference`.
///
/// # Errors
/// Returns [`CoreError::TaskArchived`] when the task is archived. This is
/// checked before the same-day guard.
pub fn plan_completion(
    context: &CompletionContext<'_>,
    reference: DateTime<Utc>,
) -> Result<CompletionOutcome> {
    let task = context.task;
    if task.status.is_terminal() {
        return Err(CoreError::TaskArchived { task_id: task.id });
    }
    if context.completed_on_reference_date {
        debug!(task_id = task.id, "task already completed today");
        return Ok(CompletionOutcome::AlreadyCompleted { task_id: task.id });
    }

    let policies = context.policies;
    let tz = context.user.tz();
    let local_reference = reference.with_timezone(&tz);

    let xp = compute_xp(
        &XpInput {
            base_weight: task.base_weight,
            domain_id: task.domain_id,
            weight_bias: context.weight_bias,
            due_at: task.due_at,
            reference,
            recurrence: task.recurrence.class(),
            energy: task.energy,
            priority: task.priority,
            streak_before: context.streak.current_streak,
            domain_totals: context.domain_totals,
            first_completion: context.first_completion,
            novelty_bonus: task.novelty_bonus,
        },
        &policies.scoring,
        &policies.balance,
    );

    let streak = context
        .streak
        .advance(&task.recurrence, &local_reference, &policies.streak);

    let xp_total_after = context.user.xp_total + xp.total;
    let level_after = policies
        .leveling
        .resolve(xp_total_after, context.user.level);

    let rollover = rollover(&task.recurrence, task.due_at, reference, &tz);

    debug!(
        task_id = task.id,
        xp = xp.total,
        multiplier = xp.multiplier,
        streak = streak.state.current_streak,
        ?rollover,
        "completion planned"
    );

    Ok(CompletionOutcome::Planned(CompletionPlan {
        task_id: task.id,
        user_id: context.user.id,
        completed_at: reference,
        xp,
        streak,
        xp_total_after,
        level_before: context.user.level,
        level_after,
        rollover,
    }))
}

/// Next due date strictly after `reference`, or archival for one-off tasks.
///
/// Occurrences are stepped in the user's zone so custom weekdays land on the
/// user's calendar. A late completion steps past every missed occurrence
/// rather than just one, so the task never stays overdue.
pub fn rollover<Z: TimeZone>(
    recurrence: &Recurrence,
    due_at: Option<DateTime<Utc>>,
    reference: DateTime<Utc>,
    tz: &Z,
) -> Rollover {
    if !recurrence.is_recurring() {
        return Rollover::Archived;
    }

    let local_reference = reference.with_timezone(tz);
    let mut anchor = due_at.unwrap_or(reference).with_timezone(tz);
    for _ in 0..MAX_ROLLOVER_STEPS {
        match recurrence.next_occurrence(&anchor) {
            Some(next) if next > local_reference => {
                return Rollover::NextDue(next.with_timezone(&Utc));
            }
            Some(next) => anchor = next,
            None => break,
        }
    }

    // Ancient due date: restart from the reference itself.
    match recurrence.next_occurrence(&local_reference) {
        Some(next) => Rollover::NextDue(next.with_timezone(&Utc)),
        None => Rollover::Archived,
    }
}

/// UTC bounds `[start, end)` of the local calendar day containing `reference`.
///
/// Days are 23 or 25 hours long across a daylight-saving change.
pub fn local_day_bounds<Z: TimeZone>(
    reference: DateTime<Utc>,
    tz: &Z,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let day = reference.with_timezone(tz).date_naive();
    let start = start_of_local_day(day, tz, reference);
    let end = day
        .succ_opt()
        .map_or(start + Duration::days(1), |next| start_of_local_day(next, tz, reference));
    (start, end)
}

/// First instant of `day` in `tz`. Midnight can fall into a DST gap in some
/// zones; the day then starts at the first valid hour.
fn start_of_local_day<Z: TimeZone>(
    day: NaiveDate,
    tz: &Z,
    fallback: DateTime<Utc>,
) -> DateTime<Utc> {
    let midnight = day.and_time(NaiveTime::MIN);
    (0..=2)
        .find_map(|h| tz.from_local_datetime(&(midnight + Duration::hours(h))).earliest())
        .map_or(fallback, |start| start.with_timezone(&Utc))
}
