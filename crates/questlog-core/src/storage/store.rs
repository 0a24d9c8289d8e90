//! Storage port used by the engine.
//!
//! The engine never touches SQL. Everything it reads or writes goes through
//! [`EngineStore`]. A completion is read, planned and committed inside one
//! [`EngineStore::write_tx`] call, so writers in other processes sharing the
//! same store can never interleave with it.

use chrono::{DateTime, Utc};

use crate::balance::DomainTotals;
use crate::completion::{Completion, CompletionId, CompletionPlan};
use crate::domain::{Domain, DomainId};
use crate::error::Result;
use crate::reward::{NewReward, Reward, RewardId};
use crate::streak::StreakState;
use crate::task::{NewTask, Subtask, SubtaskId, Task, TaskId, TaskStatus};
use crate::user::{NewUser, User, UserId};

/// Reads available both on the store and inside an open write transaction.
pub trait StoreReads {
    /// # Errors
    /// `NotFound` when the user does not exist.
    fn user(&self, id: UserId) -> Result<User>;

    fn domain(&self, id: DomainId) -> Result<Domain>;

    /// Task with its subtasks in order.
    fn task(&self, id: TaskId) -> Result<Task>;

    fn tasks_for_user(&self, user_id: UserId, include_archived: bool) -> Result<Vec<Task>>;

    /// Streak for a task; the zero state when none has been recorded.
    fn streak(&self, task_id: TaskId) -> Result<StreakState>;

    fn completion_count(&self, task_id: TaskId) -> Result<u64>;

    /// Completions of a task with `start <= completed_at < end`.
    fn completions_between(
        &self,
        task_id: TaskId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64>;

    /// XP per domain from completions since `since`. Domain-less tasks are
    /// left out.
    fn domain_xp_since(&self, user_id: UserId, since: DateTime<Utc>) -> Result<DomainTotals>;
}

/// An open write transaction.
pub trait StoreTx: StoreReads {
    /// Apply every effect of a planned completion. XP is added to the
    /// stored total rather than overwriting it.
    fn commit_completion(&self, plan: &CompletionPlan) -> Result<CompletionId>;
}

pub trait EngineStore: StoreReads + Send + Sync {
    /// Run `f` inside one write transaction.
    ///
    /// The write lock is taken before `f` reads anything and held until it
    /// returns. An error from `f` rolls everything back.
    fn write_tx<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn StoreTx) -> Result<T>;

    // users

    fn create_user(&self, user: &NewUser, now: DateTime<Utc>) -> Result<User>;

    /// Oldest user, if any.
    fn first_user(&self) -> Result<Option<User>>;

    /// Persist profile fields and digest markers. XP and level are only
    /// written by [`StoreTx::commit_completion`].
    fn update_user_profile(&self, user: &User) -> Result<()>;

    // domains

    fn domains(&self) -> Result<Vec<Domain>>;

    fn domain_by_name(&self, name: &str) -> Result<Option<Domain>>;

    // tasks

    fn insert_task(&self, user_id: UserId, task: &NewTask, now: DateTime<Utc>) -> Result<Task>;

    fn update_task_schedule(
        &self,
        id: TaskId,
        due_at: Option<DateTime<Utc>>,
        status: TaskStatus,
    ) -> Result<()>;

    /// Change a task's status.
    ///
    /// # Errors
    /// `TaskArchived` when the stored task is already archived, checked in
    /// the same statement as the write; `NotFound` for unknown ids.
    fn update_task_status(&self, id: TaskId, status: TaskStatus) -> Result<()>;

    // subtasks

    fn insert_subtask(&self, task_id: TaskId, title: &str, order_idx: u32) -> Result<Subtask>;

    fn subtask(&self, id: SubtaskId) -> Result<Subtask>;

    fn update_subtask(&self, subtask: &Subtask) -> Result<()>;

    // streaks

    fn streaks_for_user(&self, user_id: UserId) -> Result<Vec<(TaskId, StreakState)>>;

    /// Clear the due date and write the skipped streak in one unit.
    fn commit_skip(&self, task_id: TaskId, streak: &StreakState) -> Result<()>;

    // completions

    /// All of a user's completions since `since`, oldest first.
    fn completions_since(&self, user_id: UserId, since: DateTime<Utc>) -> Result<Vec<Completion>>;

    // rewards

    fn insert_reward(&self, user_id: UserId, reward: &NewReward) -> Result<Reward>;

    fn reward(&self, id: RewardId) -> Result<Reward>;

    fn rewards_for_user(&self, user_id: UserId) -> Result<Vec<Reward>>;

    fn mark_reward_claimed(&self, id: RewardId, at: DateTime<Utc>) -> Result<()>;
}
