//! The engine service: every operation a front end calls.
//!
//! Pure decisions live in the leaf modules; this layer gathers their inputs
//! from an [`EngineStore`], applies the results and serializes writers.
//!
//! ## Locking
//!
//! Completions, snoozes, skips, status changes and subtask edits hold a
//! per-task lock for the whole operation. Anything that reads and rewrites the
//! user record (XP, level, reward claims, digest markers) additionally holds a
//! per-user lock, always taken after the task lock. Read-only aggregation
//! takes no locks.
//!
//! These locks only order threads in this process. A completion also runs
//! inside [`EngineStore::write_tx`], which re-reads everything it plans from
//! under the store's own write lock, so separate processes sharing one
//! database cannot double-apply it.

use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::balance::{self, BalancePolicy, DomainTotals};
use crate::completion::{
    local_day_bounds, plan_completion, CompletionContext, CompletionId, CompletionOutcome,
    CompletionPlan, CompletionReport, Policies,
};
use crate::domain::{DomainId, NEUTRAL_BIAS};
use crate::error::{CoreError, Result};
use crate::leveling::LevelState;
use crate::reward::{self, ClaimOutcome, NewReward, Reward, RewardId};
use crate::scoring::{self, XpBreakdown, XpInput};
use crate::stats::{DailyDigest, StatsSnapshot, StreakOverview, WeeklyReview};
use crate::storage::{Config, EngineStore, StoreReads, StoreTx};
use crate::task::subtask::{self, Subtask, SubtaskId};
use crate::task::{NewTask, Task, TaskId, TaskStatus};
use crate::user::{NewUser, User, UserId};

/// Length of the weekly review window.
const WEEK_DAYS: u32 = 7;

/// One mutex per key, created on demand and dropped when unused.
#[derive(Debug)]
struct KeyedLocks<K> {
    slots: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn with_lock<R>(&self, key: K, f: impl FnOnce() -> R) -> R {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(key.clone()).or_default())
        };

        let result = {
            let _guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };
        drop(slot);

        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots.get(&key).is_some_and(|s| Arc::strong_count(s) == 1) {
            slots.remove(&key);
        }
        result
    }
}

/// Which digest a marker refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestKind {
    Daily,
    Weekly,
}

/// Result of toggling a subtask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskToggle {
    pub subtask: Subtask,
    /// Set when this toggle finished the last open subtask of an active task
    pub task_completion: Option<CompletionReport>,
}

pub struct Engine<S> {
    store: S,
    policies: Policies,
    task_locks: KeyedLocks<TaskId>,
    user_locks: KeyedLocks<UserId>,
}

impl<S: EngineStore> Engine<S> {
    pub fn new(store: S, policies: Policies) -> Self {
        Self {
            store,
            policies,
            task_locks: KeyedLocks::new(),
            user_locks: KeyedLocks::new(),
        }
    }

    pub fn from_config(store: S, config: &Config) -> Self {
        Self::new(store, config.policies())
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policies(&self) -> &Policies {
        &self.policies
    }

    // users

    /// The first user in the store, created with `profile` and the starter
    /// rewards when the store is empty.
    pub fn ensure_user(&self, profile: &NewUser, now: DateTime<Utc>) -> Result<User> {
        if let Some(user) = self.store.first_user()? {
            return Ok(user);
        }
        let user = self.store.create_user(profile, now)?;
        for reward in NewReward::defaults() {
            self.store.insert_reward(user.id, &reward)?;
        }
        info!(user_id = user.id, name = %user.name, "created local user");
        Ok(user)
    }

    pub fn user(&self, user_id: UserId) -> Result<User> {
        self.store.user(user_id)
    }

    /// Apply profile settings to an existing user. XP, level and digest
    /// markers are left alone.
    pub fn update_profile(&self, user_id: UserId, profile: &NewUser) -> Result<User> {
        self.user_locks.with_lock(user_id, || {
            let mut user = self.store.user(user_id)?;
            let unchanged = user.name == profile.name
                && user.timezone == profile.timezone
                && user.notifications_enabled == profile.notifications_enabled
                && user.digest_hour == profile.digest_hour;
            if unchanged {
                return Ok(user);
            }
            user.name = profile.name.clone();
            user.timezone = profile.timezone;
            user.notifications_enabled = profile.notifications_enabled;
            user.digest_hour = profile.digest_hour;
            self.store.update_user_profile(&user)?;
            debug!(user_id, "user profile updated");
            Ok(user)
        })
    }

    pub fn level_state(&self, user_id: UserId) -> Result<LevelState> {
        let user = self.store.user(user_id)?;
        Ok(self.policies.leveling.resolve(user.xp_total, user.level))
    }

    /// Record that a digest went out, for the scheduler's dedup.
    pub fn record_digest_sent(
        &self,
        user_id: UserId,
        kind: DigestKind,
        at: DateTime<Utc>,
    ) -> Result<User> {
        self.user_locks.with_lock(user_id, || {
            let mut user = self.store.user(user_id)?;
            match kind {
                DigestKind::Daily => user.last_daily_digest = Some(at),
                DigestKind::Weekly => user.last_weekly_digest = Some(at),
            }
            self.store.update_user_profile(&user)?;
            debug!(user_id, ?kind, "digest marker recorded");
            Ok(user)
        })
    }

    // tasks

    /// Validate and persist a new task.
    ///
    /// # Errors
    /// Validation errors for an empty title or zero weight; `NotFound` for an
    /// unknown user or domain.
    pub fn create_task(&self, user_id: UserId, task: &NewTask, now: DateTime<Utc>) -> Result<Task> {
        task.validate()?;
        self.store.user(user_id)?;
        if let Some(domain_id) = task.domain_id {
            self.store.domain(domain_id)?;
        }
        let created = self.store.insert_task(user_id, task, now)?;
        info!(
            task_id = created.id,
            recurrence = %created.recurrence,
            "task created"
        );
        Ok(created)
    }

    pub fn task(&self, task_id: TaskId) -> Result<Task> {
        self.store.task(task_id)
    }

    pub fn tasks(&self, user_id: UserId, include_archived: bool) -> Result<Vec<Task>> {
        self.store.tasks_for_user(user_id, include_archived)
    }

    /// Mark a task done at `reference`.
    ///
    /// A second completion on the same local calendar date is reported as
    /// [`CompletionReport::AlreadyCompleted`] and changes nothing.
    ///
    /// # Errors
    /// `TaskArchived` for archived tasks, `NotFound` for unknown ids, and any
    /// storage failure. Nothing is written on error.
    pub fn complete_task(&self, task_id: TaskId, reference: DateTime<Utc>) -> Result<CompletionReport> {
        let committed = self.task_locks.with_lock(task_id, || {
            let owner = self.store.task(task_id)?.user_id;
            self.user_locks.with_lock(owner, || {
                self.store
                    .write_tx(|tx| self.complete_in(tx, task_id, reference))
            })
        })?;

        let Some((plan, completion_id)) = committed else {
            return Ok(CompletionReport::AlreadyCompleted { task_id });
        };
        let result = plan.result(completion_id);
        info!(
            task_id,
            xp = result.xp,
            streak = result.streak_after,
            xp_total = plan.xp_total_after,
            "task completed"
        );
        if let Some(up) = &result.level_up {
            info!(user_id = plan.user_id, level = up.level, "level up");
        }
        Ok(CompletionReport::Completed(result))
    }

    /// Read, plan and commit inside the store's write transaction. `None`
    /// for a same-day repeat.
    fn complete_in(
        &self,
        tx: &dyn StoreTx,
        task_id: TaskId,
        reference: DateTime<Utc>,
    ) -> Result<Option<(CompletionPlan, CompletionId)>> {
        let task = tx.task(task_id)?;
        let user = tx.user(task.user_id)?;
        let (day_start, day_end) = local_day_bounds(reference, &user.tz());
        let completed_today = tx.completions_between(task.id, day_start, day_end)? > 0;
        let first_completion = tx.completion_count(task.id)? == 0;
        let streak = tx.streak(task.id)?;
        let totals = domain_totals_for(tx, &self.policies.balance, &user, reference)?;
        let weight_bias = weight_bias(tx, task.domain_id)?;

        let outcome = plan_completion(
            &CompletionContext {
                task: &task,
                user: &user,
                streak,
                weight_bias,
                domain_totals: &totals,
                first_completion,
                completed_on_reference_date: completed_today,
                policies: &self.policies,
            },
            reference,
        )?;

        match outcome {
            CompletionOutcome::AlreadyCompleted { .. } => Ok(None),
            CompletionOutcome::Planned(plan) => {
                let completion_id = tx.commit_completion(&plan)?;
                Ok(Some((plan, completion_id)))
            }
        }
    }

    /// Projected XP for completing the task at `reference`, without the
    /// first-completion novelty bonus.
    pub fn preview_xp(&self, task_id: TaskId, reference: DateTime<Utc>) -> Result<XpBreakdown> {
        let task = self.store.task(task_id)?;
        let user = self.store.user(task.user_id)?;
        let streak = self.store.streak(task_id)?;
        let totals = domain_totals_for(&self.store, &self.policies.balance, &user, reference)?;
        let weight_bias = weight_bias(&self.store, task.domain_id)?;

        Ok(scoring::preview_xp(
            &XpInput {
                base_weight: task.base_weight,
                domain_id: task.domain_id,
                weight_bias,
                due_at: task.due_at,
                reference,
                recurrence: task.recurrence.class(),
                energy: task.energy,
                priority: task.priority,
                streak_before: streak.current_streak,
                domain_totals: &totals,
                first_completion: false,
                novelty_bonus: task.novelty_bonus,
            },
            &self.policies.scoring,
            &self.policies.balance,
        ))
    }

    /// Push a task's due date out by `days`.
    pub fn snooze_task(&self, task_id: TaskId, days: i64, now: DateTime<Utc>) -> Result<Task> {
        self.task_locks.with_lock(task_id, || {
            let task = self.store.task(task_id)?;
            if task.status.is_terminal() {
                return Err(CoreError::TaskArchived { task_id });
            }
            let due_at = task.snoozed_due_at(days, now)?;
            self.store
                .update_task_schedule(task_id, Some(due_at), task.status)?;
            info!(task_id, days, due_at = %due_at, "task snoozed");
            self.store.task(task_id)
        })
    }

    /// Drop the current occurrence: clear the due date and end the streak.
    pub fn skip_task(&self, task_id: TaskId) -> Result<Task> {
        self.task_locks.with_lock(task_id, || {
            let task = self.store.task(task_id)?;
            if task.status.is_terminal() {
                return Err(CoreError::TaskArchived { task_id });
            }
            let streak = self.store.streak(task_id)?.skipped();
            self.store.commit_skip(task_id, &streak)?;
            info!(task_id, longest = streak.longest_streak, "task skipped");
            self.store.task(task_id)
        })
    }

    /// Park a task as waiting, resume it, or archive it by hand.
    ///
    /// Waiting tasks stay out of digests, streak overviews and balance
    /// totals until resumed. Setting the current status is a no-op.
    ///
    /// # Errors
    /// `TaskArchived` for archived tasks; archival is final.
    pub fn set_status(&self, task_id: TaskId, status: TaskStatus) -> Result<Task> {
        self.task_locks.with_lock(task_id, || {
            let task = self.store.task(task_id)?;
            if task.status.is_terminal() {
                return Err(CoreError::TaskArchived { task_id });
            }
            if task.status == status {
                return Ok(task);
            }
            self.store.update_task_status(task_id, status)?;
            info!(task_id, from = %task.status, to = %status, "task status changed");
            self.store.task(task_id)
        })
    }

    // subtasks

    pub fn add_subtask(&self, task_id: TaskId, title: &str) -> Result<Subtask> {
        subtask::validate_title(title)?;
        self.task_locks.with_lock(task_id, || {
            let task = self.store.task(task_id)?;
            if task.status.is_terminal() {
                return Err(CoreError::TaskArchived { task_id });
            }
            let order_idx = subtask::next_order_idx(&task.subtasks);
            let created = self.store.insert_subtask(task_id, title, order_idx)?;
            debug!(task_id, subtask_id = created.id, order_idx, "subtask added");
            Ok(created)
        })
    }

    /// Flip a subtask. Finishing the last open subtask of an active task
    /// completes the task at `now`.
    pub fn toggle_subtask(&self, subtask_id: SubtaskId, now: DateTime<Utc>) -> Result<SubtaskToggle> {
        let task_id = self.store.subtask(subtask_id)?.task_id;

        let (toggled, finished) = self.task_locks.with_lock(task_id, || -> Result<_> {
            let current = self.store.subtask(subtask_id)?;
            let toggled = current.toggled(now);
            self.store.update_subtask(&toggled)?;
            let task = self.store.task(task_id)?;
            let finished = toggled.done && task.is_active() && subtask::all_done(&task.subtasks);
            Ok((toggled, finished))
        })?;

        // The task lock is not reentrant, so completion runs after release.
        let task_completion = if finished {
            debug!(task_id, "all subtasks done, completing task");
            Some(self.complete_task(task_id, now)?)
        } else {
            None
        };

        Ok(SubtaskToggle {
            subtask: toggled,
            task_completion,
        })
    }

    // rewards

    pub fn create_reward(&self, user_id: UserId, reward: &NewReward) -> Result<Reward> {
        reward.validate()?;
        self.store.user(user_id)?;
        let created = self.store.insert_reward(user_id, reward)?;
        debug!(reward_id = created.id, "reward created");
        Ok(created)
    }

    /// Rewards ordered by level requirement, then cost.
    pub fn rewards(&self, user_id: UserId) -> Result<Vec<Reward>> {
        let mut rewards = self.store.rewards_for_user(user_id)?;
        reward::sort_rewards(&mut rewards);
        Ok(rewards)
    }

    /// Claim a reward. Claiming never spends XP.
    ///
    /// # Errors
    /// `RequirementsNotMet` when the user lacks XP or level.
    pub fn claim_reward(&self, reward_id: RewardId, now: DateTime<Utc>) -> Result<ClaimOutcome> {
        let owner = self.store.reward(reward_id)?.user_id;
        self.user_locks.with_lock(owner, || {
            let reward = self.store.reward(reward_id)?;
            let user = self.store.user(owner)?;
            let outcome = reward::claim_reward(&reward, &user, now)?;
            match outcome {
                ClaimOutcome::Claimed(at) => {
                    self.store.mark_reward_claimed(reward_id, at)?;
                    info!(reward_id, title = %reward.title, "reward claimed");
                }
                ClaimOutcome::AlreadyClaimed(_) => {
                    debug!(reward_id, "reward already claimed");
                }
            }
            Ok(outcome)
        })
    }

    // balance, digests and statistics

    /// Recent XP per domain as used for neglect detection.
    ///
    /// Every domain the user has an active task in is present, at zero when
    /// it has no completions in the window.
    pub fn domain_totals(&self, user_id: UserId, reference: DateTime<Utc>) -> Result<DomainTotals> {
        let user = self.store.user(user_id)?;
        domain_totals_for(&self.store, &self.policies.balance, &user, reference)
    }

    pub fn neglected_domains(
        &self,
        user_id: UserId,
        reference: DateTime<Utc>,
    ) -> Result<BTreeSet<DomainId>> {
        let totals = self.domain_totals(user_id, reference)?;
        Ok(balance::neglected_domains(&totals, &self.policies.balance))
    }

    pub fn daily_digest(&self, user_id: UserId, reference: DateTime<Utc>) -> Result<DailyDigest> {
        let user = self.store.user(user_id)?;
        let tasks = self.store.tasks_for_user(user_id, false)?;
        let domains = self.store.domains()?;
        let totals = domain_totals_for(&self.store, &self.policies.balance, &user, reference)?;
        let neglected = balance::neglected_domains(&totals, &self.policies.balance);
        let level = self.policies.leveling.resolve(user.xp_total, user.level);

        Ok(DailyDigest::build(
            &user.local(reference),
            &tasks,
            &domains,
            &neglected,
            level,
            self.policies.balance.picks,
        ))
    }

    pub fn weekly_review(&self, user_id: UserId, reference: DateTime<Utc>) -> Result<WeeklyReview> {
        let snapshot = self.stats_snapshot(user_id, WEEK_DAYS, reference)?;
        Ok(WeeklyReview::from_snapshot(snapshot, reference))
    }

    pub fn stats_snapshot(
        &self,
        user_id: UserId,
        days: u32,
        reference: DateTime<Utc>,
    ) -> Result<StatsSnapshot> {
        self.store.user(user_id)?;
        let since = reference - Duration::days(i64::from(days));
        let completions = self.store.completions_since(user_id, since)?;
        let tasks = self.store.tasks_for_user(user_id, true)?;
        let domains = self.store.domains()?;
        Ok(StatsSnapshot::build(
            days,
            since,
            reference,
            &completions,
            &tasks,
            &domains,
        ))
    }

    pub fn streak_overview(&self, user_id: UserId, reference: DateTime<Utc>) -> Result<StreakOverview> {
        let tasks = self.store.tasks_for_user(user_id, false)?;
        let streaks = self.store.streaks_for_user(user_id)?;
        Ok(StreakOverview::build(&tasks, &streaks, reference))
    }
}

/// Recent XP per domain, with a zero entry for every domain that has an
/// active task.
fn domain_totals_for<R: StoreReads + ?Sized>(
    reads: &R,
    policy: &BalancePolicy,
    user: &User,
    reference: DateTime<Utc>,
) -> Result<DomainTotals> {
    let since = reference - Duration::days(i64::from(policy.lookback_days));
    let mut totals = reads.domain_xp_since(user.id, since)?;
    for task in reads.tasks_for_user(user.id, false)? {
        if let Some(domain_id) = task.domain_id.filter(|_| task.is_active()) {
            totals.add(domain_id, 0.0);
        }
    }
    Ok(totals)
}

fn weight_bias<R: StoreReads + ?Sized>(reads: &R, domain_id: Option<DomainId>) -> Result<f64> {
    let Some(id) = domain_id else {
        return Ok(NEUTRAL_BIAS);
    };
    match reads.domain(id) {
        Ok(domain) => Ok(domain.effective_bias()),
        Err(CoreError::NotFound { .. }) => {
            warn!(domain_id = id, "task references a missing domain, using neutral bias");
            Ok(NEUTRAL_BIAS)
        }
        Err(e) => Err(e),
    }
}
