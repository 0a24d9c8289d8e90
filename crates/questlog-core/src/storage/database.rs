//! SQLite-backed [`EngineStore`].
//!
//! Provides persistent storage for:
//! - Users, with XP and cached level
//! - Tasks, subtasks and per-task streaks
//! - The append-only completion log
//! - Rewards and the shared domain catalog
//!
//! A single connection sits behind a mutex; every multi-row write runs in a
//! transaction.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use chrono_tz::Tz;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::debug;

use crate::balance::DomainTotals;
use crate::completion::{Completion, CompletionId, CompletionPlan};
use crate::domain::{Domain, DomainId};
use crate::error::{CoreError, DatabaseError, Result, ValidationError};
use crate::reward::{NewReward, Reward, RewardId};
use crate::streak::StreakState;
use crate::task::{NewTask, Subtask, SubtaskId, Task, TaskId, TaskStatus};
use crate::user::{NewUser, User, UserId};

use super::migrations;
use super::store::{EngineStore, StoreReads, StoreTx};
use super::data_dir;

const USER_COLUMNS: &str = "id, name, xp_total, level, timezone, notifications_enabled, \
     digest_hour, last_daily_digest, last_weekly_digest";

const TASK_COLUMNS: &str = "id, user_id, title, description, domain_id, time_horizon, energy, \
     priority, base_weight, recurrence, due_at, status, novelty_bonus, created_at";

const SUBTASK_COLUMNS: &str = "id, task_id, title, order_idx, done, done_at";

/// How long a connection waits on another writer before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const REWARD_COLUMNS: &str = "id, user_id, title, xp_cost, level_req, claimed_at";

/// SQLite database for questlog state.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open the database at `<data_dir>/questlog.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self> {
        let path = data_dir()?.join("questlog.db");
        Self::open_at(path)
    }

    /// Open (or create) a database file at `path`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::init(conn)
    }

    /// Open an in-memory database.
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| DatabaseError::OpenFailed {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        // Other processes may hold the write lock for the length of a completion.
        conn.busy_timeout(BUSY_TIMEOUT)?;
        migrations::migrate(&conn).map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// A poisoned lock only means another thread panicked mid-call; SQLite
    /// rolled back any open transaction, so the connection is still usable.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// Encoding helpers

pub(crate) fn encode_ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn get_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn get_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| {
        DateTime::parse_from_rfc3339(&r)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_error(idx, e))
    })
    .transpose()
}

fn get_parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

fn get_timezone(row: &Row<'_>, idx: usize) -> rusqlite::Result<Tz> {
    let raw: String = row.get(idx)?;
    raw.parse::<Tz>().map_err(|_| {
        conversion_error(
            idx,
            ValidationError::InvalidValue {
                field: "timezone".into(),
                value: raw.clone(),
            },
        )
    })
}

fn count_to_u64(n: i64) -> u64 {
    u64::try_from(n).unwrap_or(0)
}

// Row mappers

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        xp_total: row.get(2)?,
        level: row.get(3)?,
        timezone: get_timezone(row, 4)?,
        notifications_enabled: row.get(5)?,
        digest_hour: row.get(6)?,
        last_daily_digest: get_opt_ts(row, 7)?,
        last_weekly_digest: get_opt_ts(row, 8)?,
    })
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        domain_id: row.get(4)?,
        time_horizon: get_parsed(row, 5)?,
        energy: get_parsed(row, 6)?,
        priority: get_parsed(row, 7)?,
        base_weight: row.get(8)?,
        recurrence: get_parsed(row, 9)?,
        due_at: get_opt_ts(row, 10)?,
        status: get_parsed(row, 11)?,
        novelty_bonus: row.get(12)?,
        subtasks: Vec::new(),
        created_at: get_ts(row, 13)?,
    })
}

fn subtask_from_row(row: &Row<'_>) -> rusqlite::Result<Subtask> {
    Ok(Subtask {
        id: row.get(0)?,
        task_id: row.get(1)?,
        title: row.get(2)?,
        order_idx: row.get(3)?,
        done: row.get(4)?,
        done_at: get_opt_ts(row, 5)?,
    })
}

fn reward_from_row(row: &Row<'_>) -> rusqlite::Result<Reward> {
    Ok(Reward {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        xp_cost: row.get(3)?,
        level_req: row.get(4)?,
        claimed_at: get_opt_ts(row, 5)?,
    })
}

fn streak_from_row(row: &Row<'_>) -> rusqlite::Result<StreakState> {
    Ok(StreakState {
        current_streak: row.get(0)?,
        longest_streak: row.get(1)?,
        last_completed_at: get_opt_ts(row, 2)?,
    })
}

// Connection-level queries, shared by trait methods that already hold the lock

fn query_user(conn: &Connection, id: UserId) -> Result<User> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
        params![id],
        user_from_row,
    )
    .optional()?
    .ok_or_else(|| CoreError::not_found("user", id))
}

fn query_subtasks(conn: &Connection, task_id: TaskId) -> Result<Vec<Subtask>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SUBTASK_COLUMNS} FROM subtasks WHERE task_id = ?1 ORDER BY order_idx"
    ))?;
    let rows = stmt.query_map(params![task_id], subtask_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn query_task(conn: &Connection, id: TaskId) -> Result<Task> {
    let mut task = conn
        .query_row(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
            params![id],
            task_from_row,
        )
        .optional()?
        .ok_or_else(|| CoreError::not_found("task", id))?;
    task.subtasks = query_subtasks(conn, id)?;
    Ok(task)
}

fn query_reward(conn: &Connection, id: RewardId) -> Result<Reward> {
    conn.query_row(
        &format!("SELECT {REWARD_COLUMNS} FROM rewards WHERE id = ?1"),
        params![id],
        reward_from_row,
    )
    .optional()?
    .ok_or_else(|| CoreError::not_found("reward", id))
}

fn upsert_streak(conn: &Connection, task_id: TaskId, streak: &StreakState) -> Result<()> {
    conn.execute(
        "INSERT INTO streaks (task_id, current_streak, longest_streak, last_completed_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(task_id) DO UPDATE SET
             current_streak = excluded.current_streak,
             longest_streak = excluded.longest_streak,
             last_completed_at = excluded.last_completed_at",
        params![
            task_id,
            streak.current_streak,
            streak.longest_streak,
            streak.last_completed_at.as_ref().map(encode_ts),
        ],
    )?;
    Ok(())
}

fn query_domain(conn: &Connection, id: DomainId) -> Result<Domain> {
    conn.query_row(
        "SELECT id, name, weight_bias FROM domains WHERE id = ?1",
        params![id],
        |row| {
            Ok(Domain {
                id: row.get(0)?,
                name: row.get(1)?,
                weight_bias: row.get(2)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| CoreError::not_found("domain", id))
}

fn query_tasks_for_user(
    conn: &Connection,
    user_id: UserId,
    include_archived: bool,
) -> Result<Vec<Task>> {
    let filter = if include_archived {
        ""
    } else {
        "AND status != 'archived'"
    };
    let mut stmt = conn.prepare(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks WHERE user_id = ?1 {filter}
         ORDER BY due_at IS NULL, due_at, id"
    ))?;
    let mut tasks = stmt
        .query_map(params![user_id], task_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for task in &mut tasks {
        task.subtasks = query_subtasks(conn, task.id)?;
    }
    Ok(tasks)
}

fn query_streak(conn: &Connection, task_id: TaskId) -> Result<StreakState> {
    let streak = conn
        .query_row(
            "SELECT current_streak, longest_streak, last_completed_at
             FROM streaks WHERE task_id = ?1",
            params![task_id],
            streak_from_row,
        )
        .optional()?;
    Ok(streak.unwrap_or_default())
}

fn query_completion_count(conn: &Connection, task_id: TaskId) -> Result<u64> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM completions WHERE task_id = ?1",
        params![task_id],
        |row| row.get(0),
    )?;
    Ok(count_to_u64(n))
}

fn query_completions_between(
    conn: &Connection,
    task_id: TaskId,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<u64> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM completions
         WHERE task_id = ?1 AND completed_at >= ?2 AND completed_at < ?3",
        params![task_id, encode_ts(&start), encode_ts(&end)],
        |row| row.get(0),
    )?;
    Ok(count_to_u64(n))
}

fn query_domain_xp_since(
    conn: &Connection,
    user_id: UserId,
    since: DateTime<Utc>,
) -> Result<DomainTotals> {
    let mut stmt = conn.prepare(
        "SELECT t.domain_id, COALESCE(SUM(c.xp_earned), 0)
         FROM completions c JOIN tasks t ON t.id = c.task_id
         WHERE t.user_id = ?1 AND t.domain_id IS NOT NULL AND c.completed_at >= ?2
         GROUP BY t.domain_id",
    )?;
    let rows = stmt.query_map(params![user_id, encode_ts(&since)], |row| {
        Ok((row.get::<_, DomainId>(0)?, row.get::<_, f64>(1)?))
    })?;
    let mut totals = DomainTotals::new();
    for row in rows {
        let (domain, xp) = row?;
        totals.add(domain, xp);
    }
    Ok(totals)
}

/// Completion writes. The caller owns the surrounding transaction.
fn apply_completion(conn: &Connection, plan: &CompletionPlan) -> Result<CompletionId> {
    conn.execute(
        "INSERT INTO completions (task_id, completed_at, xp_earned, streak_after)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            plan.task_id,
            encode_ts(&plan.completed_at),
            plan.xp.total,
            plan.streak_after(),
        ],
    )?;
    let completion_id = conn.last_insert_rowid();

    upsert_streak(conn, plan.task_id, &plan.streak.state)?;

    let updated = conn.execute(
        "UPDATE users SET xp_total = xp_total + ?2, level = MAX(level, ?3) WHERE id = ?1",
        params![plan.user_id, plan.xp.total, plan.level_after.level],
    )?;
    if updated == 0 {
        return Err(CoreError::not_found("user", plan.user_id));
    }

    // Archiving keeps the last due date for history.
    let updated = conn.execute(
        "UPDATE tasks SET status = ?2, due_at = COALESCE(?3, due_at) WHERE id = ?1",
        params![
            plan.task_id,
            plan.rollover.status().as_str(),
            plan.rollover.due_at().as_ref().map(encode_ts),
        ],
    )?;
    if updated == 0 {
        return Err(CoreError::not_found("task", plan.task_id));
    }
    Ok(completion_id)
}

/// Read view over an open transaction.
struct SqliteTx<'c> {
    conn: &'c Connection,
}

impl StoreReads for SqliteTx<'_> {
    fn user(&self, id: UserId) -> Result<User> {
        query_user(self.conn, id)
    }

    fn domain(&self, id: DomainId) -> Result<Domain> {
        query_domain(self.conn, id)
    }

    fn task(&self, id: TaskId) -> Result<Task> {
        query_task(self.conn, id)
    }

    fn tasks_for_user(&self, user_id: UserId, include_archived: bool) -> Result<Vec<Task>> {
        query_tasks_for_user(self.conn, user_id, include_archived)
    }

    fn streak(&self, task_id: TaskId) -> Result<StreakState> {
        query_streak(self.conn, task_id)
    }

    fn completion_count(&self, task_id: TaskId) -> Result<u64> {
        query_completion_count(self.conn, task_id)
    }

    fn completions_between(
        &self,
        task_id: TaskId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64> {
        query_completions_between(self.conn, task_id, start, end)
    }

    fn domain_xp_since(&self, user_id: UserId, since: DateTime<Utc>) -> Result<DomainTotals> {
        query_domain_xp_since(self.conn, user_id, since)
    }
}

impl StoreTx for SqliteTx<'_> {
    fn commit_completion(&self, plan: &CompletionPlan) -> Result<CompletionId> {
        apply_completion(self.conn, plan)
    }
}

impl StoreReads for Database {
    fn user(&self, id: UserId) -> Result<User> {
        query_user(&self.conn(), id)
    }

    fn domain(&self, id: DomainId) -> Result<Domain> {
        query_domain(&self.conn(), id)
    }

    fn task(&self, id: TaskId) -> Result<Task> {
        query_task(&self.conn(), id)
    }

    fn tasks_for_user(&self, user_id: UserId, include_archived: bool) -> Result<Vec<Task>> {
        query_tasks_for_user(&self.conn(), user_id, include_archived)
    }

    fn streak(&self, task_id: TaskId) -> Result<StreakState> {
        query_streak(&self.conn(), task_id)
    }

    fn completion_count(&self, task_id: TaskId) -> Result<u64> {
        query_completion_count(&self.conn(), task_id)
    }

    fn completions_between(
        &self,
        task_id: TaskId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64> {
        query_completions_between(&self.conn(), task_id, start, end)
    }

    fn domain_xp_since(&self, user_id: UserId, since: DateTime<Utc>) -> Result<DomainTotals> {
        query_domain_xp_since(&self.conn(), user_id, since)
    }
}

impl EngineStore for Database {
    fn write_tx<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn StoreTx) -> Result<T>,
    {
        let mut conn = self.conn();
        // IMMEDIATE takes the file's write lock up front, so the reads inside
        // `f` cannot go stale before the commit.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&SqliteTx { conn: &tx })?;
        tx.commit()?;
        Ok(value)
    }

    fn create_user(&self, user: &NewUser, now: DateTime<Utc>) -> Result<User> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO users (name, timezone, notifications_enabled, digest_hour, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user.name,
                user.timezone.name(),
                user.notifications_enabled,
                user.digest_hour,
                encode_ts(&now),
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(user_id = id, "user created");
        query_user(&conn, id)
    }

    fn first_user(&self) -> Result<Option<User>> {
        let conn = self.conn();
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users ORDER BY id LIMIT 1"),
                [],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    fn update_user_profile(&self, user: &User) -> Result<()> {
        let updated = self.conn().execute(
            "UPDATE users SET name = ?2, timezone = ?3, notifications_enabled = ?4,
                 digest_hour = ?5, last_daily_digest = ?6, last_weekly_digest = ?7
             WHERE id = ?1",
            params![
                user.id,
                user.name,
                user.timezone.name(),
                user.notifications_enabled,
                user.digest_hour,
                user.last_daily_digest.as_ref().map(encode_ts),
                user.last_weekly_digest.as_ref().map(encode_ts),
            ],
        )?;
        if updated == 0 {
            return Err(CoreError::not_found("user", user.id));
        }
        Ok(())
    }

    fn domains(&self) -> Result<Vec<Domain>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, name, weight_bias FROM domains ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(Domain {
                id: row.get(0)?,
                name: row.get(1)?,
                weight_bias: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn domain_by_name(&self, name: &str) -> Result<Option<Domain>> {
        let domain = self
            .conn()
            .query_row(
                "SELECT id, name, weight_bias FROM domains WHERE lower(name) = lower(?1)",
                params![name.trim()],
                |row| {
                    Ok(Domain {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        weight_bias: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(domain)
    }

    fn insert_task(&self, user_id: UserId, task: &NewTask, now: DateTime<Utc>) -> Result<Task> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO tasks (user_id, title, description, domain_id, time_horizon, energy,
                 priority, base_weight, recurrence, due_at, status, novelty_bonus, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                user_id,
                task.title.trim(),
                task.description,
                task.domain_id,
                task.time_horizon.as_str(),
                task.energy.as_str(),
                task.priority.as_str(),
                task.base_weight,
                task.recurrence.to_string(),
                task.due_at.as_ref().map(encode_ts),
                TaskStatus::Active.as_str(),
                task.novelty_bonus,
                encode_ts(&now),
            ],
        )?;
        let id = conn.last_insert_rowid();
        query_task(&conn, id)
    }

    fn update_task_schedule(
        &self,
        id: TaskId,
        due_at: Option<DateTime<Utc>>,
        status: TaskStatus,
    ) -> Result<()> {
        let updated = self.conn().execute(
            "UPDATE tasks SET due_at = ?2, status = ?3 WHERE id = ?1",
            params![id, due_at.as_ref().map(encode_ts), status.as_str()],
        )?;
        if updated == 0 {
            return Err(CoreError::not_found("task", id));
        }
        Ok(())
    }

    fn update_task_status(&self, id: TaskId, status: TaskStatus) -> Result<()> {
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE tasks SET status = ?2 WHERE id = ?1 AND status != ?3",
            params![id, status.as_str(), TaskStatus::Archived.as_str()],
        )?;
        if updated == 0 {
            // Distinguish a missing task from an archived one.
            query_task(&conn, id)?;
            return Err(CoreError::TaskArchived { task_id: id });
        }
        Ok(())
    }

    fn insert_subtask(&self, task_id: TaskId, title: &str, order_idx: u32) -> Result<Subtask> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO subtasks (task_id, title, order_idx) VALUES (?1, ?2, ?3)",
            params![task_id, title.trim(), order_idx],
        )?;
        Ok(Subtask {
            id: conn.last_insert_rowid(),
            task_id,
            title: title.trim().to_string(),
            order_idx,
            done: false,
            done_at: None,
        })
    }

    fn subtask(&self, id: SubtaskId) -> Result<Subtask> {
        self.conn()
            .query_row(
                &format!("SELECT {SUBTASK_COLUMNS} FROM subtasks WHERE id = ?1"),
                params![id],
                subtask_from_row,
            )
            .optional()?
            .ok_or_else(|| CoreError::not_found("subtask", id))
    }

    fn update_subtask(&self, subtask: &Subtask) -> Result<()> {
        let updated = self.conn().execute(
            "UPDATE subtasks SET title = ?2, done = ?3, done_at = ?4 WHERE id = ?1",
            params![
                subtask.id,
                subtask.title,
                subtask.done,
                subtask.done_at.as_ref().map(encode_ts),
            ],
        )?;
        if updated == 0 {
            return Err(CoreError::not_found("subtask", subtask.id));
        }
        Ok(())
    }

    fn streaks_for_user(&self, user_id: UserId) -> Result<Vec<(TaskId, StreakState)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT s.current_streak, s.longest_streak, s.last_completed_at, s.task_id
             FROM streaks s JOIN tasks t ON t.id = s.task_id
             WHERE t.user_id = ?1
             ORDER BY s.task_id",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok((row.get::<_, TaskId>(3)?, streak_from_row(row)?))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn commit_skip(&self, task_id: TaskId, streak: &StreakState) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let updated = tx.execute("UPDATE tasks SET due_at = NULL WHERE id = ?1", params![task_id])?;
        if updated == 0 {
            return Err(CoreError::not_found("task", task_id));
        }
        upsert_streak(&tx, task_id, streak)?;
        tx.commit()?;
        Ok(())
    }

    fn completions_since(&self, user_id: UserId, since: DateTime<Utc>) -> Result<Vec<Completion>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT c.id, c.task_id, c.completed_at, c.xp_earned, c.streak_after
             FROM completions c JOIN tasks t ON t.id = c.task_id
             WHERE t.user_id = ?1 AND c.completed_at >= ?2
             ORDER BY c.completed_at, c.id",
        )?;
        let rows = stmt.query_map(params![user_id, encode_ts(&since)], |row| {
            Ok(Completion {
                id: row.get(0)?,
                task_id: row.get(1)?,
                completed_at: get_ts(row, 2)?,
                xp_earned: row.get(3)?,
                streak_after: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn insert_reward(&self, user_id: UserId, reward: &NewReward) -> Result<Reward> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO rewards (user_id, title, xp_cost, level_req) VALUES (?1, ?2, ?3, ?4)",
            params![user_id, reward.title.trim(), reward.xp_cost, reward.level_req],
        )?;
        let id = conn.last_insert_rowid();
        query_reward(&conn, id)
    }

    fn reward(&self, id: RewardId) -> Result<Reward> {
        query_reward(&self.conn(), id)
    }

    fn rewards_for_user(&self, user_id: UserId) -> Result<Vec<Reward>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {REWARD_COLUMNS} FROM rewards WHERE user_id = ?1
             ORDER BY level_req, xp_cost, id"
        ))?;
        let rows = stmt.query_map(params![user_id], reward_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn mark_reward_claimed(&self, id: RewardId, at: DateTime<Utc>) -> Result<()> {
        let updated = self.conn().execute(
            "UPDATE rewards SET claimed_at = ?2 WHERE id = ?1 AND claimed_at IS NULL",
            params![id, encode_ts(&at)],
        )?;
        if updated == 0 {
            debug!(reward_id = id, "reward already claimed or missing");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 2, 9, 30, 0).unwrap()
    }

    fn seeded() -> (Database, User) {
        let db = Database::open_in_memory().unwrap();
        let user = db.create_user(&NewUser::default(), now()).unwrap();
        (db, user)
    }

    #[test]
    fn user_defaults_to_level_one() {
        let (db, user) = seeded();
        assert_eq!(user.level, 1);
        assert_eq!(user.xp_total, 0.0);
        assert_eq!(db.first_user().unwrap().map(|u| u.id), Some(user.id));
        assert!(matches!(db.user(99), Err(CoreError::NotFound { entity: "user", id: 99 })));
    }

    #[test]
    fn task_round_trips_with_subtasks_in_order() {
        let (db, user) = seeded();
        let new = NewTask::new("Write report").with_recurrence("custom:TU,FR").unwrap();
        let task = db.insert_task(user.id, &new, now()).unwrap();
        db.insert_subtask(task.id, "outline", 1).unwrap();
        db.insert_subtask(task.id, "draft", 0).unwrap();

        let loaded = db.task(task.id).unwrap();
        assert_eq!(loaded.recurrence.to_string(), "custom:TU,FR");
        assert_eq!(loaded.status, TaskStatus::Active);
        assert_eq!(loaded.created_at, now());
        let titles: Vec<_> = loaded.subtasks.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["draft", "outline"]);
    }

    #[test]
    fn duplicate_order_idx_is_rejected() {
        let (db, user) = seeded();
        let task = db.insert_task(user.id, &NewTask::new("t"), now()).unwrap();
        db.insert_subtask(task.id, "a", 0).unwrap();
        assert!(db.insert_subtask(task.id, "b", 0).is_err());
    }

    #[test]
    fn missing_streak_reads_as_zero_state() {
        let (db, user) = seeded();
        let task = db.insert_task(user.id, &NewTask::new("t"), now()).unwrap();
        assert_eq!(db.streak(task.id).unwrap(), StreakState::default());
    }

    #[test]
    fn corrupt_enum_surfaces_as_corrupt_value() {
        let (db, user) = seeded();
        let task = db.insert_task(user.id, &NewTask::new("t"), now()).unwrap();
        db.conn()
            .execute("UPDATE tasks SET energy = 'extreme' WHERE id = ?1", params![task.id])
            .unwrap();
        let err = db.task(task.id).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Database(DatabaseError::CorruptValue { .. })
        ));
    }

    #[test]
    fn seeded_domains_are_available() {
        let db = Database::open_in_memory().unwrap();
        let names: Vec<_> = db.domains().unwrap().into_iter().map(|d| d.name).collect();
        assert!(names.contains(&"health".to_string()));
        assert_eq!(db.domain_by_name("Coding").unwrap().map(|d| d.name), Some("coding".into()));
    }

    fn planned(task: &Task, user: &User) -> CompletionPlan {
        use crate::completion::{plan_completion, CompletionContext, CompletionOutcome, Policies};

        let totals = DomainTotals::new();
        let policies = Policies::default();
        let context = CompletionContext {
            task,
            user,
            streak: StreakState::default(),
            weight_bias: 1.0,
            domain_totals: &totals,
            first_completion: true,
            completed_on_reference_date: false,
            policies: &policies,
        };
        match plan_completion(&context, now()).unwrap() {
            CompletionOutcome::Planned(plan) => plan,
            other => panic!("expected a plan, got {other:?}"),
        }
    }

    #[test]
    fn commit_adds_to_stored_xp_total() {
        let (db, user) = seeded();
        let task = db.insert_task(user.id, &NewTask::new("t"), now()).unwrap();
        let plan = planned(&task, &user);
        // Someone else earned XP after the plan was made.
        db.conn()
            .execute("UPDATE users SET xp_total = 50 WHERE id = ?1", params![user.id])
            .unwrap();

        db.write_tx(|tx| tx.commit_completion(&plan)).unwrap();

        let stored = db.user(user.id).unwrap();
        assert!((stored.xp_total - (50.0 + plan.xp.total)).abs() < 1e-9);
        assert_eq!(db.task(task.id).unwrap().status, TaskStatus::Archived);
    }

    #[test]
    fn failed_write_tx_rolls_back() {
        let (db, user) = seeded();
        let task = db.insert_task(user.id, &NewTask::new("t"), now()).unwrap();
        let plan = planned(&task, &user);

        let result: Result<()> = db.write_tx(|tx| {
            tx.commit_completion(&plan)?;
            Err(CoreError::not_found("reward", 1))
        });

        assert!(result.is_err());
        assert_eq!(db.completion_count(task.id).unwrap(), 0);
        assert_eq!(db.user(user.id).unwrap().xp_total, 0.0);
        assert_eq!(db.task(task.id).unwrap().status, TaskStatus::Active);
    }

    #[test]
    fn status_update_refuses_archived_tasks() {
        let (db, user) = seeded();
        let task = db.insert_task(user.id, &NewTask::new("t"), now()).unwrap();
        db.update_task_status(task.id, TaskStatus::Waiting).unwrap();
        db.update_task_status(task.id, TaskStatus::Archived).unwrap();

        let err = db.update_task_status(task.id, TaskStatus::Active).unwrap_err();
        assert!(matches!(err, CoreError::TaskArchived { .. }));
        let err = db.update_task_status(999, TaskStatus::Active).unwrap_err();
        assert!(matches!(err, CoreError::NotFound { entity: "task", .. }));
    }

    #[test]
    fn user_zone_round_trips() {
        let db = Database::open_in_memory().unwrap();
        let profile = NewUser {
            timezone: chrono_tz::Europe::Zurich,
            ..NewUser::default()
        };
        let user = db.create_user(&profile, now()).unwrap();
        assert_eq!(db.user(user.id).unwrap().timezone, chrono_tz::Europe::Zurich);
    }

    #[test]
    fn open_at_persists_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("questlog.db");
        {
            let db = Database::open_at(&path).unwrap();
            db.create_user(&NewUser::default(), now()).unwrap();
        }
        let reopened = Database::open_at(&path).unwrap();
        assert!(reopened.first_user().unwrap().is_some());
    }
}
