//! Database schema migrations for questlog.
//!
//! Migrations are versioned and applied automatically when opening the database.
//! The `schema_version` table tracks the current migration version.

use rusqlite::{params, Connection, Result as SqliteResult};
use tracing::{debug, warn};

use crate::domain::{DEFAULT_DOMAINS, NEUTRAL_BIAS};

/// Current schema version.
///
/// Increment this when adding new migrations.
pub const SCHEMA_VERSION: i32 = 3;

/// Apply all pending migrations to bring the database to the current schema version.
///
/// # Errors
/// Returns an error if migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn);

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }
    if current_version < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Current schema version, 0 for a fresh database.
pub fn get_schema_version(conn: &Connection) -> i32 {
    conn.query_row("SELECT version FROM schema_version", [], |row| {
        row.get::<_, i32>(0)
    })
    .unwrap_or_else(|e| {
        if !matches!(e, rusqlite::Error::QueryReturnedNoRows) {
            warn!(error = %e, "failed to read schema_version");
        }
        0
    })
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Migration v1: base schema.
///
/// Streaks and subtasks are owned by their task and cascade with it.
/// Timestamps are RFC 3339 UTC text with fixed-width microseconds, so string
/// comparison orders them chronologically.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id                    INTEGER PRIMARY KEY AUTOINCREMENT,
            name                  TEXT NOT NULL,
            xp_total              REAL NOT NULL DEFAULT 0,
            level                 INTEGER NOT NULL DEFAULT 1,
            utc_offset_minutes    INTEGER NOT NULL DEFAULT 0,
            notifications_enabled INTEGER NOT NULL DEFAULT 1,
            digest_hour           INTEGER NOT NULL DEFAULT 8,
            last_daily_digest     TEXT,
            last_weekly_digest    TEXT,
            created_at            TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS domains (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT NOT NULL UNIQUE,
            weight_bias REAL NOT NULL DEFAULT 1.0
        );

        CREATE TABLE IF NOT EXISTS tasks (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id       INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            title         TEXT NOT NULL,
            description   TEXT,
            domain_id     INTEGER REFERENCES domains(id) ON DELETE SET NULL,
            time_horizon  TEXT NOT NULL DEFAULT 'short',
            energy        TEXT NOT NULL DEFAULT 'medium',
            priority      TEXT NOT NULL DEFAULT 'should',
            base_weight   INTEGER NOT NULL DEFAULT 1 CHECK (base_weight > 0),
            recurrence    TEXT NOT NULL DEFAULT 'none',
            due_at        TEXT,
            status        TEXT NOT NULL DEFAULT 'active',
            novelty_bonus INTEGER NOT NULL DEFAULT 0,
            created_at    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS subtasks (
            id        INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id   INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
            title     TEXT NOT NULL,
            order_idx INTEGER NOT NULL,
            done      INTEGER NOT NULL DEFAULT 0,
            done_at   TEXT,
            UNIQUE (task_id, order_idx)
        );

        CREATE TABLE IF NOT EXISTS streaks (
            task_id           INTEGER PRIMARY KEY REFERENCES tasks(id) ON DELETE CASCADE,
            current_streak    INTEGER NOT NULL DEFAULT 0,
            longest_streak    INTEGER NOT NULL DEFAULT 0,
            last_completed_at TEXT
        );

        CREATE TABLE IF NOT EXISTS completions (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id      INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
            completed_at TEXT NOT NULL,
            xp_earned    REAL NOT NULL,
            streak_after INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS rewards (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id    INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            title      TEXT NOT NULL,
            xp_cost    REAL NOT NULL,
            level_req  INTEGER NOT NULL DEFAULT 1,
            claimed_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_tasks_user_status ON tasks(user_id, status);
        CREATE INDEX IF NOT EXISTS idx_completions_task_at ON completions(task_id, completed_at);
        CREATE INDEX IF NOT EXISTS idx_completions_at ON completions(completed_at);",
    )?;

    set_schema_version(&tx, 1)?;
    tx.commit()?;
    debug!("applied schema v1");
    Ok(())
}

/// Migration v2: seed the shared domain catalog.
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    for name in DEFAULT_DOMAINS {
        tx.execute(
            "INSERT OR IGNORE INTO domains (name, weight_bias) VALUES (?1, ?2)",
            params![name, NEUTRAL_BIAS],
        )?;
    }

    set_schema_version(&tx, 2)?;
    tx.commit()?;
    debug!("applied schema v2");
    Ok(())
}

/// Migration v3: users carry an IANA zone instead of a fixed offset.
///
/// Whole-hour offsets map onto the matching `Etc/GMT` zone (whose sign is
/// inverted); anything else becomes UTC. The old column is left in place.
fn migrate_v3(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "ALTER TABLE users ADD COLUMN timezone TEXT NOT NULL DEFAULT 'UTC';

        UPDATE users SET timezone = CASE
            WHEN utc_offset_minutes != 0
                 AND utc_offset_minutes % 60 = 0
                 AND utc_offset_minutes BETWEEN -720 AND 840
            THEN printf('Etc/GMT%+d', -utc_offset_minutes / 60)
            ELSE 'UTC'
        END;",
    )?;

    set_schema_version(&tx, 3)?;
    tx.commit()?;
    debug!("applied schema v3");
    Ok(())
}
