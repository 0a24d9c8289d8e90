//! Core error types for questlog-core.
//!
//! This module defines the error hierarchy using thiserror. Engine-level
//! failures (unknown task, archived task, unmet reward requirements) are all
//! local and recoverable by the caller; storage and configuration failures
//! are wrapped so callers only ever match on [`CoreError`].

use std::path::PathBuf;
use thiserror::Error;

use crate::recurrence::RecurrenceError;

/// Core error type for questlog-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Malformed recurrence descriptor (rejected when a task is written)
    #[error("Recurrence error: {0}")]
    Recurrence(#[from] RecurrenceError),

    /// Referenced entity does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    /// Completion attempted on a task that is already archived
    #[error("Task {task_id} is archived and cannot be completed again")]
    TaskArchived { task_id: i64 },

    /// Reward claim attempted below its XP or level requirement
    #[error(
        "Requirements not met for reward {reward_id}: needs {xp_cost} XP at level {level_req}, \
         have {xp_total:.2} XP at level {level}"
    )]
    RequirementsNotMet {
        reward_id: i64,
        xp_cost: f64,
        level_req: u32,
        xp_total: f64,
        level: u32,
    },

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        CoreError::NotFound { entity, id }
    }
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// A stored value could not be decoded into its domain type
    #[error("Corrupt value in column '{column}': {message}")]
    CorruptValue { column: String, message: String },

    /// Database is locked
    #[error("Database is locked")]
    Locked,
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Data directory could not be resolved or created
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

/// Validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Empty value where text is required
    #[error("'{0}' must not be empty")]
    Empty(String),

    /// Numeric value outside its allowed range
    #[error("Value for '{field}' out of range: {message}")]
    OutOfRange { field: String, message: String },

    /// Unrecognized enum token
    #[error("Invalid value for '{field}': {value}")]
    InvalidValue { field: String, value: String },
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _msg)
                if matches!(
                    e.code,
                    rusqlite::ErrorCode::DatabaseLocked | rusqlite::ErrorCode::DatabaseBusy
                ) =>
            {
                DatabaseError::Locked
            }
            rusqlite::Error::FromSqlConversionFailure(idx, _ty, source) => DatabaseError::CorruptValue {
                column: format!("#{idx}"),
                message: source.to_string(),
            },
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Database(err.into())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_names_entity() {
        let err = CoreError::not_found("task", 42);
        assert_eq!(err.to_string(), "task not found: 42");
    }

    #[test]
    fn recurrence_errors_convert() {
        let err: CoreError = RecurrenceError::UnknownKind("monthly".into()).into();
        assert!(matches!(err, CoreError::Recurrence(_)));
        assert!(err.to_string().contains("monthly"));
    }

    #[test]
    fn sqlite_errors_become_database_errors() {
        let err: CoreError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, CoreError::Database(DatabaseError::QueryFailed(_))));
    }
}
