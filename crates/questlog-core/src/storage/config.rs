//! TOML-based application configuration.
//!
//! Stores:
//! - The local user's profile and digest preferences
//! - Scoring, streak, leveling and balance constants
//! - An optional database location override
//!
//! Configuration is stored at `~/.config/questlog/config.toml`.

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::data_dir;
use crate::balance::BalancePolicy;
use crate::completion::Policies;
use crate::error::{ConfigError, Result};
use crate::leveling::LevelCurve;
use crate::scoring::ScoringPolicy;
use crate::streak::StreakPolicy;
use crate::user::NewUser;

/// Profile of the local user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default = "default_name")]
    pub name: String,
    /// IANA zone name, e.g. "Europe/Zurich"
    #[serde(default = "default_timezone")]
    pub timezone: Tz,
    #[serde(default = "default_true")]
    pub notifications_enabled: bool,
    #[serde(default = "default_digest_hour")]
    pub digest_hour: u8,
}

/// Storage location override.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database file; `<data_dir>/questlog.db` when unset
    #[serde(default)]
    pub database_path: Option<String>,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/questlog/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub user: UserConfig,
    #[serde(default)]
    pub scoring: ScoringPolicy,
    #[serde(default)]
    pub streak: StreakPolicy,
    #[serde(default)]
    pub leveling: LevelCurve,
    #[serde(default)]
    pub balance: BalancePolicy,
    #[serde(default)]
    pub storage: StorageConfig,
}

// Default functions

fn default_name() -> String {
    "player".to_string()
}
fn default_timezone() -> Tz {
    Tz::UTC
}
fn default_true() -> bool {
    true
}
fn default_digest_hour() -> u8 {
    8
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            timezone: default_timezone(),
            notifications_enabled: true,
            digest_hour: default_digest_hour(),
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            let is_leaf = parts.peek().is_none();
            if is_leaf {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value
                            .parse::<bool>()
                            .map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(_) => {
                        if let Ok(n) = value.parse::<i64>() {
                            serde_json::Value::Number(n.into())
                        } else if let Ok(n) = value.parse::<f64>() {
                            serde_json::Number::from_f64(n)
                                .map(serde_json::Value::Number)
                                .ok_or_else(|| invalid(format!("cannot parse '{value}' as number")))?
                        } else {
                            return Err(invalid(format!("cannot parse '{value}' as number")));
                        }
                    }
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        return Err(invalid("cannot replace a whole section".to_string()));
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    /// Default config file location.
    ///
    /// # Errors
    /// Returns an error if the data directory cannot be created.
    pub fn path() -> Result<PathBuf> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from disk, writing defaults if the file does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::path()?)
    }

    /// [`Config::load`] against an explicit path.
    ///
    /// # Errors
    /// Same as [`Config::load`].
    pub fn load_from(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let cfg: Config = toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?;
                cfg.validate()?;
                Ok(cfg)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
            Err(e) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }
            .into()),
        }
    }

    /// Persist to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::path()?)
    }

    /// [`Config::save`] against an explicit path.
    ///
    /// # Errors
    /// Same as [`Config::save`].
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| failed(e.to_string()))?;
        Ok(())
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Update a value in memory by dot-separated key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown, the value cannot be parsed,
    /// or the result fails validation. `self` is untouched on error.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let mut json = serde_json::to_value(&*self)?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Config = serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Set a config value by key and save. Returns error if key is unknown.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown, the value cannot be parsed,
    /// or the config cannot be saved.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.set_value(key, value)?;
        self.save()
    }

    /// Reject values the engine cannot work with.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidValue`] naming the first bad key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, message: &str| {
            Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: message.to_string(),
            })
        };
        if self.user.digest_hour > 23 {
            return invalid("user.digest_hour", "must be between 0 and 23");
        }
        if self.balance.lookback_days == 0 {
            return invalid("balance.lookback_days", "must be at least 1");
        }
        if !(self.balance.neglect_ratio.is_finite() && self.balance.neglect_ratio > 0.0) {
            return invalid("balance.neglect_ratio", "must be a positive number");
        }
        if !(self.leveling.base.is_finite() && self.leveling.base > 0.0) {
            return invalid("leveling.base", "must be a positive number");
        }
        if !(self.leveling.multiplier.is_finite() && self.leveling.multiplier > 1.0) {
            return invalid("leveling.multiplier", "must be greater than 1");
        }
        if self.streak.daily_grace_hours < 24 {
            return invalid("streak.daily_grace_hours", "must be at least 24");
        }
        Ok(())
    }

    /// The constants the engine runs with.
    pub fn policies(&self) -> Policies {
        Policies {
            scoring: self.scoring,
            streak: self.streak,
            leveling: self.leveling,
            balance: self.balance,
        }
    }

    /// Profile for creating the local user.
    pub fn new_user(&self) -> NewUser {
        NewUser {
            name: self.user.name.clone(),
            timezone: self.user.timezone,
            notifications_enabled: self.user.notifications_enabled,
            digest_hour: self.user.digest_hour,
        }
    }

    /// Database file to open.
    ///
    /// # Errors
    /// Returns an error if the data directory cannot be created.
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.storage.database_path {
            Some(path) if !path.trim().is_empty() => Ok(PathBuf::from(path)),
            _ => Ok(data_dir()?.join("questlog.db")),
        }
    }
}
