pub mod config;
pub mod digest;
pub mod reward;
pub mod stats;
pub mod task;

use chrono::Utc;
use questlog_core::{Config, Database, Engine, User};
use serde::Serialize;

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Engine over the configured database, plus the local user.
pub struct Session {
    pub engine: Engine<Database>,
    pub user: User,
}

/// Load config, open the database and make sure the local user exists with
/// the configured profile.
pub fn open_session() -> Result<Session, Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let db = Database::open_at(config.database_path()?)?;
    let engine = Engine::from_config(db, &config);
    let profile = config.new_user();
    let user = engine.ensure_user(&profile, Utc::now())?;
    let user = engine.update_profile(user.id, &profile)?;
    Ok(Session { engine, user })
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
