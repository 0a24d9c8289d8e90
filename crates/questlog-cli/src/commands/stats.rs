use chrono::Utc;
use clap::Subcommand;
use questlog_core::EngineStore;
use serde::Serialize;

use super::{open_session, print_json, CliResult};

#[derive(Subcommand)]
pub enum StatsAction {
    /// XP, completions and overdue counts over a window
    Snapshot {
        /// Window length in days
        #[arg(long, default_value = "30")]
        days: u32,
    },
    /// Best, weakest and at-risk streaks
    Streaks,
    /// Current level and progress
    Level,
    /// Recent XP per domain and which domains are neglected
    Domains,
}

#[derive(Serialize)]
struct DomainBalance {
    id: i64,
    name: String,
    xp: f64,
    neglected: bool,
}

pub fn run(action: StatsAction) -> CliResult {
    let session = open_session()?;
    let engine = &session.engine;
    let user_id = session.user.id;
    let now = Utc::now();

    match action {
        StatsAction::Snapshot { days } => {
            print_json(&engine.stats_snapshot(user_id, days, now)?)?;
        }
        StatsAction::Streaks => {
            print_json(&engine.streak_overview(user_id, now)?)?;
        }
        StatsAction::Level => {
            print_json(&engine.level_state(user_id)?)?;
        }
        StatsAction::Domains => {
            let totals = engine.domain_totals(user_id, now)?;
            let neglected = engine.neglected_domains(user_id, now)?;
            let rows: Vec<DomainBalance> = engine
                .store()
                .domains()?
                .into_iter()
                .filter_map(|domain| {
                    totals.0.get(&domain.id).map(|&xp| DomainBalance {
                        id: domain.id,
                        neglected: neglected.contains(&domain.id),
                        name: domain.name,
                        xp,
                    })
                })
                .collect();
            print_json(&rows)?;
        }
    }
    Ok(())
}
