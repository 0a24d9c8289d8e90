use chrono::Utc;
use clap::Subcommand;
use questlog_core::NewReward;

use super::{open_session, print_json, CliResult};

#[derive(Subcommand)]
pub enum RewardAction {
    /// Add a reward
    Add {
        /// Reward title
        title: String,
        /// XP the user must have to claim it
        #[arg(long)]
        cost: f64,
        /// Minimum level
        #[arg(long, default_value = "1")]
        level: u32,
    },
    /// List rewards, cheapest unlock first
    List,
    /// Claim a reward (XP is not spent)
    Claim {
        /// Reward ID
        id: i64,
    },
}

pub fn run(action: RewardAction) -> CliResult {
    let session = open_session()?;
    let engine = &session.engine;

    match action {
        RewardAction::Add { title, cost, level } => {
            let reward = engine.create_reward(session.user.id, &NewReward::new(title, cost, level))?;
            print_json(&reward)?;
        }
        RewardAction::List => {
            print_json(&engine.rewards(session.user.id)?)?;
        }
        RewardAction::Claim { id } => {
            print_json(&engine.claim_reward(id, Utc::now())?)?;
        }
    }
    Ok(())
}
