use chrono::Utc;
use clap::Subcommand;
use questlog_core::DigestKind;

use super::{open_session, print_json, CliResult};

#[derive(Subcommand)]
pub enum DigestAction {
    /// Overdue, due today and picks from neglected domains
    Today {
        /// Record the digest as sent
        #[arg(long)]
        mark: bool,
    },
    /// XP per domain and completions over the last seven days
    Weekly {
        /// Record the review as sent
        #[arg(long)]
        mark: bool,
    },
}

pub fn run(action: DigestAction) -> CliResult {
    let session = open_session()?;
    let engine = &session.engine;
    let user_id = session.user.id;
    let now = Utc::now();

    match action {
        DigestAction::Today { mark } => {
            print_json(&engine.daily_digest(user_id, now)?)?;
            if mark {
                engine.record_digest_sent(user_id, DigestKind::Daily, now)?;
            }
        }
        DigestAction::Weekly { mark } => {
            print_json(&engine.weekly_review(user_id, now)?)?;
            if mark {
                engine.record_digest_sent(user_id, DigestKind::Weekly, now)?;
            }
        }
    }
    Ok(())
}
