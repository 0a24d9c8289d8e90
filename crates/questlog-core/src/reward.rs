//! Redeemable rewards.
//!
//! A reward unlocks once the user has both the XP and the level it asks for.
//! Claiming records the moment but spends nothing: XP only ever grows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result, ValidationError};
use crate::user::{User, UserId};

pub type RewardId = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reward {
    pub id: RewardId,
    pub user_id: UserId,
    pub title: String,
    pub xp_cost: f64,
    pub level_req: u32,
    pub claimed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReward {
    pub title: String,
    pub xp_cost: f64,
    #[serde(default = "default_level_req")]
    pub level_req: u32,
}

fn default_level_req() -> u32 {
    1
}

impl NewReward {
    pub fn new(title: impl Into<String>, xp_cost: f64, level_req: u32) -> Self {
        Self {
            title: title.into(),
            xp_cost,
            level_req,
        }
    }

    /// Starter rewards for a new user.
    pub fn defaults() -> Vec<NewReward> {
        vec![
            NewReward::new("Take a creative break", 100.0, 1),
            NewReward::new("Buy a book", 200.0, 1),
            NewReward::new("Plan a day trip", 400.0, 1),
        ]
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::Empty("title".into()));
        }
        if !self.xp_cost.is_finite() || self.xp_cost < 0.0 {
            return Err(ValidationError::OutOfRange {
                field: "xp_cost".into(),
                message: format!("must be a non-negative number, got {}", self.xp_cost),
            });
        }
        Ok(())
    }
}

/// Result of a claim attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "claimed_at", rename_all = "snake_case")]
pub enum ClaimOutcome {
    Claimed(DateTime<Utc>),
    AlreadyClaimed(DateTime<Utc>),
}

impl Reward {
    pub fn is_claimed(&self) -> bool {
        self.claimed_at.is_some()
    }

    pub fn is_unlocked_for(&self, user: &User) -> bool {
        user.xp_total >= self.xp_cost && user.level >= self.level_req
    }
}

/// Decide a claim of `reward` by `user` at `now`.
///
/// # Errors
/// Returns [`CoreError::RequirementsNotMet`] when the user is short on XP or
/// level. An earlier claim is reported as [`ClaimOutcome::AlreadyClaimed`]
/// even if the requirements would no longer hold.
pub fn claim_reward(reward: &Reward, user: &User, now: DateTime<Utc>) -> Result<ClaimOutcome> {
    if let Some(at) = reward.claimed_at {
        return Ok(ClaimOutcome::AlreadyClaimed(at));
    }
    if !reward.is_unlocked_for(user) {
        return Err(CoreError::RequirementsNotMet {
            reward_id: reward.id,
            xp_cost: reward.xp_cost,
            level_req: reward.level_req,
            xp_total: user.xp_total,
            level: user.level,
        });
    }
    Ok(ClaimOutcome::Claimed(now))
}

/// Listing order: cheapest unlock first.
pub fn sort_rewards(rewards: &mut [Reward]) {
    rewards.sort_by(|a, b| {
        a.level_req
            .cmp(&b.level_req)
            .then(a.xp_cost.total_cmp(&b.xp_cost))
            .then(a.id.cmp(&b.id))
    });
}
