//! XP scoring for a single completion.
//!
//! XP is the task's effective weight times an additive multiplier stack:
//!
//! ```text
//! effective = base_weight × domain bias
//! multiplier = 1 + overdue + recurrence + energy + priority + streak + balance + novelty
//! xp = max(max(floor_xp, base_weight × floor_ratio), round2(effective × multiplier))
//! ```
//!
//! | Term       | Contribution                                       |
//! |------------|----------------------------------------------------|
//! | overdue    | min(0.5, whole days overdue × 0.1)                 |
//! | recurrence | daily −0.15, weekly −0.05, otherwise 0             |
//! | energy     | low 0, medium 0.1, high 0.25                       |
//! | priority   | nice 0, should 0.1, must 0.3                       |
//! | streak     | min(0.3, ⌊streak / 3⌋ × 0.05)                      |
//! | balance    | +0.2 when the task's domain is neglected           |
//! | novelty    | +0.2 on the first completion of a novelty task     |
//!
//! Every term is reported in the [`XpBreakdown`] so a caller can explain the
//! number it shows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::balance::{BalancePolicy, DomainTotals};
use crate::domain::DomainId;
use crate::recurrence::RecurrenceClass;
use crate::task::{EnergyLevel, Priority};

/// Scoring constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringPolicy {
    #[serde(default = "default_overdue_rate")]
    pub overdue_rate_per_day: f64,
    #[serde(default = "default_overdue_cap")]
    pub overdue_cap: f64,
    #[serde(default = "default_daily_modifier")]
    pub daily_modifier: f64,
    #[serde(default = "default_weekly_modifier")]
    pub weekly_modifier: f64,
    #[serde(default)]
    pub energy_low: f64,
    #[serde(default = "default_energy_medium")]
    pub energy_medium: f64,
    #[serde(default = "default_energy_high")]
    pub energy_high: f64,
    #[serde(default)]
    pub priority_nice: f64,
    #[serde(default = "default_priority_should")]
    pub priority_should: f64,
    #[serde(default = "default_priority_must")]
    pub priority_must: f64,
    /// Completions per streak step
    #[serde(default = "default_streak_every")]
    pub streak_every: u32,
    #[serde(default = "default_streak_step")]
    pub streak_step: f64,
    #[serde(default = "default_streak_cap")]
    pub streak_cap: f64,
    #[serde(default = "default_balance_bonus")]
    pub balance_bonus: f64,
    #[serde(default = "default_novelty_bonus")]
    pub novelty_bonus: f64,
    /// Absolute minimum XP per completion
    #[serde(default = "default_floor_xp")]
    pub floor_xp: f64,
    /// Minimum XP as a fraction of the base weight
    #[serde(default = "default_floor_ratio")]
    pub floor_ratio: f64,
}

fn default_overdue_rate() -> f64 {
    0.1
}
fn default_overdue_cap() -> f64 {
    0.5
}
fn default_daily_modifier() -> f64 {
    -0.15
}
fn default_weekly_modifier() -> f64 {
    -0.05
}
fn default_energy_medium() -> f64 {
    0.1
}
fn default_energy_high() -> f64 {
    0.25
}
fn default_priority_should() -> f64 {
    0.1
}
fn default_priority_must() -> f64 {
    0.3
}
fn default_streak_every() -> u32 {
    3
}
fn default_streak_step() -> f64 {
    0.05
}
fn default_streak_cap() -> f64 {
    0.3
}
fn default_balance_bonus() -> f64 {
    0.2
}
fn default_novelty_bonus() -> f64 {
    0.2
}
fn default_floor_xp() -> f64 {
    0.3
}
fn default_floor_ratio() -> f64 {
    0.5
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            overdue_rate_per_day: default_overdue_rate(),
            overdue_cap: default_overdue_cap(),
            daily_modifier: default_daily_modifier(),
            weekly_modifier: default_weekly_modifier(),
            energy_low: 0.0,
            energy_medium: default_energy_medium(),
            energy_high: default_energy_high(),
            priority_nice: 0.0,
            priority_should: default_priority_should(),
            priority_must: default_priority_must(),
            streak_every: default_streak_every(),
            streak_step: default_streak_step(),
            streak_cap: default_streak_cap(),
            balance_bonus: default_balance_bonus(),
            novelty_bonus: default_novelty_bonus(),
            floor_xp: default_floor_xp(),
            floor_ratio: default_floor_ratio(),
        }
    }
}

impl ScoringPolicy {
    fn energy(&self, energy: EnergyLevel) -> f64 {
        match energy {
            EnergyLevel::Low => self.energy_low,
            EnergyLevel::Medium => self.energy_medium,
            EnergyLevel::High => self.energy_high,
        }
    }

    fn priority(&self, priority: Priority) -> f64 {
        match priority {
            Priority::Nice => self.priority_nice,
            Priority::Should => self.priority_should,
            Priority::Must => self.priority_must,
        }
    }

    fn recurrence(&self, class: RecurrenceClass) -> f64 {
        match class {
            RecurrenceClass::Daily => self.daily_modifier,
            RecurrenceClass::Weekly => self.weekly_modifier,
            RecurrenceClass::None | RecurrenceClass::Custom => 0.0,
        }
    }

    fn streak(&self, streak: u32) -> f64 {
        let steps = streak.checked_div(self.streak_every).unwrap_or(0);
        (f64::from(steps) * self.streak_step).min(self.streak_cap)
    }

    fn overdue(&self, days_overdue: i64) -> f64 {
        (days_overdue as f64 * self.overdue_rate_per_day).min(self.overdue_cap)
    }

    /// Lower bound on XP for a given base weight.
    pub fn floor(&self, base_weight: u32) -> f64 {
        self.floor_xp.max(f64::from(base_weight) * self.floor_ratio)
    }
}

/// Everything the scorer looks at for one completion.
#[derive(Debug, Clone, Copy)]
pub struct XpInput<'a> {
    pub base_weight: u32,
    pub domain_id: Option<DomainId>,
    /// Bias of `domain_id`, 1.0 when domain-less
    pub weight_bias: f64,
    pub due_at: Option<DateTime<Utc>>,
    pub reference: DateTime<Utc>,
    pub recurrence: RecurrenceClass,
    pub energy: EnergyLevel,
    pub priority: Priority,
    /// Streak before this completion is applied
    pub streak_before: u32,
    pub domain_totals: &'a DomainTotals,
    pub first_completion: bool,
    pub novelty_bonus: bool,
}

/// One named contribution to the multiplier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XpTerm {
    pub name: String,
    pub value: f64,
}

impl XpTerm {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Explainable XP result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XpBreakdown {
    pub base_weight: u32,
    pub effective_weight: f64,
    pub terms: Vec<XpTerm>,
    /// `1 + Σ terms`, never negative
    pub multiplier: f64,
    /// `effective_weight × multiplier` before rounding and flooring
    pub raw: f64,
    pub floor: f64,
    pub total: f64,
}

impl XpBreakdown {
    pub fn term(&self, name: &str) -> Option<f64> {
        self.terms.iter().find(|t| t.name == name).map(|t| t.value)
    }

    /// The term that moved the multiplier the most, in either direction.
    pub fn top_term(&self) -> Option<&XpTerm> {
        self.terms
            .iter()
            .filter(|t| t.value != 0.0)
            .max_by(|a, b| a.value.abs().total_cmp(&b.value.abs()))
    }
}

/// Round to two decimals.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Whole days `reference` is past `due_at`, 0 when not overdue.
pub fn days_overdue(due_at: Option<DateTime<Utc>>, reference: DateTime<Utc>) -> i64 {
    match due_at {
        Some(due) if due < reference => (reference - due).num_days(),
        _ => 0,
    }
}

/// XP for one completion.
pub fn compute_xp(input: &XpInput<'_>, scoring: &ScoringPolicy, balance: &BalancePolicy) -> XpBreakdown {
    let neglected = input
        .domain_id
        .is_some_and(|d| input.domain_totals.is_neglected(d, balance));
    let novelty = input.novelty_bonus && input.first_completion;

    let terms = vec![
        XpTerm::new("overdue", scoring.overdue(days_overdue(input.due_at, input.reference))),
        XpTerm::new("recurrence", scoring.recurrence(input.recurrence)),
        XpTerm::new("energy", scoring.energy(input.energy)),
        XpTerm::new("priority", scoring.priority(input.priority)),
        XpTerm::new("streak", scoring.streak(input.streak_before)),
        XpTerm::new("balance", if neglected { scoring.balance_bonus } else { 0.0 }),
        XpTerm::new("novelty", if novelty { scoring.novelty_bonus } else { 0.0 }),
    ];

    let multiplier = (1.0 + terms.iter().map(|t| t.value).sum::<f64>()).max(0.0);
    let bias = if input.weight_bias.is_finite() && input.weight_bias > 0.0 {
        input.weight_bias
    } else {
        1.0
    };
    let effective_weight = f64::from(input.base_weight) * bias;
    let raw = effective_weight * multiplier;
    let floor = scoring.floor(input.base_weight);
    let total = round2(floor.max(round2(raw)));

    XpBreakdown {
        base_weight: input.base_weight,
        effective_weight,
        terms,
        multiplier,
        raw,
        floor,
        total,
    }
}

/// Projected XP for listings: never counts the first-completion novelty.
pub fn preview_xp(input: &XpInput<'_>, scoring: &ScoringPolicy, balance: &BalancePolicy) -> XpBreakdown {
    let projected = XpInput {
        first_completion: false,
        ..*input
    };
    compute_xp(&projected, scoring, balance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn reference() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap()
    }

    fn input(totals: &DomainTotals) -> XpInput<'_> {
        XpInput {
            base_weight: 1,
            domain_id: None,
            weight_bias: 1.0,
            due_at: None,
            reference: reference(),
            recurrence: RecurrenceClass::None,
            energy: EnergyLevel::Low,
            priority: Priority::Nice,
            streak_before: 0,
            domain_totals: totals,
            first_completion: false,
            novelty_bonus: false,
        }
    }

    fn xp(input: &XpInput<'_>) -> XpBreakdown {
        compute_xp(input, &ScoringPolicy::default(), &BalancePolicy::default())
    }

    #[test]
    fn overdue_novelty_must_task() {
        let totals = DomainTotals::new();
        let result = xp(&XpInput {
            base_weight: 2,
            priority: Priority::Must,
            energy: EnergyLevel::Medium,
            due_at: Some(reference() - Duration::hours(30)),
            first_completion: true,
            novelty_bonus: true,
            ..input(&totals)
        });
        assert!((result.multiplier - 1.7).abs() < 1e-9);
        assert!((result.total - 3.4).abs() < 1e-9);
        assert_eq!(result.term("overdue"), Some(0.1));
    }

    #[test]
    fn daily_task_with_streak() {
        let totals = DomainTotals::new();
        let result = xp(&XpInput {
            base_weight: 3,
            recurrence: RecurrenceClass::Daily,
            streak_before: 6,
            ..input(&totals)
        });
        assert!((result.multiplier - 0.95).abs() < 1e-9);
        assert!((result.total - 2.85).abs() < 1e-9);
    }

    #[test]
    fn overdue_is_capped() {
        let totals = DomainTotals::new();
        let result = xp(&XpInput {
            due_at: Some(reference() - Duration::days(40)),
            ..input(&totals)
        });
        assert_eq!(result.term("overdue"), Some(0.5));
    }

    #[test]
    fn partial_day_overdue_counts_as_zero() {
        let totals = DomainTotals::new();
        let result = xp(&XpInput {
            due_at: Some(reference() - Duration::hours(23)),
            ..input(&totals)
        });
        assert_eq!(result.term("overdue"), Some(0.0));
    }

    #[test]
    fn streak_term_is_stepped_and_capped() {
        let policy = ScoringPolicy::default();
        assert_eq!(policy.streak(2), 0.0);
        assert!((policy.streak(3) - 0.05).abs() < 1e-12);
        assert!((policy.streak(100) - 0.3).abs() < 1e-12);
    }

    #[test]
    fn floor_applies_to_small_results() {
        let totals = DomainTotals::new();
        let result = xp(&XpInput {
            recurrence: RecurrenceClass::Daily,
            weight_bias: 0.1,
            ..input(&totals)
        });
        assert_eq!(result.total, 0.5);
    }

    #[test]
    fn neglected_domain_gets_balance_bonus() {
        let totals: DomainTotals = [(1, 90.0), (2, 10.0)].into_iter().collect();
        let neglected = xp(&XpInput {
            domain_id: Some(2),
            ..input(&totals)
        });
        let busy = xp(&XpInput {
            domain_id: Some(1),
            ..input(&totals)
        });
        assert_eq!(neglected.term("balance"), Some(0.2));
        assert_eq!(busy.term("balance"), Some(0.0));
    }

    #[test]
    fn novelty_only_on_first_completion() {
        let totals = DomainTotals::new();
        let later = xp(&XpInput {
            novelty_bonus: true,
            first_completion: false,
            ..input(&totals)
        });
        assert_eq!(later.term("novelty"), Some(0.0));
    }

    #[test]
    fn preview_ignores_novelty() {
        let totals = DomainTotals::new();
        let first = XpInput {
            novelty_bonus: true,
            first_completion: true,
            base_weight: 5,
            ..input(&totals)
        };
        let preview = preview_xp(&first, &ScoringPolicy::default(), &BalancePolicy::default());
        assert_eq!(preview.term("novelty"), Some(0.0));
        assert!(preview.total < xp(&first).total);
    }

    #[test]
    fn top_term_picks_largest_magnitude() {
        let totals = DomainTotals::new();
        let result = xp(&XpInput {
            priority: Priority::Must,
            energy: EnergyLevel::Medium,
            ..input(&totals)
        });
        assert_eq!(result.top_term().map(|t| t.name.as_str()), Some("priority"));
    }
}
