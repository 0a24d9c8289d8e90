//! Windowed XP and completion statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::completion::Completion;
use crate::domain::Domain;
use crate::task::{Task, TaskId, TimeHorizon};

/// Bucket name for completions of domain-less tasks.
pub const UNSORTED_DOMAIN: &str = "unsorted";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainXp {
    pub domain: String,
    pub xp: f64,
    pub completions: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub days: u32,
    pub since: DateTime<Utc>,
    /// XP per domain, highest first
    pub domains: Vec<DomainXp>,
    /// Completions per time horizon
    pub horizons: BTreeMap<TimeHorizon, u32>,
    /// Active tasks past their due date right now
    pub overdue: u32,
    pub completions: u32,
    pub total_xp: f64,
}

impl StatsSnapshot {
    /// Aggregate `completions` (already limited to the window) against the
    /// user's tasks.
    pub fn build(
        days: u32,
        since: DateTime<Utc>,
        reference: DateTime<Utc>,
        completions: &[Completion],
        tasks: &[Task],
        domains: &[Domain],
    ) -> Self {
        let by_id: HashMap<TaskId, &Task> = tasks.iter().map(|t| (t.id, t)).collect();
        let names: HashMap<_, &str> = domains.iter().map(|d| (d.id, d.name.as_str())).collect();

        let mut per_domain: BTreeMap<String, DomainXp> = BTreeMap::new();
        let mut horizons: BTreeMap<TimeHorizon, u32> = BTreeMap::new();
        let mut total_xp = 0.0;

        for completion in completions {
            total_xp += completion.xp_earned;
            let task = by_id.get(&completion.task_id);
            let domain = task
                .and_then(|t| t.domain_id)
                .and_then(|id| names.get(&id).copied())
                .unwrap_or(UNSORTED_DOMAIN);
            let entry = per_domain
                .entry(domain.to_string())
                .or_insert_with(|| DomainXp {
                    domain: domain.to_string(),
                    xp: 0.0,
                    completions: 0,
                });
            entry.xp += completion.xp_earned;
            entry.completions += 1;

            if let Some(task) = task {
                *horizons.entry(task.time_horizon).or_insert(0) += 1;
            }
        }

        let mut domains: Vec<DomainXp> = per_domain.into_values().collect();
        domains.sort_by(|a, b| b.xp.total_cmp(&a.xp).then_with(|| a.domain.cmp(&b.domain)));

        let overdue = tasks
            .iter()
            .filter(|t| t.is_active() && t.is_overdue(reference))
            .count();

        StatsSnapshot {
            days,
            since,
            domains,
            horizons,
            overdue: u32::try_from(overdue).unwrap_or(u32::MAX),
            completions: u32::try_from(completions.len()).unwrap_or(u32::MAX),
            total_xp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recurrence::Recurrence;
    use crate::task::{EnergyLevel, Priority, TaskStatus};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap()
    }

    fn task(id: TaskId, domain_id: Option<i64>, horizon: TimeHorizon) -> Task {
        Task {
            id,
            user_id: 1,
            title: format!("task {id}"),
            description: None,
            domain_id,
            time_horizon: horizon,
            energy: EnergyLevel::Medium,
            priority: Priority::Should,
            base_weight: 1,
            recurrence: Recurrence::None,
            due_at: None,
            status: TaskStatus::Active,
            novelty_bonus: false,
            subtasks: Vec::new(),
            created_at: now() - Duration::days(30),
        }
    }

    fn done(id: i64, task_id: TaskId, xp: f64) -> Completion {
        Completion {
            id,
            task_id,
            completed_at: now() - Duration::days(1),
            xp_earned: xp,
            streak_after: 1,
        }
    }

    #[test]
    fn groups_by_domain_name_and_horizon() {
        let domains = vec![Domain {
            id: 1,
            name: "health".into(),
            weight_bias: 1.0,
        }];
        let mut overdue = task(3, None, TimeHorizon::Long);
        overdue.due_at = Some(now() - Duration::hours(2));
        let tasks = vec![
            task(1, Some(1), TimeHorizon::Now),
            task(2, None, TimeHorizon::Short),
            overdue,
        ];
        let completions = vec![done(1, 1, 2.0), done(2, 1, 1.5), done(3, 2, 4.0)];

        let snap = StatsSnapshot::build(7, now() - Duration::days(7), now(), &completions, &tasks, &domains);

        assert_eq!(snap.completions, 3);
        assert_eq!(snap.overdue, 1);
        assert!((snap.total_xp - 7.5).abs() < 1e-9);
        assert_eq!(snap.domains[0].domain, UNSORTED_DOMAIN);
        assert_eq!(snap.domains[1].domain, "health");
        assert_eq!(snap.domains[1].completions, 2);
        assert_eq!(snap.horizons.get(&TimeHorizon::Now), Some(&2));
        assert_eq!(snap.horizons.get(&TimeHorizon::Short), Some(&1));
    }

    #[test]
    fn empty_window_is_all_zero() {
        let snap = StatsSnapshot::build(30, now(), now(), &[], &[], &[]);
        assert_eq!(snap.completions, 0);
        assert!(snap.domains.is_empty());
        assert!(snap.horizons.is_empty());
    }
}
