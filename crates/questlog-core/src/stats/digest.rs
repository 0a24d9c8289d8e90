//! Daily digest and weekly review.
//!
//! The daily digest lists what needs attention today:
//! - overdue active tasks, oldest first
//! - tasks due today that are not already overdue
//! - a few tasks from neglected domains, medium energy first, then high
//!
//! The weekly review is a seven-day [`StatsSnapshot`] trimmed to XP per domain
//! and the completion count.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::domain::{Domain, DomainId};
use crate::leveling::LevelState;
use crate::scoring::days_overdue;
use crate::task::{EnergyLevel, Priority, Task, TaskId};

use super::snapshot::{DomainXp, StatsSnapshot};

/// Cap on the overdue and due-today lists.
const MAX_LISTED: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestEntry {
    pub task_id: TaskId,
    pub title: String,
    pub domain: Option<String>,
    pub energy: EnergyLevel,
    pub priority: Priority,
    pub due_at: Option<DateTime<Utc>>,
    pub days_overdue: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyDigest {
    /// Local calendar date the digest is for
    pub date: NaiveDate,
    pub overdue: Vec<DigestEntry>,
    pub due_today: Vec<DigestEntry>,
    pub neglected_domains: Vec<String>,
    pub picks: Vec<DigestEntry>,
    pub level: LevelState,
}

/// Medium energy is the easiest way back into a neglected domain.
fn pick_rank(energy: EnergyLevel) -> u8 {
    match energy {
        EnergyLevel::Medium => 0,
        EnergyLevel::High => 1,
        EnergyLevel::Low => 2,
    }
}

impl DailyDigest {
    pub fn build<Tz: TimeZone>(
        reference: &DateTime<Tz>,
        tasks: &[Task],
        domains: &[Domain],
        neglected: &BTreeSet<DomainId>,
        level: LevelState,
        picks: usize,
    ) -> Self {
        let now = reference.with_timezone(&Utc);
        let names: HashMap<DomainId, &str> = domains.iter().map(|d| (d.id, d.name.as_str())).collect();
        let entry = |task: &Task| DigestEntry {
            task_id: task.id,
            title: task.title.clone(),
            domain: task
                .domain_id
                .and_then(|id| names.get(&id).map(|n| n.to_string())),
            energy: task.energy,
            priority: task.priority,
            due_at: task.due_at,
            days_overdue: days_overdue(task.due_at, now),
        };

        let active: Vec<&Task> = tasks.iter().filter(|t| t.is_active()).collect();

        let mut overdue: Vec<&Task> = active.iter().copied().filter(|t| t.is_overdue(now)).collect();
        overdue.sort_by_key(|t| (t.due_at, t.id));

        let mut due_today: Vec<&Task> = active
            .iter()
            .copied()
            .filter(|t| !t.is_overdue(now) && t.is_due_today(reference))
            .collect();
        due_today.sort_by_key(|t| (t.due_at.is_none(), t.due_at, t.id));

        let mut candidates: Vec<&Task> = active
            .iter()
            .copied()
            .filter(|t| t.domain_id.is_some_and(|d| neglected.contains(&d)))
            .collect();
        candidates.sort_by_key(|t| (pick_rank(t.energy), std::cmp::Reverse(t.id)));

        let neglected_domains = neglected
            .iter()
            .filter_map(|id| names.get(id).map(|n| n.to_string()))
            .collect();

        DailyDigest {
            date: reference.date_naive(),
            overdue: overdue.into_iter().take(MAX_LISTED).map(&entry).collect(),
            due_today: due_today.into_iter().take(MAX_LISTED).map(&entry).collect(),
            neglected_domains,
            picks: candidates.into_iter().take(picks).map(&entry).collect(),
            level,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.overdue.is_empty() && self.due_today.is_empty() && self.picks.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyReview {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    pub domains: Vec<DomainXp>,
    pub completions: u32,
    pub total_xp: f64,
}

impl WeeklyReview {
    pub fn from_snapshot(snapshot: StatsSnapshot, until: DateTime<Utc>) -> Self {
        WeeklyReview {
            since: snapshot.since,
            until,
            domains: snapshot.domains,
            completions: snapshot.completions,
            total_xp: snapshot.total_xp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recurrence::Recurrence;
    use crate::task::{TaskStatus, TimeHorizon};
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        // A Wednesday.
        Utc.with_ymd_and_hms(2024, 7, 3, 9, 0, 0).unwrap()
    }

    fn task(id: TaskId) -> Task {
        Task {
            id,
            user_id: 1,
            title: format!("task {id}"),
            description: None,
            domain_id: None,
            time_horizon: TimeHorizon::Short,
            energy: EnergyLevel::Medium,
            priority: Priority::Should,
            base_weight: 1,
            recurrence: Recurrence::None,
            due_at: None,
            status: TaskStatus::Active,
            novelty_bonus: false,
            subtasks: Vec::new(),
            created_at: now() - Duration::days(10),
        }
    }

    fn level() -> LevelState {
        LevelState {
            level: 1,
            xp_total: 0.0,
            next_threshold: 100.0,
            progress_ratio: 0.0,
        }
    }

    fn domains() -> Vec<Domain> {
        vec![
            Domain { id: 1, name: "coding".into(), weight_bias: 1.0 },
            Domain { id: 2, name: "health".into(), weight_bias: 1.0 },
        ]
    }

    #[test]
    fn overdue_listed_oldest_first_and_capped() {
        let tasks: Vec<Task> = (1..=7)
            .map(|i| {
                let mut t = task(i);
                t.due_at = Some(now() - Duration::days(i));
                t
            })
            .collect();
        let digest = DailyDigest::build(&now(), &tasks, &domains(), &BTreeSet::new(), level(), 3);
        assert_eq!(digest.overdue.len(), 5);
        assert_eq!(digest.overdue[0].task_id, 7);
        assert_eq!(digest.overdue[0].days_overdue, 7);
        assert!(digest.due_today.is_empty());
    }

    #[test]
    fn due_today_excludes_overdue_and_archived() {
        let mut later_today = task(1);
        later_today.due_at = Some(now() + Duration::hours(3));
        let mut earlier_today = task(2);
        earlier_today.due_at = Some(now() - Duration::hours(1));
        let mut daily = task(3);
        daily.recurrence = Recurrence::Daily;
        let mut archived = task(4);
        archived.recurrence = Recurrence::Daily;
        archived.status = TaskStatus::Archived;
        let mut friday = task(5);
        friday.recurrence = Recurrence::parse("custom:FR").unwrap();

        let tasks = vec![later_today, earlier_today, daily, archived, friday];
        let digest = DailyDigest::build(&now(), &tasks, &domains(), &BTreeSet::new(), level(), 3);

        let due: Vec<_> = digest.due_today.iter().map(|e| e.task_id).collect();
        assert_eq!(due, vec![1, 3]);
        assert_eq!(digest.overdue.len(), 1);
    }

    #[test]
    fn picks_prefer_medium_then_high_energy() {
        let mut low = task(1);
        low.domain_id = Some(2);
        low.energy = EnergyLevel::Low;
        let mut high = task(2);
        high.domain_id = Some(2);
        high.energy = EnergyLevel::High;
        let mut medium = task(3);
        medium.domain_id = Some(2);
        let mut other = task(4);
        other.domain_id = Some(1);

        let neglected: BTreeSet<DomainId> = [2].into_iter().collect();
        let digest = DailyDigest::build(
            &now(),
            &[low, high, medium, other],
            &domains(),
            &neglected,
            level(),
            2,
        );
        let picks: Vec<_> = digest.picks.iter().map(|e| e.task_id).collect();
        assert_eq!(picks, vec![3, 2]);
        assert_eq!(digest.neglected_domains, vec!["health".to_string()]);
        assert_eq!(digest.picks[0].domain.as_deref(), Some("health"));
    }
}
