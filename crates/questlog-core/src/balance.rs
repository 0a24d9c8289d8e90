//! Domain balance tracking.
//!
//! Recent XP is summed per domain over a lookback window. A domain whose sum
//! falls below `neglect_ratio × average` is neglected, where the average is
//! taken over every domain present in the totals map. Which domains enter the
//! map is the caller's decision; the store reports every domain the user has
//! active tasks in, plus any domain with completions in the window.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::domain::DomainId;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BalancePolicy {
    /// Rolling window, in days, for per-domain XP totals
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    /// Fraction of the average below which a domain counts as neglected
    #[serde(default = "default_neglect_ratio")]
    pub neglect_ratio: f64,
    /// Upper bound on neglected-domain task picks in the daily digest
    #[serde(default = "default_picks")]
    pub picks: usize,
}

fn default_lookback_days() -> u32 {
    30
}
fn default_neglect_ratio() -> f64 {
    0.8
}
fn default_picks() -> usize {
    3
}

impl Default for BalancePolicy {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback_days(),
            neglect_ratio: default_neglect_ratio(),
            picks: default_picks(),
        }
    }
}

/// Recent XP per domain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainTotals(pub BTreeMap<DomainId, f64>);

impl DomainTotals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, domain: DomainId, xp: f64) {
        self.0.insert(domain, xp);
    }

    /// Add `xp` to a domain, creating its entry on first use.
    pub fn add(&mut self, domain: DomainId, xp: f64) {
        *self.0.entry(domain).or_insert(0.0) += xp;
    }

    pub fn get(&self, domain: DomainId) -> f64 {
        self.0.get(&domain).copied().unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DomainId, f64)> + '_ {
        self.0.iter().map(|(id, xp)| (*id, *xp))
    }

    /// Mean XP over the domains present, `None` when empty.
    pub fn average(&self) -> Option<f64> {
        if self.0.is_empty() {
            return None;
        }
        let sum: f64 = self.0.values().sum();
        Some(sum / self.0.len() as f64)
    }

    /// Whether `domain` sits below the neglect line.
    ///
    /// With no positive average there is nothing to be behind, so nothing is
    /// neglected. A domain absent from the map is treated as zero.
    pub fn is_neglected(&self, domain: DomainId, policy: &BalancePolicy) -> bool {
        match self.average() {
            Some(avg) if avg > 0.0 => self.get(domain) < policy.neglect_ratio * avg,
            _ => false,
        }
    }
}

impl FromIterator<(DomainId, f64)> for DomainTotals {
    fn from_iter<I: IntoIterator<Item = (DomainId, f64)>>(iter: I) -> Self {
        let mut totals = DomainTotals::new();
        for (domain, xp) in iter {
            totals.add(domain, xp);
        }
        totals
    }
}

/// Every domain in `totals` below the neglect line.
pub fn neglected_domains(totals: &DomainTotals, policy: &BalancePolicy) -> BTreeSet<DomainId> {
    let Some(avg) = totals.average().filter(|a| *a > 0.0) else {
        return BTreeSet::new();
    };
    let line = policy.neglect_ratio * avg;
    totals
        .iter()
        .filter(|(_, xp)| *xp < line)
        .map(|(id, _)| id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neglect_is_relative_to_average() {
        let totals: DomainTotals = [(1, 100.0), (2, 100.0), (3, 10.0)].into_iter().collect();
        // average 70, line 56
        let policy = BalancePolicy::default();
        let neglected = neglected_domains(&totals, &policy);
        assert_eq!(neglected.into_iter().collect::<Vec<_>>(), vec![3]);
        assert!(totals.is_neglected(3, &policy));
        assert!(!totals.is_neglected(1, &policy));
    }

    #[test]
    fn zero_entries_count_toward_the_average() {
        let totals: DomainTotals = [(1, 50.0), (2, 0.0)].into_iter().collect();
        let neglected = neglected_domains(&totals, &BalancePolicy::default());
        assert!(neglected.contains(&2));
        assert!(!neglected.contains(&1));
    }

    #[test]
    fn empty_or_all_zero_map_neglects_nothing() {
        let policy = BalancePolicy::default();
        assert!(neglected_domains(&DomainTotals::new(), &policy).is_empty());
        let zeros: DomainTotals = [(1, 0.0), (2, 0.0)].into_iter().collect();
        assert!(neglected_domains(&zeros, &policy).is_empty());
        assert!(!zeros.is_neglected(1, &policy));
    }

    #[test]
    fn absent_domain_reads_as_zero() {
        let totals: DomainTotals = [(1, 40.0)].into_iter().collect();
        assert!(totals.is_neglected(9, &BalancePolicy::default()));
    }

    #[test]
    fn collecting_sums_duplicates() {
        let totals: DomainTotals = [(1, 2.5), (1, 1.5)].into_iter().collect();
        assert_eq!(totals.get(1), 4.0);
        assert_eq!(totals.len(), 1);
    }
}
