//! Property tests for the pure rules: levels, XP, streaks and recurrence.

use chrono::{DateTime, Duration, TimeZone, Utc, Weekday};
use proptest::prelude::*;
use questlog_core::balance::{BalancePolicy, DomainTotals};
use questlog_core::leveling::LevelCurve;
use questlog_core::recurrence::{Recurrence, RecurrenceClass, WeekdaySet};
use questlog_core::scoring::{compute_xp, ScoringPolicy, XpInput};
use questlog_core::streak::{StreakPolicy, StreakState};
use questlog_core::task::{EnergyLevel, Priority};

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 7, 30, 0).unwrap()
}

fn energy() -> impl Strategy<Value = EnergyLevel> {
    prop_oneof![
        Just(EnergyLevel::Low),
        Just(EnergyLevel::Medium),
        Just(EnergyLevel::High)
    ]
}

fn priority() -> impl Strategy<Value = Priority> {
    prop_oneof![Just(Priority::Nice), Just(Priority::Should), Just(Priority::Must)]
}

fn class() -> impl Strategy<Value = RecurrenceClass> {
    prop_oneof![
        Just(RecurrenceClass::None),
        Just(RecurrenceClass::Daily),
        Just(RecurrenceClass::Weekly),
        Just(RecurrenceClass::Custom)
    ]
}

const WEEK: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

fn weekday() -> impl Strategy<Value = Weekday> {
    (0usize..7).prop_map(|n| WEEK[n])
}

proptest! {
    #[test]
    fn level_boundaries(level in 1u32..20) {
        let curve = LevelCurve::default();
        let threshold = curve.threshold(level);
        prop_assert_eq!(curve.resolve(threshold - 1e-3, level).level, level);
        prop_assert!(curve.resolve(threshold, level).level >= level + 1);
    }

    #[test]
    fn level_never_drops(xp in 0.0f64..10_000.0, current in 1u32..30) {
        let state = LevelCurve::default().resolve(xp, current);
        prop_assert!(state.level >= current);
        prop_assert!((0.0..=1.0).contains(&state.progress_ratio));
    }

    #[test]
    fn xp_is_floored_and_monotone_in_weight(
        weight in 1u32..200,
        energy in energy(),
        priority in priority(),
        recurrence in class(),
        streak in 0u32..40,
        overdue_hours in 0i64..400,
        first in any::<bool>(),
        novelty in any::<bool>(),
    ) {
        let totals = DomainTotals::new();
        let scoring = ScoringPolicy::default();
        let balance = BalancePolicy::default();
        let reference = base_time();
        let input = |base_weight| XpInput {
            base_weight,
            domain_id: None,
            weight_bias: 1.0,
            due_at: Some(reference - Duration::hours(overdue_hours)),
            reference,
            recurrence,
            energy,
            priority,
            streak_before: streak,
            domain_totals: &totals,
            first_completion: first,
            novelty_bonus: novelty,
        };

        let lighter = compute_xp(&input(weight), &scoring, &balance);
        let heavier = compute_xp(&input(weight + 1), &scoring, &balance);

        prop_assert!(heavier.total >= lighter.total);
        prop_assert!(lighter.total >= 0.3_f64.max(f64::from(weight) * 0.5) - 1e-9);
        prop_assert!(lighter.multiplier >= 0.0);
    }

    #[test]
    fn daily_streak_next_day_continues_gap_resets(hour in 0u32..24, current in 1u32..50) {
        let policy = StreakPolicy::default();
        let last = Utc.with_ymd_and_hms(2024, 5, 10, hour, 0, 0).unwrap();
        let state = StreakState {
            current_streak: current,
            longest_streak: current,
            last_completed_at: Some(last),
        };

        let next_day = state.advance(&Recurrence::Daily, &(last + Duration::days(1)), &policy);
        prop_assert_eq!(next_day.state.current_streak, current + 1);

        let gap = state.advance(&Recurrence::Daily, &(last + Duration::days(3)), &policy);
        prop_assert_eq!(gap.state.current_streak, 1);
        prop_assert_eq!(gap.state.longest_streak, current);
    }

    #[test]
    fn weekly_next_occurrence_is_due(day in weekday(), offset_days in 0i64..14, hour in 0i64..24) {
        let recurrence = Recurrence::Weekly(WeekdaySet::single(day));
        let anchor = base_time() + Duration::days(offset_days) + Duration::hours(hour);

        let next = recurrence.next_occurrence(&anchor).unwrap();
        prop_assert!(next > anchor);
        prop_assert!(recurrence.is_due_today(Some(&next), &next));
    }

    #[test]
    fn custom_next_occurrence_lands_on_listed_day(
        days in proptest::collection::btree_set(0usize..7, 1..7),
        offset_days in 0i64..14,
    ) {
        let set: WeekdaySet = days
            .iter()
            .map(|n| WEEK[*n])
            .collect();
        let recurrence = Recurrence::Custom(set);
        let anchor = base_time() + Duration::days(offset_days);

        let next = recurrence.next_occurrence(&anchor).unwrap();
        prop_assert!(next > anchor);
        prop_assert!(next - anchor <= Duration::days(7));
        prop_assert!(recurrence.is_due_today(None, &next));
    }
}
