//! Level progression over cumulative XP.
//!
//! Level `L` is reached once XP hits `threshold(L - 1)` and lasts until
//! `threshold(L)`, with `threshold(L) = base × multiplier^(L-1)` and
//! `threshold(0) = 0`. Levels never go down.

use serde::{Deserialize, Serialize};

/// Safety net for non-finite or absurd XP values.
pub const MAX_LEVEL: u32 = 512;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelCurve {
    /// XP needed to leave level 1
    #[serde(default = "default_base")]
    pub base: f64,
    /// Growth factor between consecutive thresholds
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_base() -> f64 {
    100.0
}
fn default_multiplier() -> f64 {
    2.0
}

impl Default for LevelCurve {
    fn default() -> Self {
        Self {
            base: default_base(),
            multiplier: default_multiplier(),
        }
    }
}

/// Where a user sits on the curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelState {
    pub level: u32,
    pub xp_total: f64,
    /// XP at which the next level starts
    pub next_threshold: f64,
    /// Progress through the current level, in [0, 1]
    pub progress_ratio: f64,
}

impl LevelCurve {
    /// XP at which `level` ends.
    pub fn threshold(&self, level: u32) -> f64 {
        if level == 0 {
            return 0.0;
        }
        let exponent = i32::try_from(level - 1).unwrap_or(i32::MAX);
        self.base * self.multiplier.powi(exponent)
    }

    /// Level for `xp_total`, never below `current_level` (or 1).
    pub fn resolve(&self, xp_total: f64, current_level: u32) -> LevelState {
        let mut level = current_level.clamp(1, MAX_LEVEL);
        while level < MAX_LEVEL && xp_total >= self.threshold(level) {
            level += 1;
        }

        let floor = self.threshold(level - 1);
        let next_threshold = self.threshold(level);
        let span = next_threshold - floor;
        let progress_ratio = if span > 0.0 && span.is_finite() {
            ((xp_total - floor) / span).clamp(0.0, 1.0)
        } else {
            0.0
        };
        // NaN survives clamp; treat it as no progress.
        let progress_ratio = if progress_ratio.is_nan() { 0.0 } else { progress_ratio };

        LevelState {
            level,
            xp_total,
            next_threshold,
            progress_ratio,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_double() {
        let curve = LevelCurve::default();
        assert_eq!(curve.threshold(0), 0.0);
        assert_eq!(curve.threshold(1), 100.0);
        assert_eq!(curve.threshold(2), 200.0);
        assert_eq!(curve.threshold(4), 800.0);
    }

    #[test]
    fn resolve_places_xp_between_thresholds() {
        let curve = LevelCurve::default();
        assert_eq!(curve.resolve(0.0, 1).level, 1);
        assert_eq!(curve.resolve(99.99, 1).level, 1);
        assert_eq!(curve.resolve(100.0, 1).level, 2);
        assert_eq!(curve.resolve(350.0, 1).level, 3);
    }

    #[test]
    fn progress_ratio_within_level() {
        let state = LevelCurve::default().resolve(150.0, 1);
        assert_eq!(state.level, 2);
        assert_eq!(state.next_threshold, 200.0);
        assert!((state.progress_ratio - 0.5).abs() < 1e-12);
    }

    #[test]
    fn level_never_drops() {
        let state = LevelCurve::default().resolve(10.0, 4);
        assert_eq!(state.level, 4);
        assert_eq!(state.progress_ratio, 0.0);
    }

    #[test]
    fn non_finite_xp_is_capped() {
        let curve = LevelCurve::default();
        assert_eq!(curve.resolve(f64::INFINITY, 1).level, MAX_LEVEL);
        let nan = curve.resolve(f64::NAN, 1);
        assert_eq!(nan.level, 1);
        assert_eq!(nan.progress_ratio, 0.0);
    }
}
