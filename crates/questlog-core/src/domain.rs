//! Life domains: the shared catalog tasks are filed under.

use serde::{Deserialize, Serialize};

pub type DomainId = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub id: DomainId,
    pub name: String,
    /// Multiplies a task's base weight before modifiers apply
    pub weight_bias: f64,
}

/// Names seeded into a fresh store, each with a neutral bias.
pub const DEFAULT_DOMAINS: [&str; 6] = [
    "coding",
    "research",
    "admin",
    "creative",
    "health",
    "recreation",
];

pub const NEUTRAL_BIAS: f64 = 1.0;

impl Domain {
    /// Bias to apply, falling back to neutral for non-finite or non-positive
    /// values that slipped into storage.
    pub fn effective_bias(&self) -> f64 {
        if self.weight_bias.is_finite() && self.weight_bias > 0.0 {
            self.weight_bias
        } else {
            NEUTRAL_BIAS
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_bias_falls_back_to_neutral() {
        let mut d = Domain {
            id: 1,
            name: "coding".into(),
            weight_bias: 1.5,
        };
        assert_eq!(d.effective_bias(), 1.5);
        d.weight_bias = f64::NAN;
        assert_eq!(d.effective_bias(), 1.0);
        d.weight_bias = 0.0;
        assert_eq!(d.effective_bias(), 1.0);
    }
}
