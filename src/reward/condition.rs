use serde::{Deserialize, Serialize};
use std::fmt;

/// How a measured metric is compared against its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = ">=", alias = "ge")]
    AtLeast,
    #[serde(rename = "<=", alias = "le")]
    AtMost,
    #[serde(rename = "==", alias = "eq")]
    EqualTo,
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Comparator::AtLeast => ">=",
            Comparator::AtMost => "<=",
            Comparator::EqualTo => "==",
        };
        f.write_str(s)
    }
}

/// Result of checking one metric against its target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Condition {
    pub satisfied: bool,
    /// Positive when the requirement is exceeded, negative when missed.
    pub distance: f64,
}

/// Checks a single measured value against a target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConditionEvaluator {
    /// Absolute tolerance for `==` comparisons.
    pub epsilon: f64,
    /// Distance reported for non-finite measurements. Must be negative.
    pub divergence_distance: f64,
}

impl Default for ConditionEvaluator {
    fn default() -> Self {
        Self {
            epsilon: 1e-9,
            divergence_distance: -1.0e6,
        }
    }
}

impl ConditionEvaluator {
    pub fn evaluate(&self, measured: f64, target: f64, comparator: Comparator) -> Condition {
        if !measured.is_finite() {
            return Condition {
                satisfied: false,
                distance: self.divergence_distance,
            };
        }

        match comparator {
            Comparator::AtLeast => Condition {
                satisfied: measured >= target,
                distance: measured - target,
            },
            Comparator::AtMost => Condition {
                satisfied: measured <= target,
                distance: target - measured,
            },
            Comparator::EqualTo => {
                let off = (measured - target).abs();
                Condition {
                    satisfied: off <= self.epsilon,
                    distance: -off,
                }
            }
        }
    }
}

/// [`ConditionEvaluator::evaluate`] with default settings.
pub fn evaluate(measured: f64, target: f64, comparator: Comparator) -> Condition {
    ConditionEvaluator::default().evaluate(measured, target, comparator)
}
