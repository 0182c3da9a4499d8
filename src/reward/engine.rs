use super::condition::{Condition, ConditionEvaluator};
use super::target::TargetSpec;
use crate::config::ConfigError;
use crate::evaluator::PerformanceReport;
use serde::{Deserialize, Serialize};

/// Coefficients of the target-distance reward.
///
/// A satisfied metric costs `-loss² / (satisfied_divisor · tol)`, an
/// unsatisfied one `-|loss| - unsatisfied_offset · tol`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Shaping {
    pub satisfied_divisor: f64,
    pub unsatisfied_offset: f64,
    pub equality_epsilon: f64,
    pub divergence_distance: f64,
    pub divergence_penalty: f64,
}

impl Default for Shaping {
    fn default() -> Self {
        Self {
            satisfied_divisor: 2.0,
            unsatisfied_offset: 0.5,
            equality_epsilon: 1e-9,
            divergence_distance: -1.0e6,
            divergence_penalty: -1.0e6,
        }
    }
}

impl Shaping {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::InvalidShaping(msg.to_string()));

        if !(self.satisfied_divisor.is_finite() && self.satisfied_divisor > 0.0) {
            return invalid("satisfied_divisor must be positive");
        }
        if !(self.unsatisfied_offset.is_finite() && self.unsatisfied_offset >= 0.0) {
            return invalid("unsatisfied_offset must be non-negative");
        }
        if !(self.equality_epsilon.is_finite() && self.equality_epsilon >= 0.0) {
            return invalid("equality_epsilon must be non-negative");
        }
        if !(self.divergence_distance.is_finite() && self.divergence_distance < 0.0) {
            return invalid("divergence_distance must be negative");
        }
        if !(self.divergence_penalty.is_finite() && self.divergence_penalty <= 0.0) {
            return invalid("divergence_penalty must not be positive");
        }
        Ok(())
    }

    pub fn condition(&self) -> ConditionEvaluator {
        ConditionEvaluator {
            epsilon: self.equality_epsilon,
            divergence_distance: self.divergence_distance,
        }
    }
}

/// Per-metric loss and satisfaction plus the aggregated reward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub loss: Vec<f64>,
    pub mask: Vec<bool>,
    pub reward: f64,
}

impl Outcome {
    pub fn all_satisfied(&self) -> bool {
        self.mask.iter().all(|&m| m)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RewardEngine {
    shaping: Shaping,
}

impl RewardEngine {
    pub fn new(shaping: Shaping) -> Self {
        Self { shaping }
    }

    pub fn shaping(&self) -> &Shaping {
        &self.shaping
    }

    /// Shaped cost of a single metric. Never positive for a finite loss.
    pub fn cost(&self, condition: Condition, tolerance: f64) -> f64 {
        let loss = condition.distance;
        if condition.satisfied {
            -(loss * loss) / (self.shaping.satisfied_divisor * tolerance)
        } else {
            -loss.abs() - self.shaping.unsatisfied_offset * tolerance
        }
    }

    /// Grade a report against the targets. A metric missing from the report
    /// counts as a failed measurement.
    pub fn evaluate(&self, report: &PerformanceReport, targets: &TargetSpec) -> Outcome {
        let condition = self.shaping.condition();
        let mut loss = Vec::with_capacity(targets.len());
        let mut mask = Vec::with_capacity(targets.len());
        let mut reward = 0.0;

        for m in targets.iter() {
            let measured = report.get(&m.name).unwrap_or(f64::NAN);
            let c = condition.evaluate(measured, m.target, m.comparator);
            reward += self.sanitize(m.weight * self.cost(c, m.tolerance));
            loss.push(if c.distance.is_finite() {
                c.distance
            } else {
                self.shaping.divergence_distance
            });
            mask.push(c.satisfied);
        }

        Outcome {
            loss,
            mask,
            reward: self.sanitize(reward),
        }
    }

    /// Replace a non-finite reward term with the divergence penalty.
    pub fn sanitize(&self, value: f64) -> f64 {
        if value.is_finite() {
            value
        } else {
            self.shaping.divergence_penalty
        }
    }
}
