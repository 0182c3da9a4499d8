use super::condition::Comparator;
use crate::config::MetricConfig;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricTarget {
    pub name: String,
    pub target: f64,
    pub comparator: Comparator,
    pub tolerance: f64,
    pub weight: f64,
}

/// The requirements an episode is graded against.
///
/// Metric order is fixed by the configuration and defines the index order of
/// loss and mask vectors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetSpec {
    metrics: Vec<MetricTarget>,
}

impl TargetSpec {
    pub fn new(metrics: Vec<MetricTarget>) -> Self {
        Self { metrics }
    }

    /// The configured default targets.
    pub fn from_config(metrics: &[MetricConfig]) -> Self {
        Self::new(metrics.iter().map(|m| metric_target(m, m.target)).collect())
    }

    /// Targets drawn from each metric's sampling range, uniformly or
    /// log-uniformly depending on the metric's scale. Metrics without a
    /// range keep their configured target.
    pub fn sample<R: Rng + ?Sized>(metrics: &[MetricConfig], rng: &mut R) -> Self {
        Self::new(
            metrics
                .iter()
                .map(|m| {
                    let value = match m.sample {
                        Some([lo, hi]) if m.log => rng.gen_range(lo.ln()..=hi.ln()).exp(),
                        Some([lo, hi]) => rng.gen_range(lo..=hi),
                        None => m.target,
                    };
                    metric_target(m, value)
                })
                .collect(),
        )
    }

    /// Scale every target by an independent factor in `[1 - noise, 1 + noise]`.
    pub fn perturb<R: Rng + ?Sized>(mut self, noise: f64, rng: &mut R) -> Self {
        if noise > 0.0 {
            for m in &mut self.metrics {
                m.target *= 1.0 + rng.gen_range(-noise..=noise);
            }
        }
        self
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MetricTarget> {
        self.metrics.iter()
    }

    pub fn get(&self, name: &str) -> Option<&MetricTarget> {
        self.metrics.iter().find(|m| m.name == name)
    }

    pub fn values(&self) -> Vec<f64> {
        self.metrics.iter().map(|m| m.target).collect()
    }
}

fn metric_target(m: &MetricConfig, target: f64) -> MetricTarget {
    MetricTarget {
        name: m.name.clone(),
        target,
        comparator: m.comparator,
        tolerance: m.tolerance,
        weight: m.weight,
    }
}
