//! Data-driven environment configuration.
//!
//! One [`EnvConfig`] describes a circuit/technology combination completely:
//! the tracked metrics and how they are graded, the tunable parameters and
//! their physical ranges, and the episode policy.

use crate::evaluator::EvaluatorParams;
use crate::reward::{Comparator, Shaping};
use crate::space::{Component, ScaledSpace};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("at least one metric must be configured")]
    NoMetrics,

    #[error("at least one parameter must be configured")]
    NoParameters,

    #[error("duplicate {kind} `{name}`")]
    Duplicate { kind: &'static str, name: String },

    #[error("`{name}`: lower bound {low} must be below upper bound {high}")]
    InvalidBounds { name: String, low: f64, high: f64 },

    #[error("`{name}`: logarithmic scaling requires positive bounds")]
    NonPositiveLogBound { name: String },

    #[error("`{name}`: tolerance must be positive and finite, got {value}")]
    InvalidTolerance { name: String, value: f64 },

    #[error("`{name}`: {field} must be finite, got {value}")]
    NotFinite {
        name: String,
        field: &'static str,
        value: f64,
    },

    #[error("`{name}`: start value {value} lies outside [{low}, {high}]")]
    StartOutOfBounds {
        name: String,
        value: f64,
        low: f64,
        high: f64,
    },

    #[error("max_steps must be at least 1")]
    ZeroMaxSteps,

    #[error("eval_timeout_ms must be at least 1")]
    ZeroTimeout,

    #[error("action_bound must be positive and finite, got {0}")]
    InvalidActionBound(f64),

    #[error("target_noise must be in [0, 1), got {0}")]
    InvalidNoise(f64),

    #[error("invalid reward shaping: {0}")]
    InvalidShaping(String),

    #[error("no evaluator was provided")]
    MissingEvaluator,
}

fn one() -> f64 {
    1.0
}

/// A tracked performance metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricConfig {
    pub name: String,
    pub comparator: Comparator,
    /// Default target, used when targets are not sampled.
    pub target: f64,
    pub tolerance: f64,
    #[serde(default = "one")]
    pub weight: f64,
    /// Physical range mapped onto the observation bounds.
    pub low: f64,
    pub high: f64,
    #[serde(default)]
    pub log: bool,
    /// Range random targets are drawn from. Falls back to `target`.
    #[serde(default)]
    pub sample: Option<[f64; 2]>,
}

/// A tunable circuit parameter (device size or electrical bias).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterConfig {
    pub name: String,
    pub low: f64,
    pub high: f64,
    #[serde(default)]
    pub log: bool,
    /// Physical starting value; the middle of the range when absent.
    #[serde(default)]
    pub start: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvConfig {
    /// Opaque evaluator connection parameters.
    pub evaluator: EvaluatorParams,
    pub metrics: Vec<MetricConfig>,
    pub parameters: Vec<ParameterConfig>,
    pub random_target: bool,
    pub random_start: bool,
    /// Relative noise applied to targets at reset.
    pub target_noise: f64,
    pub max_steps: usize,
    pub done_on_success: bool,
    pub eval_timeout_ms: u64,
    /// Reward returned by a step whose evaluation failed.
    pub failure_penalty: f64,
    /// Actions live in `[-action_bound, action_bound]`.
    pub action_bound: f64,
    pub seed: Option<u64>,
    pub shaping: Shaping,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            evaluator: EvaluatorParams::new(),
            metrics: Vec::new(),
            parameters: Vec::new(),
            random_target: false,
            random_start: false,
            target_noise: 0.0,
            max_steps: 50,
            done_on_success: true,
            eval_timeout_ms: 60_000,
            failure_penalty: -1.0e3,
            action_bound: 1.0,
            seed: None,
            shaping: Shaping::default(),
        }
    }
}

pub const OBSERVATION_BOUND: f64 = 1.0;

impl EnvConfig {
    pub fn from_json_str(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    pub fn eval_timeout(&self) -> Duration {
        Duration::from_millis(self.eval_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.metrics.is_empty() {
            return Err(ConfigError::NoMetrics);
        }
        if self.parameters.is_empty() {
            return Err(ConfigError::NoParameters);
        }
        if self.max_steps == 0 {
            return Err(ConfigError::ZeroMaxSteps);
        }
        if self.eval_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if !(self.action_bound.is_finite() && self.action_bound > 0.0) {
            return Err(ConfigError::InvalidActionBound(self.action_bound));
        }
        if !(0.0..1.0).contains(&self.target_noise) {
            return Err(ConfigError::InvalidNoise(self.target_noise));
        }
        finite("failure_penalty", "value", self.failure_penalty)?;
        self.shaping.validate()?;

        let mut seen = HashSet::new();
        for m in &self.metrics {
            if !seen.insert(m.name.as_str()) {
                return Err(ConfigError::Duplicate {
                    kind: "metric",
                    name: m.name.clone(),
                });
            }
            finite(&m.name, "target", m.target)?;
            finite(&m.name, "weight", m.weight)?;
            if !(m.tolerance.is_finite() && m.tolerance > 0.0) {
                return Err(ConfigError::InvalidTolerance {
                    name: m.name.clone(),
                    value: m.tolerance,
                });
            }
            check_range(&m.name, m.low, m.high, m.log)?;
            if let Some([lo, hi]) = m.sample {
                check_range(&m.name, lo, hi, m.log)?;
            }
        }

        let mut seen = HashSet::new();
        for p in &self.parameters {
            if !seen.insert(p.name.as_str()) {
                return Err(ConfigError::Duplicate {
                    kind: "parameter",
                    name: p.name.clone(),
                });
            }
            check_range(&p.name, p.low, p.high, p.log)?;
            if let Some(start) = p.start {
                if !(p.low..=p.high).contains(&start) {
                    return Err(ConfigError::StartOutOfBounds {
                        name: p.name.clone(),
                        value: start,
                        low: p.low,
                        high: p.high,
                    });
                }
            }
        }

        Ok(())
    }

    /// Symmetric normalized action space, one component per parameter.
    pub fn action_space(&self) -> ScaledSpace {
        ScaledSpace::new(
            self.parameters
                .iter()
                .map(|p| Component {
                    name: p.name.clone(),
                    low: -self.action_bound,
                    high: self.action_bound,
                    phys_low: p.low,
                    phys_high: p.high,
                    log: p.log,
                })
                .collect(),
        )
    }

    /// Observation layout: measured performance, targets, then the current
    /// design point.
    pub fn observation_space(&self) -> ScaledSpace {
        let metric = |prefix: &str, m: &MetricConfig| Component {
            name: format!("{prefix}.{}", m.name),
            low: -OBSERVATION_BOUND,
            high: OBSERVATION_BOUND,
            phys_low: m.low,
            phys_high: m.high,
            log: m.log,
        };

        let perf = self.metrics.iter().map(|m| metric("perf", m));
        let target = self.metrics.iter().map(|m| metric("target", m));
        let design = self.parameters.iter().map(|p| Component {
            name: format!("param.{}", p.name),
            low: -OBSERVATION_BOUND,
            high: OBSERVATION_BOUND,
            phys_low: p.low,
            phys_high: p.high,
            log: p.log,
        });

        ScaledSpace::new(perf.chain(target).chain(design).collect())
    }
}

fn finite(name: &str, field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NotFinite {
            name: name.to_string(),
            field,
            value,
        })
    }
}

fn check_range(name: &str, low: f64, high: f64, log: bool) -> Result<(), ConfigError> {
    if !(low.is_finite() && high.is_finite() && low < high) {
        return Err(ConfigError::InvalidBounds {
            name: name.to_string(),
            low,
            high,
        });
    }
    if log && low <= 0.0 {
        return Err(ConfigError::NonPositiveLogBound {
            name: name.to_string(),
        });
    }
    Ok(())
}
