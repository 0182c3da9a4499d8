use crate::evaluator::{DesignPoint, EvaluatorError, PerformanceReport};
use crate::reward::TargetSpec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Machine-readable reason a step ended without a valid measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    NonConvergence(String),
    Timeout { after_ms: u64 },
    Crashed(String),
    Connection(String),
    InvalidReport(String),
}

impl From<&EvaluatorError> for FailureReason {
    fn from(e: &EvaluatorError) -> Self {
        match e {
            EvaluatorError::NonConvergence(msg) => FailureReason::NonConvergence(msg.clone()),
            EvaluatorError::Timeout(after) => FailureReason::Timeout {
                after_ms: after.as_millis() as u64,
            },
            EvaluatorError::Crashed(msg) => FailureReason::Crashed(msg.clone()),
            EvaluatorError::Connection(msg) => FailureReason::Connection(msg.clone()),
            EvaluatorError::InvalidReport(msg) => FailureReason::InvalidReport(msg.clone()),
        }
    }
}

/// Diagnostics returned alongside every step of a circuit environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepInfo {
    pub episode_id: Uuid,
    pub step: usize,
    pub targets: TargetSpec,
    pub performance: Option<PerformanceReport>,
    pub loss: Vec<f64>,
    pub mask: Vec<bool>,
    pub design: DesignPoint,
    /// Names of the observation components, in order.
    pub observations: Vec<String>,
    pub elapsed_ms: u64,
    pub failure: Option<FailureReason>,
}

impl StepInfo {
    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Stacked results of one batched step. Index `i` belongs to instance `i`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStep<O, I> {
    pub observations: Vec<O>,
    pub rewards: Vec<f32>,
    pub dones: Vec<bool>,
    pub infos: Vec<I>,
}

impl<O, I> BatchStep<O, I> {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            observations: Vec::with_capacity(n),
            rewards: Vec::with_capacity(n),
            dones: Vec::with_capacity(n),
            infos: Vec::with_capacity(n),
        }
    }

    pub fn push(&mut self, (obs, reward, done, info): (O, f32, bool, I)) {
        self.observations.push(obs);
        self.rewards.push(reward);
        self.dones.push(done);
        self.infos.push(info);
    }

    pub fn len(&self) -> usize {
        self.rewards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rewards.is_empty()
    }
}
