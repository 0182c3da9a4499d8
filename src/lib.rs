//! Analog circuit sizing as reinforcement-learning environments.
//!
//! A [`CircuitEnv`] turns an [`EnvConfig`] and an [`Evaluator`] into a
//! conventional `reset`/`step` environment; a [`VecEnv`] runs many of them
//! concurrently. The [`Registry`] maps `circuit-technology-vN` ids to
//! configurations.

pub mod config;
pub mod env;
pub mod evaluator;
pub mod registry;
pub mod reward;
pub mod runtime;
pub mod space;

#[cfg(feature = "python")]
mod python;

pub use config::{ConfigError, EnvConfig, MetricConfig, ParameterConfig};
pub use env::{
    BatchStep, CircuitEnv, CircuitEnvBuilder, Env, EnvError, FailureReason, StepInfo, VecEnv,
    check_env,
};
pub use evaluator::{
    BlockingEvaluator, DesignPoint, Evaluator, EvaluatorError, EvaluatorFactory, EvaluatorParams,
    PerformanceReport, Simulator,
};
pub use registry::{EnvId, Registry, Variant};
pub use reward::{Comparator, RewardEngine, Shaping, TargetSpec};
pub use runtime::{PoolConfig, WorkerPool};
pub use space::{ScaledSpace, scale_value, unscale_value};
