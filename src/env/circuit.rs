use std::fmt::Write as _;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ConfigError, EnvConfig};
use crate::env::errors::EnvError;
use crate::env::traits::Env;
use crate::env::types::{FailureReason, StepInfo};
use crate::evaluator::{DesignPoint, Evaluator, EvaluatorError, PerformanceReport, panic_message};
use crate::reward::{Outcome, RewardEngine, TargetSpec};
use crate::space::ScaledSpace;

/// Replaces the scalar reward; loss and mask are still produced by the
/// target-distance engine.
pub type RewardFn = dyn Fn(&PerformanceReport, &TargetSpec, &Outcome) -> f64 + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Ready,
    Done,
}

/// Everything that belongs to the running episode.
#[derive(Debug, Clone)]
pub struct EpisodeState {
    pub id: Uuid,
    pub target: TargetSpec,
    pub steps: usize,
    pub design: DesignPoint,
    pub last_report: Option<PerformanceReport>,
    pub last_mask: Vec<bool>,
    pub last_reward: f32,
    pub last_observation: Vec<f32>,
}

pub struct CircuitEnvBuilder {
    id: String,
    config: Arc<EnvConfig>,
    evaluator: Option<Box<dyn Evaluator>>,
    seed: Option<u64>,
    reward_fn: Option<Arc<RewardFn>>,
}

impl CircuitEnvBuilder {
    pub fn new(config: impl Into<Arc<EnvConfig>>) -> Self {
        Self {
            id: "circuit".to_string(),
            config: config.into(),
            evaluator: None,
            seed: None,
            reward_fn: None,
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn evaluator<E: Evaluator + 'static>(self, evaluator: E) -> Self {
        self.boxed_evaluator(Box::new(evaluator))
    }

    pub fn boxed_evaluator(mut self, evaluator: Box<dyn Evaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Overrides the seed from the configuration.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn reward_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&PerformanceReport, &TargetSpec, &Outcome) -> f64 + Send + Sync + 'static,
    {
        self.reward_fn = Some(Arc::new(f));
        self
    }

    pub fn shared_reward_fn(mut self, f: Option<Arc<RewardFn>>) -> Self {
        self.reward_fn = f;
        self
    }

    pub fn build(self) -> Result<CircuitEnv, EnvError> {
        self.config.validate()?;
        let evaluator = self.evaluator.ok_or(ConfigError::MissingEvaluator)?;

        let action_space = self.config.action_space();
        let observation_space = self.config.observation_space();
        let start_action = self
            .config
            .parameters
            .iter()
            .zip(action_space.components())
            .map(|(p, c)| p.start.map_or(0.0, |s| c.scale(s) as f32))
            .collect();
        let rng = match self.seed.or(self.config.seed) {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(CircuitEnv {
            id: self.id,
            engine: RewardEngine::new(self.config.shaping),
            observation_names: observation_space.names(),
            config: self.config,
            action_space,
            observation_space,
            start_action,
            reward_fn: self.reward_fn,
            evaluator,
            connected: false,
            rng,
            lifecycle: Lifecycle::Uninitialized,
            episode: None,
        })
    }
}

/// One circuit-sizing environment driven entirely by its [`EnvConfig`].
///
/// Actions are normalized design points; observations are the measured
/// performance, the targets and the current design, all normalized.
pub struct CircuitEnv {
    id: String,
    config: Arc<EnvConfig>,
    action_space: ScaledSpace,
    observation_space: ScaledSpace,
    observation_names: Vec<String>,
    start_action: Vec<f32>,
    engine: RewardEngine,
    reward_fn: Option<Arc<RewardFn>>,
    evaluator: Box<dyn Evaluator>,
    connected: bool,
    rng: StdRng,
    lifecycle: Lifecycle,
    episode: Option<EpisodeState>,
}

impl CircuitEnv {
    pub fn builder(config: impl Into<Arc<EnvConfig>>) -> CircuitEnvBuilder {
        CircuitEnvBuilder::new(config)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    pub fn action_space(&self) -> &ScaledSpace {
        &self.action_space
    }

    pub fn observation_space(&self) -> &ScaledSpace {
        &self.observation_space
    }

    pub fn observation_names(&self) -> &[String] {
        &self.observation_names
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn episode(&self) -> Option<&EpisodeState> {
        self.episode.as_ref()
    }

    /// Map a normalized action onto named physical parameters. Out-of-bound
    /// components are clamped.
    pub fn design_point(&self, action: &[f32]) -> DesignPoint {
        self.config
            .parameters
            .iter()
            .map(|p| p.name.as_str())
            .zip(self.action_space.unscale(action))
            .collect()
    }

    /// One evaluator call under the configured timeout. A panicking
    /// evaluator is reported as a crash.
    async fn simulate(
        &mut self,
        design: &DesignPoint,
    ) -> Result<PerformanceReport, EvaluatorError> {
        let timeout = self.config.eval_timeout();
        let call = AssertUnwindSafe(self.evaluator.evaluate(design)).catch_unwind();
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(payload)) => Err(EvaluatorError::Crashed(panic_message(payload))),
            Err(_) => Err(EvaluatorError::Timeout(timeout)),
        }
    }

    fn observe(
        &self,
        report: Option<&PerformanceReport>,
        target: &TargetSpec,
        design: &DesignPoint,
    ) -> Vec<f32> {
        let perf = self
            .config
            .metrics
            .iter()
            .map(|m| report.and_then(|r| r.get(&m.name)).unwrap_or(f64::NAN));
        let params = self
            .config
            .parameters
            .iter()
            .map(|p| design.get(&p.name).unwrap_or(f64::NAN));
        let physical: Vec<f64> = perf
            .chain(target.iter().map(|m| m.target))
            .chain(params)
            .collect();

        let scaled = self.observation_space.scale(&physical);
        if scaled.iter().any(|v| !v.is_finite()) {
            debug!(env = %self.id, "non-finite observation components replaced");
        }
        self.observation_space.clamp(&scaled)
    }

    fn to_reward(&self, value: f64) -> f32 {
        let r = self.engine.sanitize(value) as f32;
        if r.is_finite() {
            r
        } else {
            self.engine.shaping().divergence_penalty as f32
        }
    }

    fn draw_target(&mut self) -> TargetSpec {
        let target = if self.config.random_target {
            TargetSpec::sample(&self.config.metrics, &mut self.rng)
        } else {
            TargetSpec::from_config(&self.config.metrics)
        };
        target.perturb(self.config.target_noise, &mut self.rng)
    }
}

#[async_trait]
impl Env for CircuitEnv {
    type Obs = Vec<f32>;
    type Act = Vec<f32>;
    type Info = StepInfo;

    async fn reset(&mut self) -> Result<Self::Obs, EnvError> {
        if !self.connected {
            self.evaluator
                .connect()
                .await
                .map_err(EnvError::EvaluatorUnavailable)?;
            self.connected = true;
            info!(env = %self.id, "evaluator session opened");
        }

        let target = self.draw_target();
        let start = if self.config.random_start {
            self.action_space.sample(&mut self.rng)
        } else {
            self.start_action.clone()
        };
        let design = self.design_point(&start);

        let report = match self.simulate(&design).await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(env = %self.id, error = %e, "initial design point could not be evaluated");
                None
            }
        };
        let last_mask = match &report {
            Some(r) => self.engine.evaluate(r, &target).mask,
            None => vec![false; target.len()],
        };
        let observation = self.observe(report.as_ref(), &target, &design);

        let episode = EpisodeState {
            id: Uuid::new_v4(),
            target,
            steps: 0,
            design,
            last_report: report,
            last_mask,
            last_reward: 0.0,
            last_observation: observation.clone(),
        };
        debug!(env = %self.id, episode = %episode.id, "reset");

        self.episode = Some(episode);
        self.lifecycle = Lifecycle::Ready;
        Ok(observation)
    }

    fn check_step(&self, action: &Self::Act) -> Result<(), EnvError> {
        match self.lifecycle {
            Lifecycle::Uninitialized => return Err(EnvError::NotReset),
            Lifecycle::Done => return Err(EnvError::EpisodeDone),
            Lifecycle::Ready => {}
        }
        if action.len() != self.action_space.dim() {
            return Err(EnvError::ActionShape {
                expected: self.action_space.dim(),
                got: action.len(),
            });
        }
        Ok(())
    }

    async fn step(
        &mut self,
        action: Self::Act,
    ) -> Result<(Self::Obs, f32, bool, Self::Info), EnvError> {
        self.check_step(&action)?;

        let design = self.design_point(&action);
        let started = Instant::now();
        let result = self.simulate(&design).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let mut episode = self.episode.take().ok_or(EnvError::NotReset)?;
        episode.steps += 1;

        let (observation, reward, done, info) = match result {
            Ok(report) => {
                let outcome = self.engine.evaluate(&report, &episode.target);
                let reward = match &self.reward_fn {
                    Some(f) => self.to_reward(f(&report, &episode.target, &outcome)),
                    None => self.to_reward(outcome.reward),
                };
                let observation = self.observe(Some(&report), &episode.target, &design);
                let done = episode.steps >= self.config.max_steps
                    || (self.config.done_on_success && outcome.all_satisfied());

                let info = StepInfo {
                    episode_id: episode.id,
                    step: episode.steps,
                    targets: episode.target.clone(),
                    performance: Some(report.clone()),
                    loss: outcome.loss,
                    mask: outcome.mask.clone(),
                    design: design.clone(),
                    observations: self.observation_names.clone(),
                    elapsed_ms,
                    failure: None,
                };

                episode.last_report = Some(report);
                episode.last_mask = outcome.mask;
                episode.last_observation = observation.clone();
                (observation, reward, done, info)
            }
            Err(e) => {
                warn!(
                    env = %self.id,
                    episode = %episode.id,
                    step = episode.steps,
                    error = %e,
                    "evaluation failed, ending episode"
                );
                let observation = if episode.last_observation.is_empty() {
                    vec![0.0; self.observation_space.dim()]
                } else {
                    episode.last_observation.clone()
                };
                let info = StepInfo {
                    episode_id: episode.id,
                    step: episode.steps,
                    targets: episode.target.clone(),
                    performance: None,
                    loss: vec![self.engine.shaping().divergence_distance; episode.target.len()],
                    mask: vec![false; episode.target.len()],
                    design: design.clone(),
                    observations: self.observation_names.clone(),
                    elapsed_ms,
                    failure: Some(FailureReason::from(&e)),
                };
                episode.last_report = None;
                (observation, self.to_reward(self.config.failure_penalty), true, info)
            }
        };

        debug!(
            env = %self.id,
            episode = %episode.id,
            step = episode.steps,
            reward,
            done,
            "step"
        );

        episode.design = design;
        episode.last_reward = reward;
        self.episode = Some(episode);
        self.lifecycle = if done { Lifecycle::Done } else { Lifecycle::Ready };

        Ok((observation, reward, done, info))
    }

    fn seed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    fn render(&self) -> Option<String> {
        let episode = self.episode.as_ref()?;
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} | episode {} | step {}/{} | reward {:.4}",
            self.id, episode.id, episode.steps, self.config.max_steps, episode.last_reward
        );
        for (i, m) in episode.target.iter().enumerate() {
            let measured = episode
                .last_report
                .as_ref()
                .and_then(|r| r.get(&m.name))
                .map_or_else(|| "-".to_string(), |v| format!("{v:.4e}"));
            let ok = if episode.last_mask.get(i).copied().unwrap_or(false) { "ok" } else { "--" };
            let _ = writeln!(
                out,
                "  {:<12} {:>12} {} {:<12.4e} {}",
                m.name, measured, m.comparator, m.target, ok
            );
        }
        Some(out)
    }

    async fn close(&mut self) -> Result<(), EnvError> {
        if self.connected {
            self.evaluator
                .close()
                .await
                .map_err(EnvError::EvaluatorUnavailable)?;
            self.connected = false;
        }
        self.lifecycle = Lifecycle::Uninitialized;
        self.episode = None;
        Ok(())
    }
}
