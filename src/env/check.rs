use super::{CircuitEnv, Env, EnvError};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::debug;

const CHECK_STEPS: usize = 8;
const CHECK_SEED: u64 = 0;

/// Sanity-check a circuit environment against the conventions agents rely
/// on: a symmetric action space inside [-1, 1], 1-D observations of the
/// advertised size and finite observations and rewards.
///
/// Drives the environment through a reset and a few random steps, so it
/// talks to the evaluator. The environment is left reset afterwards.
pub async fn check_env(env: &mut CircuitEnv) -> Result<(), EnvError> {
    let action_space = env.action_space().clone();
    let observation_space = env.observation_space().clone();

    if action_space.dim() == 0 {
        return Err(EnvError::Contract("action space is empty".into()));
    }
    if !action_space.is_symmetric() {
        return Err(EnvError::Contract("action space is not symmetric".into()));
    }
    if action_space.high().iter().any(|&h| h > 1.0) {
        return Err(EnvError::Contract("action space exceeds [-1, 1]".into()));
    }
    if observation_space.dim() == 0 {
        return Err(EnvError::Contract("observation space is empty".into()));
    }
    if env.observation_names().len() != observation_space.dim() {
        return Err(EnvError::Contract(format!(
            "{} observation names for {} observation components",
            env.observation_names().len(),
            observation_space.dim()
        )));
    }

    let check_obs = |obs: &[f32], during: &str| -> Result<(), EnvError> {
        if obs.len() != observation_space.dim() {
            return Err(EnvError::Contract(format!(
                "{during} returned {} observations, expected {}",
                obs.len(),
                observation_space.dim()
            )));
        }
        if !obs.iter().all(|v| v.is_finite()) {
            return Err(EnvError::Contract(format!("{during} returned a non-finite observation")));
        }
        if !observation_space.contains(obs) {
            return Err(EnvError::Contract(format!(
                "{during} returned an observation out of bounds"
            )));
        }
        Ok(())
    };

    let obs = env.reset().await?;
    check_obs(&obs, "reset")?;

    let mut rng = StdRng::seed_from_u64(CHECK_SEED);
    for i in 0..CHECK_STEPS {
        let action = action_space.sample(&mut rng);
        let (obs, reward, done, info) = env.step(action).await?;
        check_obs(&obs, "step")?;
        if !reward.is_finite() {
            return Err(EnvError::Contract(format!("step {i} returned reward {reward}")));
        }
        if info.observations.len() != obs.len() {
            return Err(EnvError::Contract("info names do not match the observation".into()));
        }
        debug!(env = %env.id(), step = i, reward, done, "checked step");
        if done {
            env.reset().await?;
        }
    }

    env.reset().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::amplifier;
    use crate::env::testing::{Failing, amp_evaluator};
    use crate::evaluator::EvaluatorError;

    #[tokio::test]
    async fn amplifier_passes() {
        let mut env = CircuitEnv::builder(amplifier())
            .evaluator(amp_evaluator())
            .seed(3)
            .build()
            .unwrap();
        check_env(&mut env).await.unwrap();
    }

    #[tokio::test]
    async fn failing_evaluator_still_passes() {
        let mut env = CircuitEnv::builder(amplifier())
            .evaluator(Failing(EvaluatorError::NonConvergence("singular matrix".into())))
            .build()
            .unwrap();
        check_env(&mut env).await.unwrap();
    }

    #[tokio::test]
    async fn wide_action_space_is_rejected() {
        let mut cfg = amplifier();
        cfg.action_bound = 2.0;
        let mut env = CircuitEnv::builder(cfg)
            .evaluator(amp_evaluator())
            .build()
            .unwrap();
        assert!(matches!(check_env(&mut env).await, Err(EnvError::Contract(_))));
    }
}
