use crate::env::errors::EnvError;
use async_trait::async_trait;

/// The conventional reinforcement-learning environment contract.
///
/// `step` returns `(observation, reward, done, info)`.
#[async_trait]
pub trait Env: Send {
    type Obs: Send + Clone + 'static;
    type Act: Send + Clone + 'static;
    type Info: Send + Clone + 'static;

    async fn reset(&mut self) -> Result<Self::Obs, EnvError>;

    async fn step(
        &mut self,
        act: Self::Act,
    ) -> Result<(Self::Obs, f32, bool, Self::Info), EnvError>;

    /// Whether `step(act)` would be accepted right now, without running it.
    fn check_step(&self, _act: &Self::Act) -> Result<(), EnvError> {
        Ok(())
    }

    /// Re-seed the environment's random source.
    fn seed(&mut self, _seed: u64) {}

    /// Human-readable rendering of the current state, if supported.
    fn render(&self) -> Option<String> {
        None
    }

    async fn close(&mut self) -> Result<(), EnvError> {
        Ok(())
    }
}
