pub mod check;
pub mod circuit;
pub mod errors;
pub mod traits;
pub mod types;
pub mod vec_env;

#[cfg(test)]
pub(crate) mod testing;

pub use check::check_env;
pub use circuit::{CircuitEnv, CircuitEnvBuilder, EpisodeState, Lifecycle, RewardFn};
pub use errors::EnvError;
pub use traits::Env;
pub use types::{BatchStep, FailureReason, StepInfo};
pub use vec_env::VecEnv;
